//! CLI Module
//!
//! Command-line interface for the Voxline sentence speaker.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Voxline - speak line-notation sentences from word clips
#[derive(Parser, Debug)]
#[command(name = "voxline")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// JSON config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory the sound paths are resolved against
    #[arg(long, global = true)]
    pub sound_root: Option<PathBuf>,

    /// Sound path to search, in order (repeatable; replaces the configured list)
    #[arg(long = "sound-path", global = true)]
    pub sound_paths: Vec<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the words and modifiers a sentence resolves to
    #[command(name = "parse")]
    Parse {
        /// Sentence in line notation
        sentence: String,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Play a sentence
    #[command(name = "speak")]
    Speak {
        /// Sentence in line notation
        sentence: String,

        /// Master volume, 0-100
        #[arg(long)]
        volume: Option<u32>,
    },

    /// Render a sentence to a WAV file
    #[command(name = "export")]
    Export {
        /// Sentence in line notation
        sentence: String,

        /// Output file or directory (defaults to a timestamped name in the
        /// current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}
