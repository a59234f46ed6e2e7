//! Voxline - Line-Notation Sentence Speaker
//!
//! Voxline speaks sentences by concatenating pre-recorded word clips, in the
//! style of the Half-Life VOX announcer:
//!
//! ```text
//! hello, . fvox/ beep(p120 v50) (t30) warning
//! ```
//!
//! # Architecture
//!
//! - `sentence`: the line notation (path directives, words, modifier blocks)
//! - `engine`: clip cache, trim/time-compression transform, live and offline
//!   scheduling, WAV export and the `Speaker` facade
//! - `config`: JSON speaker settings
//! - `cli`: the `voxline` command line

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod sentence;

pub use config::SpeakerConfig;
pub use engine::Speaker;
pub use error::{Result, VoxError};
pub use sentence::{parse_sentence, Modifier, WordToken};
