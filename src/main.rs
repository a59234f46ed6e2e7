//! Voxline CLI - Sentence Speaker
//!
//! Command-line interface for the Voxline sentence speaker.

use clap::Parser;
use env_logger::Env;
use log::debug;

use voxline::cli::{commands, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    debug!("Voxline v{}", env!("CARGO_PKG_VERSION"));

    let config = commands::load_config(&cli)?;
    match cli.command {
        Some(Commands::Parse { sentence, json }) => commands::parse(&config, &sentence, json),
        Some(Commands::Speak { sentence, volume }) => {
            commands::speak(config, &sentence, volume).await
        }
        Some(Commands::Export { sentence, output }) => {
            commands::export(config, &sentence, output.as_deref()).await
        }
        None => {
            println!("Voxline v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}
