//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};

use crate::config::SpeakerConfig;
use crate::engine::{EngineEvent, NullSink, OutputSink, PlaybackEnd, Speaker};
use crate::error::VoxError;
use crate::sentence::SentenceParser;

use super::Cli;

/// Build the effective configuration from the config file and flags.
pub fn load_config(cli: &Cli) -> Result<SpeakerConfig> {
    let mut config = match &cli.config {
        Some(path) => SpeakerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SpeakerConfig::default(),
    };

    if let Some(root) = &cli.sound_root {
        config.sound_root = root.clone();
    }
    if !cli.sound_paths.is_empty() {
        config.sound_paths = cli.sound_paths.clone();
    }

    config.validate()?;
    Ok(config)
}

/// Print the word list of a sentence.
pub fn parse(config: &SpeakerConfig, sentence: &str, json: bool) -> Result<()> {
    let parser = SentenceParser::new().with_default_path(config.default_path.clone());
    let words = parser.parse(sentence);

    if json {
        println!("{}", serde_json::to_string_pretty(&words)?);
        return Ok(());
    }

    if words.is_empty() {
        println!("No words.");
        return Ok(());
    }

    for (i, word) in words.iter().enumerate() {
        println!("{:>3}  {:<24} {}", i, word.sound_key, word.modifier);
    }

    Ok(())
}

/// Play a sentence and wait for it to finish.
pub async fn speak(config: SpeakerConfig, sentence: &str, volume: Option<u32>) -> Result<()> {
    let speaker = Speaker::from_config(config, open_sink()?);
    speaker.subscribe(log_event);
    if let Some(volume) = volume {
        speaker.set_volume(volume);
    }

    let playback = speaker.speak(sentence).await?;
    report_warnings(playback.warnings());
    println!(
        "Playing {} word(s), {:.2}s",
        playback.word_count(),
        playback.duration_secs()
    );

    let outcome = tokio::select! {
        outcome = playback.finished() => outcome,
        _ = tokio::signal::ctrl_c() => {
            speaker.stop();
            PlaybackEnd::Cancelled
        }
    };

    speaker.shutdown();
    if outcome == PlaybackEnd::Cancelled {
        println!("Stopped.");
    }
    Ok(())
}

/// Render a sentence and write it as a WAV file.
pub async fn export(config: SpeakerConfig, sentence: &str, output: Option<&Path>) -> Result<()> {
    let sink = Arc::new(NullSink::new(config.export_sample_rate));
    let speaker = Speaker::from_config(config, sink);
    speaker.subscribe(log_event);

    let export = speaker.record_and_export(sentence).await?;
    report_warnings(&export.warnings);

    let path = output_path(output, &export.filename);
    fs::write(&path, &export.bytes)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    info!("wrote {} bytes", export.bytes.len());
    println!("Exported: {}", path.display());
    Ok(())
}

fn output_path(output: Option<&Path>, filename: &str) -> PathBuf {
    match output {
        Some(path) if path.is_dir() => path.join(filename),
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(filename),
    }
}

#[cfg(feature = "device")]
fn open_sink() -> Result<Arc<dyn OutputSink>> {
    let sink = crate::engine::DeviceSink::open().context("Failed to open audio output")?;
    Ok(Arc::new(sink))
}

#[cfg(not(feature = "device"))]
fn open_sink() -> Result<Arc<dyn OutputSink>> {
    warn!("built without the `device` feature; playback is silent");
    Ok(Arc::new(NullSink::new(44100)))
}

fn report_warnings(warnings: &[VoxError]) {
    for warning in warnings {
        warn!("[{}] {}", warning.error_code(), warning);
    }
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::Error { message } => warn!("{}", message),
        other => info!("{:?}", other),
    }
}
