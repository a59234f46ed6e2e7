//! Speaker configuration
//!
//! Loaded from a JSON file; every field is optional and falls back to the
//! stock Half-Life layout (`valve_sound/vox/*.wav`).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VoxError};
use crate::sentence::DEFAULT_PATH;

/// Default search path for clip files.
pub const DEFAULT_SOUND_PATH: &str = "valve_sound/";
/// Sample rate of exported recordings.
pub const DEFAULT_EXPORT_SAMPLE_RATE: u32 = 22050;
/// Prefix of suggested export filenames.
pub const DEFAULT_FILENAME_PREFIX: &str = "sentences recording";

/// Settings for a [`Speaker`](crate::engine::Speaker).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeakerConfig {
    /// Directory the search paths are resolved against.
    pub sound_root: PathBuf,

    /// Prefixes tried in order when locating `<path><sound key>.wav`.
    pub sound_paths: Vec<String>,

    /// Directory prefix for words before any path directive.
    pub default_path: String,

    /// Sample rate of offline renders, in Hz.
    pub export_sample_rate: u32,

    /// Master volume, 0-100.
    pub volume: u32,

    /// Prefix of suggested export filenames.
    pub filename_prefix: String,
}

impl Default for SpeakerConfig {
    fn default() -> Self {
        Self {
            sound_root: PathBuf::from("."),
            sound_paths: vec![DEFAULT_SOUND_PATH.to_string()],
            default_path: DEFAULT_PATH.to_string(),
            export_sample_rate: DEFAULT_EXPORT_SAMPLE_RATE,
            volume: 100,
            filename_prefix: DEFAULT_FILENAME_PREFIX.to_string(),
        }
    }
}

impl SpeakerConfig {
    /// Load and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: SpeakerConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would make every request fail.
    pub fn validate(&self) -> Result<()> {
        if self.sound_paths.is_empty() {
            return Err(VoxError::InvalidConfig {
                reason: "sound_paths must not be empty".to_string(),
            });
        }
        if self.export_sample_rate == 0 {
            return Err(VoxError::InvalidConfig {
                reason: "export_sample_rate must be positive".to_string(),
            });
        }
        if self.volume > 100 {
            return Err(VoxError::InvalidConfig {
                reason: format!("volume {} is above 100", self.volume),
            });
        }
        Ok(())
    }
}
