//! Error handling for Voxline
//!
//! Per-word failures (missing clips, undecodable clips, failed renders) are
//! collected as warnings by the speaker; only a sentence that yields nothing
//! playable is surfaced as an operation error.

use thiserror::Error;

/// Result type alias for Voxline operations
pub type Result<T> = std::result::Result<T, VoxError>;

/// Main error type for Voxline operations
#[derive(Error, Debug)]
pub enum VoxError {
    // Sentence Errors
    #[error("Unrecognized input at {start}..{end}: {text:?}")]
    ParseAmbiguous {
        start: usize,
        end: usize,
        text: String,
    },

    // Sound Errors
    #[error("Sound not found: {key} (tried {} location(s))", .tried.len())]
    SoundNotFound { key: String, tried: Vec<String> },

    #[error("Could not decode {key}: {reason}")]
    DecodeFailure {
        key: String,
        reason: String,
        #[source]
        source: Option<hound::Error>,
    },

    #[error("Could not fetch {location}: {reason}")]
    Fetch { location: String, reason: String },

    // Playback Errors
    #[error("Render failed for word {index} ({key}): {reason}")]
    RenderFailure {
        index: usize,
        key: String,
        reason: String,
    },

    #[error("Couldn't load sounds: {}", .keys.join(", "))]
    MissingSounds { keys: Vec<String> },

    #[error("Sentence contains no words")]
    NothingToPlay,

    #[error("Audio output error: {reason}")]
    Output { reason: String },

    // Configuration Errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VoxError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            VoxError::ParseAmbiguous { .. } => "PARSE_AMBIGUOUS",
            VoxError::SoundNotFound { .. } => "SOUND_NOT_FOUND",
            VoxError::DecodeFailure { .. } => "DECODE_FAILURE",
            VoxError::Fetch { .. } => "FETCH_FAILED",
            VoxError::RenderFailure { .. } => "RENDER_FAILURE",
            VoxError::MissingSounds { .. } => "MISSING_SOUNDS",
            VoxError::NothingToPlay => "NOTHING_TO_PLAY",
            VoxError::Output { .. } => "OUTPUT_ERROR",
            VoxError::InvalidConfig { .. } => "INVALID_CONFIG",
            VoxError::Io(_) => "IO_ERROR",
            VoxError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if this error only affects a single word of a sentence
    ///
    /// Recoverable errors are reported as warnings while the rest of the
    /// sentence keeps playing.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            VoxError::ParseAmbiguous { .. }
                | VoxError::SoundNotFound { .. }
                | VoxError::DecodeFailure { .. }
                | VoxError::Fetch { .. }
                | VoxError::RenderFailure { .. }
        )
    }

    /// The sound key a per-word error refers to, if any
    pub fn sound_key(&self) -> Option<&str> {
        match self {
            VoxError::SoundNotFound { key, .. }
            | VoxError::DecodeFailure { key, .. }
            | VoxError::RenderFailure { key, .. } => Some(key),
            _ => None,
        }
    }
}
