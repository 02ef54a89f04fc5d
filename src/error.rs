//! Error types shared by the analysis, playback and squeeze components.
//!
//! Cancellation is not represented here: a cancelled run is a normal outcome
//! and is reported through the run's result type instead.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The source could not be opened or decoded. Fatal to one analysis only.
    #[error("Source unavailable '{source_id}': {reason}")]
    SourceUnavailable { source_id: String, reason: String },

    #[error("No audio track in '{source_id}'")]
    NoAudioTrack { source_id: String },

    /// Probe tone or loopback capture could not be started.
    #[error("Audio hardware unavailable: {0}")]
    HardwareUnavailable(String),

    /// A singleton resource is already held by another session.
    #[error("{0} is busy")]
    Busy(&'static str),

    #[error("No beat timeline loaded")]
    NoTimeline,

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Bad timeline file '{path}': {reason}")]
    Timeline { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Errors scoped to a single file: a batch logs them and moves on.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            Error::SourceUnavailable { .. } | Error::NoAudioTrack { .. } | Error::Timeline { .. }
        )
    }

    pub fn source_unavailable(source_id: impl Into<String>, reason: impl ToString) -> Self {
        Error::SourceUnavailable {
            source_id: source_id.into(),
            reason: reason.to_string(),
        }
    }
}
