//! Error types for Liaison Core

use thiserror::Error;

use crate::registry::SessionStatus;

/// Result type alias using Liaison Error
pub type Result<T> = std::result::Result<T, Error>;

/// Liaison error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("no session is within the auto-continue window")]
    Ambiguous,

    #[error("unknown session: {0}")]
    NotFound(String),

    #[error("session is busy: {0}")]
    Busy(String),

    #[error("invalid status transition for {key}: {from:?} -> {to:?}")]
    InvalidTransition {
        key: String,
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("permission denied for action: {0}")]
    PermissionDenied(String),

    #[error("process failure: {0}")]
    Process(String),

    #[error("turn timed out after {0} seconds")]
    Timeout(u64),

    #[error("notifier error: {0}")]
    Notify(String),

    #[error("transcription error: {0}")]
    Transcribe(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
