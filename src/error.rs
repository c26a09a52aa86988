use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::SessionState;

/// Failures reported by a position source while subscribed
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceErrorKind {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Location unavailable")]
    PositionUnavailable,

    #[error("GPS timeout")]
    Timeout,
}

/// Tracker error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("No position source available: {0}")]
    SourceUnavailable(String),

    #[error("Cannot {action} while {from:?}")]
    InvalidStateTransition {
        from: SessionState,
        action: &'static str,
    },

    #[error("Position source failed: {0}")]
    Source(SourceErrorKind),

    #[error("Replay error: {0}")]
    Replay(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<SourceErrorKind> for TrackerError {
    fn from(kind: SourceErrorKind) -> Self {
        TrackerError::Source(kind)
    }
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;
