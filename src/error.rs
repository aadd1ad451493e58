//! Error types for planwatch.

use std::path::PathBuf;
use thiserror::Error;

use crate::secrets::SecretError;

/// Top-level error type for reconciliation cycles.
#[derive(Error, Debug)]
pub enum Error {
    /// No recognizable requirement structure in the documents.
    #[error("no requirement structure found: {0}")]
    Parse(String),

    /// The repository host could not be queried.
    #[error("repository observation failed: {reason}")]
    Observation { reason: String, transient: bool },

    /// A chat message could not be delivered.
    #[error("notification delivery failed: {reason}")]
    Delivery { reason: String, transient: bool },

    /// The plan could not be loaded or written.
    #[error("failed to persist plan at {path}: {reason}")]
    Persistence { path: PathBuf, reason: String },

    /// Missing or invalid startup configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Secret resolution failed.
    #[error(transparent)]
    Secret(#[from] SecretError),

    /// IO error outside of plan persistence.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Builds a transient observation error (timeouts, spawn failures).
    pub fn observation_transient(reason: impl Into<String>) -> Self {
        Error::Observation {
            reason: reason.into(),
            transient: true,
        }
    }

    /// Builds a permanent observation error.
    pub fn observation(reason: impl Into<String>) -> Self {
        Error::Observation {
            reason: reason.into(),
            transient: false,
        }
    }

    /// Builds a transient delivery error (network, rate limits, 5xx).
    pub fn delivery_transient(reason: impl Into<String>) -> Self {
        Error::Delivery {
            reason: reason.into(),
            transient: true,
        }
    }

    /// Builds a permanent delivery error (auth, unknown channel, bad payload).
    pub fn delivery(reason: impl Into<String>) -> Self {
        Error::Delivery {
            reason: reason.into(),
            transient: false,
        }
    }

    /// Builds a persistence error for the given path.
    pub fn persistence(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Error::Persistence {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true if retrying the failed call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Observation { transient, .. } | Error::Delivery { transient, .. } => *transient,
            _ => false,
        }
    }

    /// Returns true for the kinds that abort a cycle or the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Persistence { .. } | Error::Configuration(_))
    }
}

/// Result type alias for planwatch operations.
pub type Result<T> = std::result::Result<T, Error>;
