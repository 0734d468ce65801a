//! Error types for run-fatal failures.
//!
//! Per-record fetch failures never surface here: they are recorded on the
//! record as a [`FetchStatus`](crate::model::FetchStatus) and the run goes
//! on. Only the variants below stop a pass.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the crate error type.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Remaining API quota is below the safety floor.
    #[error("API quota too low: {remaining} calls left (floor {floor}), resets at {reset_at}")]
    QuotaExhausted {
        remaining: u64,
        floor: u64,
        reset_at: DateTime<Utc>,
    },

    /// Quota could not be queried and the guard is configured to fail closed.
    #[error("Could not query API quota: {0}")]
    QuotaUnavailable(String),

    #[error("Record store not found: {}", .0.display())]
    StoreMissing(PathBuf),

    #[error("Failed to read record store {}: {source}", path.display())]
    StoreRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse record store {}: {source}", path.display())]
    StoreParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write {}: {source}", path.display())]
    StoreWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A source catalog or analysis document could not be used.
    #[error("Invalid document {}: {message}", path.display())]
    Document { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn document(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Document {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether this error came from the quota guard rather than local I/O.
    pub fn is_quota(&self) -> bool {
        matches!(self, Error::QuotaExhausted { .. } | Error::QuotaUnavailable(_))
    }
}
