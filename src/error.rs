// src/error.rs
use std::time::Duration;

use thiserror::Error;

use crate::source::SourceId;
use crate::store::StoreError;

/// Errors surfaced past component boundaries.
///
/// Per-source fetch failures and per-write storage failures are contained
/// where they happen (worker / reconciler) and only show up here when a
/// caller asked for something directly.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("fetch failed for {source}: {reason}")]
    SourceFetch { source: SourceId, reason: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// A worker did not observe its kill flag within the stop timeout.
    #[error("worker for {source} did not stop within {timeout:?}")]
    ShutdownTimeout { source: SourceId, timeout: Duration },
}

impl PipelineError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}
