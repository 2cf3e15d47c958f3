use eventboard_core::EntityKey;
use thiserror::Error;

use crate::transport::RemoteError;

/// Errors surfaced to callers. Cache-side faults never appear here; they are
/// logged and reported through [`crate::Outcome`] instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{operation} failed for {key}: {source}")]
    RemoteFailure {
        operation: String,
        key: EntityKey,
        source: RemoteError,
    },

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The background reconciliation of `operation` stopped before reporting,
    /// e.g. because the runtime shut down.
    #[error("{operation} for {key} did not report a result")]
    Abandoned { operation: String, key: EntityKey },
}

impl EngineError {
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::RemoteFailure { source, .. } => Some(source),
            Self::Remote(source) => Some(source),
            Self::Abandoned { .. } => None,
        }
    }
}
