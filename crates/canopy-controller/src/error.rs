//! Error types for the reconcile loops
//!
//! Nothing here reaches the author of the write that triggered a reconcile:
//! retryable errors are requeued with backoff, the rest are logged.

use canopy_hierarchy::HierarchyError;
use canopy_model::{ConfigError, ModelError};
use canopy_store::StoreError;

/// Errors raised by a reconcile pass
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Hierarchy lookup failed
    #[error("hierarchy error: {0}")]
    Hierarchy(#[from] HierarchyError),

    /// Object could not be interpreted
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// A scope the reconcile depends on does not exist (yet)
    #[error("scope {0} does not exist")]
    MissingScope(String),

    /// Deleting the scope materialized by an intent failed
    #[error("failed to finalize {intent}: {source}")]
    Finalization {
        /// Intent key
        intent: String,
        /// Underlying error
        #[source]
        source: StoreError,
    },

    /// Stepped reconciles did not settle
    #[error("not quiescent after {0} rounds")]
    NotQuiescent(usize),
}

impl ReconcileError {
    /// Check if the key should be requeued with backoff
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::Hierarchy(HierarchyError::Lookup(e)) => e.is_retryable(),
            Self::Hierarchy(_) | Self::MissingScope(_) | Self::Finalization { .. } => true,
            Self::Model(_) | Self::NotQuiescent(_) => false,
        }
    }
}

/// Errors that stop the manager from starting
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// Configuration is invalid for this store
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Store refused a setup call
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_model::ObjectKey;

    #[test]
    fn retryable_classification() {
        let conflict = StoreError::conflict(&ObjectKey::cluster("a"), "stale");
        assert!(ReconcileError::from(conflict).is_retryable());
        assert!(!ReconcileError::from(StoreError::Forbidden("no".into())).is_retryable());
        assert!(ReconcileError::MissingScope("a".into()).is_retryable());
        assert!(ReconcileError::Finalization {
            intent: "r/a".into(),
            source: StoreError::Admission("child namespaces exist".into()),
        }
        .is_retryable());
        assert!(!ReconcileError::NotQuiescent(3).is_retryable());
    }
}
