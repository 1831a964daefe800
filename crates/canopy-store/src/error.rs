//! Store error types

use canopy_model::{GroupVersionKind, ModelError, ObjectKey};

/// Errors returned by [`crate::ObjectStore`] operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Object does not exist
    #[error("{kind} {key} not found")]
    NotFound {
        /// Kind name
        kind: String,
        /// Object key
        key: ObjectKey,
    },

    /// Object already exists
    #[error("{kind} {key} already exists")]
    AlreadyExists {
        /// Kind name
        kind: String,
        /// Object key
        key: ObjectKey,
    },

    /// Optimistic-concurrency or field-ownership conflict
    #[error("conflict on {key}: {reason}")]
    Conflict {
        /// Object key
        key: ObjectKey,
        /// What conflicted
        reason: String,
    },

    /// Kind is not served by the store
    #[error("kind {0} is not served")]
    UnknownKind(GroupVersionKind),

    /// Malformed request or object
    #[error("invalid request: {0}")]
    Invalid(String),

    /// Operation refused by the store
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Write rejected by an admission check
    #[error("admission webhook denied the request: {0}")]
    Admission(String),

    /// Transient failure
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// JSON conversion failed
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Build a not-found error
    pub fn not_found(gvk: &GroupVersionKind, key: &ObjectKey) -> Self {
        Self::NotFound {
            kind: gvk.kind.clone(),
            key: key.clone(),
        }
    }

    /// Build a version conflict
    pub fn conflict(key: &ObjectKey, reason: impl Into<String>) -> Self {
        Self::Conflict {
            key: key.clone(),
            reason: reason.into(),
        }
    }

    /// Check for [`StoreError::NotFound`]
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check for [`StoreError::AlreadyExists`]
    #[inline]
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Check for [`StoreError::Conflict`]
    #[inline]
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Check if retrying the same request may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::AlreadyExists { .. } | Self::Unavailable(_)
        )
    }
}

impl From<ModelError> for StoreError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Serialization(e) => Self::Serialization(e),
            other => Self::Invalid(other.to_string()),
        }
    }
}

/// Turn [`StoreError::NotFound`] into `Ok(None)`
///
/// # Errors
/// Passes every other error through.
pub fn ignore_not_found<T>(result: Result<T, StoreError>) -> Result<Option<T>, StoreError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
