//! Error types for the canopy object model
//!
//! Covers:
//! - Malformed identifiers and key patterns
//! - Configuration loading and validation (all fatal at startup)

use crate::kind::GroupVersionKind;
use std::path::PathBuf;

/// Errors raised while building or converting model objects
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// `apiVersion` is empty or has too many segments
    #[error("invalid apiVersion: '{0}'")]
    InvalidApiVersion(String),

    /// Glob pattern could not be compiled
    #[error("malformed pattern '{pattern}': {reason}")]
    MalformedPattern {
        /// Offending pattern
        pattern: String,
        /// What is wrong with it
        reason: String,
    },

    /// Object could not be converted to or from its JSON form
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration errors
///
/// Every variant is fatal: the control loop does not start with an invalid
/// configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid YAML for [`crate::Config`]
    #[error("unable to load the configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A glob in one of the key lists is malformed
    #[error("malformed pattern for {field} {pattern}: {reason}")]
    MalformedPattern {
        /// Config field name
        field: &'static str,
        /// Offending pattern
        pattern: String,
        /// What is wrong with it
        reason: String,
    },

    /// An allowlist entry targets the reserved marker prefix
    #[error("misconfigured {field}: {key} is not allowed")]
    ReservedKey {
        /// Config field name
        field: &'static str,
        /// Offending key pattern
        key: String,
    },

    /// A naming policy root pattern is not a valid regex
    #[error("invalid naming policy '{root}': {source}")]
    InvalidNamingPolicy {
        /// Offending root pattern
        root: String,
        /// Regex compile error
        #[source]
        source: regex::Error,
    },

    /// A watched kind is unknown to the store
    #[error("invalid gvk {0}: kind is not served")]
    UnknownKind(GroupVersionKind),

    /// A watched kind is cluster-scoped
    #[error("{0} is not namespace-scoped")]
    ClusterScoped(GroupVersionKind),

    /// The controller lacks permissions on watched kinds
    #[error("missing permissions: {}", .0.join(", "))]
    MissingPermissions(Vec<String>),

    /// Discovery or permission checks failed
    #[error("failed to validate watched kinds: {0}")]
    Discovery(String),
}

impl ConfigError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::ReservedKey {
            field: "labelKeys",
            key: "canopy.dev/type".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "misconfigured labelKeys: canopy.dev/type is not allowed"
        );

        let err = ConfigError::MissingPermissions(vec![
            "missing permission to get configmaps".to_string(),
            "missing permission to delete configmaps".to_string(),
        ]);
        assert!(err.to_string().contains("get configmaps, missing"));
    }

    #[test]
    fn cluster_scoped_display() {
        let gvk = GroupVersionKind::new("rbac.authorization.k8s.io", "v1", "ClusterRole");
        let err = ConfigError::ClusterScoped(gvk);
        assert_eq!(
            err.to_string(),
            "rbac.authorization.k8s.io/v1, Kind=ClusterRole is not namespace-scoped"
        );
    }
}
