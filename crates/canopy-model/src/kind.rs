//! Group/version/kind identifiers

use crate::error::ModelError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a resource kind served by the object store
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(deny_unknown_fields)]
pub struct GroupVersionKind {
    /// API group, empty for the core group
    #[serde(default)]
    pub group: String,
    /// API version
    pub version: String,
    /// Kind name
    pub kind: String,
}

impl GroupVersionKind {
    /// Create new identifier
    #[inline]
    #[must_use]
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Parse from the `apiVersion` + `kind` pair found on objects
    ///
    /// # Errors
    /// Returns [`ModelError::InvalidApiVersion`] for empty or multi-slash versions.
    pub fn from_api_version(api_version: &str, kind: &str) -> Result<Self, ModelError> {
        let mut parts = api_version.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(version), None, None) if !version.is_empty() => Ok(Self::new("", version, kind)),
            (Some(group), Some(version), None) if !group.is_empty() && !version.is_empty() => {
                Ok(Self::new(group, version, kind))
            }
            _ => Err(ModelError::InvalidApiVersion(api_version.to_string())),
        }
    }

    /// `group/version`, or just `version` for the core group
    #[must_use]
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_core_and_grouped_versions() {
        let core = GroupVersionKind::from_api_version("v1", "ConfigMap").unwrap();
        assert_eq!(core, GroupVersionKind::new("", "v1", "ConfigMap"));
        assert_eq!(core.api_version(), "v1");

        let grouped = GroupVersionKind::from_api_version("rbac.authorization.k8s.io/v1", "Role").unwrap();
        assert_eq!(grouped.group, "rbac.authorization.k8s.io");
        assert_eq!(grouped.api_version(), "rbac.authorization.k8s.io/v1");
    }

    #[test]
    fn rejects_malformed_versions() {
        assert!(GroupVersionKind::from_api_version("", "Foo").is_err());
        assert!(GroupVersionKind::from_api_version("a/b/c", "Foo").is_err());
        assert!(GroupVersionKind::from_api_version("/v1", "Foo").is_err());
    }

    #[test]
    fn display_matches_wire_format() {
        let gvk = GroupVersionKind::new("", "v1", "Secret");
        assert_eq!(gvk.to_string(), "v1, Kind=Secret");
    }
}
