//! Object metadata shared by every stored kind

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Standard metadata carried by every stored object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Object name, unique per kind and namespace
    pub name: String,

    /// Owning namespace-scope, `None` for cluster-scoped kinds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Server-assigned unique id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Optimistic-concurrency token, bumped on every committed change
    #[serde(default)]
    pub resource_version: u64,

    /// Bumped when anything outside metadata and status changes
    #[serde(default)]
    pub generation: i64,

    /// Selector-indexed labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Free-form annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Finalizers blocking removal
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,

    /// Owners of this object
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,

    /// Deletion has been requested but finalizers are still present
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deletion_pending: bool,

    /// Field ownership records
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub managed_fields: Vec<ManagedFieldsEntry>,
}

impl ObjectMeta {
    /// Metadata for a cluster-scoped object
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Metadata for a namespaced object
    #[must_use]
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
            ..Self::default()
        }
    }

    /// Label value, treating empty strings as absent
    #[inline]
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// Annotation value, treating empty strings as absent
    #[inline]
    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Check for a finalizer
    #[inline]
    #[must_use]
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Remove a finalizer, returning whether it was present
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        before != self.finalizers.len()
    }

    /// The owner reference flagged as controller, if any
    #[must_use]
    pub fn controller_owner(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|o| o.controller)
    }

    /// Store key of this object
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

/// Reference from a generated object to its owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    /// Owner `apiVersion`
    pub api_version: String,
    /// Owner kind
    pub kind: String,
    /// Owner name (same namespace)
    pub name: String,
    /// Owner uid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Whether the owner is the managing controller
    #[serde(default)]
    pub controller: bool,
}

/// How a manager last wrote its fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldOperation {
    /// Declarative apply; owned keys are retracted when no longer asserted
    Apply,
    /// Imperative update; ownership is recorded but never retracted
    Update,
}

/// Label and annotation keys owned by one manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedFieldsEntry {
    /// Manager identity
    pub manager: String,
    /// Operation that produced the ownership
    pub operation: FieldOperation,
    /// Owned label keys
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub labels: BTreeSet<String>,
    /// Owned annotation keys
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub annotations: BTreeSet<String>,
}

impl ManagedFieldsEntry {
    /// Empty ownership record
    #[must_use]
    pub fn new(manager: impl Into<String>, operation: FieldOperation) -> Self {
        Self {
            manager: manager.into(),
            operation,
            labels: BTreeSet::new(),
            annotations: BTreeSet::new(),
        }
    }

    /// Check if this record owns nothing
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.annotations.is_empty()
    }
}

/// Identity of a stored object within its kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    /// Namespace, `None` for cluster-scoped kinds
    pub namespace: Option<String>,
    /// Name
    pub name: String,
}

impl ObjectKey {
    /// Key of a cluster-scoped object
    #[must_use]
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Key of a namespaced object
    #[must_use]
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// A typed object the store can hold
///
/// The store keeps objects in their JSON form; typed access goes through serde.
pub trait Object: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Object metadata
    fn meta(&self) -> &ObjectMeta;

    /// Mutable object metadata
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    /// Object name
    #[inline]
    fn name(&self) -> &str {
        &self.meta().name
    }

    /// Store key
    #[inline]
    fn key(&self) -> ObjectKey {
        self.meta().key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_values_read_as_absent() {
        let mut meta = ObjectMeta::named("a");
        meta.labels.insert("x".into(), String::new());
        meta.annotations.insert("y".into(), "1".into());
        assert_eq!(meta.label("x"), None);
        assert_eq!(meta.annotation("y"), Some("1"));
    }

    #[test]
    fn finalizer_bookkeeping() {
        let mut meta = ObjectMeta::namespaced("root", "child");
        meta.finalizers.push("f".into());
        assert!(meta.has_finalizer("f"));
        assert!(meta.remove_finalizer("f"));
        assert!(!meta.remove_finalizer("f"));
    }

    #[test]
    fn key_display() {
        assert_eq!(ObjectKey::namespaced("a", "b").to_string(), "a/b");
        assert_eq!(ObjectKey::cluster("a").to_string(), "a");
    }

    #[test]
    fn default_fields_are_not_serialized() {
        let json = serde_json::to_value(ObjectMeta::named("a")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "a", "resourceVersion": 0, "generation": 0})
        );
    }
}
