//! The object store API
//!
//! [`ObjectStore`] is object-safe and speaks JSON; [`ObjectStoreExt`] layers
//! typed access on top through serde.

use crate::error::StoreError;
use crate::index::FieldIndexer;
use async_trait::async_trait;
use canopy_model::{GroupVersionKind, Object, ObjectKey};
use futures::stream::BoxStream;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Stream of change notifications for one kind
pub type WatchStream = BoxStream<'static, WatchEvent>;

/// A change notification
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// Object was created
    Added(Value),
    /// Object changed
    Modified {
        /// State before the write
        old: Value,
        /// State after the write
        new: Value,
    },
    /// Object was removed; delivered with `deletionPending` set
    Deleted(Value),
    /// The watcher fell behind and missed events; consumers should relist
    Desynced,
}

impl WatchEvent {
    /// Latest known state of the object, if any
    #[must_use]
    pub fn object(&self) -> Option<&Value> {
        match self {
            Self::Added(obj) | Self::Deleted(obj) | Self::Modified { new: obj, .. } => Some(obj),
            Self::Desynced => None,
        }
    }

    /// Previous state, only for modifications
    #[must_use]
    pub fn old_object(&self) -> Option<&Value> {
        match self {
            Self::Modified { old, .. } => Some(old),
            _ => None,
        }
    }
}

/// Filter for [`ObjectStore::list_json`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    /// Restrict to one namespace-scope
    pub namespace: Option<String>,
    /// Restrict to objects whose field index `.0` yields value `.1`
    pub field: Option<(String, String)>,
}

impl ListParams {
    /// Restrict to a namespace-scope
    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Restrict to an index match
    #[must_use]
    pub fn matching(mut self, index: impl Into<String>, value: impl Into<String>) -> Self {
        self.field = Some((index.into(), value.into()));
        self
    }
}

/// Operations subject to permission checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Verb {
    /// Read one object
    Get,
    /// Read many objects
    List,
    /// Subscribe to changes
    Watch,
    /// Create objects
    Create,
    /// Replace objects
    Update,
    /// Patch objects
    Patch,
    /// Delete objects
    Delete,
}

impl Verb {
    /// Verbs the controller needs on every watched kind
    pub const PROPAGATION: [Self; 6] = [
        Self::Get,
        Self::List,
        Self::Watch,
        Self::Create,
        Self::Patch,
        Self::Delete,
    ];

    /// Lowercase verb name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::List => "list",
            Self::Watch => "watch",
            Self::Create => "create",
            Self::Update => "update",
            Self::Patch => "patch",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discovery information about a served kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindInfo {
    /// Whether objects live inside a namespace-scope
    pub namespaced: bool,
}

/// Declarative label/annotation apply under a field manager
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataApply {
    /// Field manager identity
    pub manager: String,
    /// Every label the manager wants to own
    pub labels: BTreeMap<String, String>,
    /// Every annotation the manager wants to own
    pub annotations: BTreeMap<String, String>,
    /// Take ownership of keys other managers hold with different values
    pub force: bool,
    /// Require this resource version
    pub resource_version: Option<u64>,
}

impl MetadataApply {
    /// Empty apply for `manager`
    #[must_use]
    pub fn new(manager: impl Into<String>) -> Self {
        Self {
            manager: manager.into(),
            ..Self::default()
        }
    }

    /// Force ownership
    #[must_use]
    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

/// The object store
///
/// All components express their logic in terms of this trait. Objects are
/// exchanged in their JSON form, keyed by kind and [`ObjectKey`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Register a field index for `gvk`; an existing index of the same name is kept
    ///
    /// # Errors
    /// Returns [`StoreError::UnknownKind`] for kinds that are not served.
    fn register_index(&self, gvk: &GroupVersionKind, indexer: FieldIndexer) -> Result<(), StoreError>;

    /// Subscribe to changes of a kind
    ///
    /// # Errors
    /// Returns [`StoreError::UnknownKind`] for kinds that are not served.
    fn watch(&self, gvk: &GroupVersionKind) -> Result<WatchStream, StoreError>;

    /// Read one object
    async fn get_json(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<Value, StoreError>;

    /// List objects
    async fn list_json(&self, gvk: &GroupVersionKind, params: &ListParams) -> Result<Vec<Value>, StoreError>;

    /// Create an object, recording `manager` as owner of its metadata keys
    async fn create_json(&self, gvk: &GroupVersionKind, obj: Value, manager: &str) -> Result<Value, StoreError>;

    /// Replace an object; its `resourceVersion` must match the stored one
    async fn update_json(&self, gvk: &GroupVersionKind, obj: Value, manager: &str) -> Result<Value, StoreError>;

    /// Apply an RFC 7386 merge patch
    async fn merge_patch(
        &self,
        gvk: &GroupVersionKind,
        key: &ObjectKey,
        patch: &Value,
        resource_version: Option<u64>,
        manager: &str,
    ) -> Result<Value, StoreError>;

    /// Declaratively apply labels and annotations
    async fn apply_metadata(
        &self,
        gvk: &GroupVersionKind,
        key: &ObjectKey,
        apply: &MetadataApply,
    ) -> Result<Value, StoreError>;

    /// Request deletion; objects with finalizers linger as `deletionPending`
    async fn delete(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<(), StoreError>;

    /// Discovery: `None` if the kind is not served
    async fn resolve_kind(&self, gvk: &GroupVersionKind) -> Result<Option<KindInfo>, StoreError>;

    /// Permission self-check
    async fn access_allowed(&self, gvk: &GroupVersionKind, verb: Verb) -> Result<bool, StoreError>;
}

/// Typed access on top of [`ObjectStore`]
#[async_trait]
pub trait ObjectStoreExt: ObjectStore {
    /// Read and decode one object
    async fn get<T: Object>(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<T, StoreError> {
        Ok(serde_json::from_value(self.get_json(gvk, key).await?)?)
    }

    /// Read one object, `None` if absent
    async fn get_opt<T: Object>(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<Option<T>, StoreError> {
        crate::error::ignore_not_found(self.get::<T>(gvk, key).await)
    }

    /// List and decode objects
    async fn list<T: Object>(&self, gvk: &GroupVersionKind, params: &ListParams) -> Result<Vec<T>, StoreError> {
        self.list_json(gvk, params)
            .await?
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(StoreError::from))
            .collect()
    }

    /// Encode and create
    async fn create<T: Object>(&self, gvk: &GroupVersionKind, obj: &T, manager: &str) -> Result<T, StoreError> {
        let value = to_object_json(gvk, obj)?;
        Ok(serde_json::from_value(self.create_json(gvk, value, manager).await?)?)
    }

    /// Encode and replace
    async fn update<T: Object>(&self, gvk: &GroupVersionKind, obj: &T, manager: &str) -> Result<T, StoreError> {
        let value = to_object_json(gvk, obj)?;
        Ok(serde_json::from_value(self.update_json(gvk, value, manager).await?)?)
    }

    /// Merge-patch and decode the result
    async fn patch<T: Object>(
        &self,
        gvk: &GroupVersionKind,
        key: &ObjectKey,
        patch: &Value,
        resource_version: Option<u64>,
        manager: &str,
    ) -> Result<T, StoreError> {
        let value = self.merge_patch(gvk, key, patch, resource_version, manager).await?;
        Ok(serde_json::from_value(value)?)
    }
}

impl<S: ObjectStore + ?Sized> ObjectStoreExt for S {}

/// Serialize a typed object, stamping `apiVersion` and `kind`
///
/// # Errors
/// Returns [`StoreError::Invalid`] if the object does not serialize to a map.
pub fn to_object_json<T: Object>(gvk: &GroupVersionKind, obj: &T) -> Result<Value, StoreError> {
    let mut value = serde_json::to_value(obj)?;
    let map = value
        .as_object_mut()
        .ok_or_else(|| StoreError::Invalid("object must serialize to a map".to_string()))?;
    map.insert("apiVersion".to_string(), Value::String(gvk.api_version()));
    map.insert("kind".to_string(), Value::String(gvk.kind.clone()));
    Ok(value)
}
