//! Field indexes
//!
//! An indexer maps an object to zero or more string values; `list` can then
//! select objects by `(index, value)` without scanning the whole kind.

use canopy_model::ObjectKey;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

type Extractor = Arc<dyn Fn(&Value) -> Vec<String> + Send + Sync>;

/// A named value extractor
#[derive(Clone)]
pub struct FieldIndexer {
    name: String,
    extract: Extractor,
}

impl FieldIndexer {
    /// Create an indexer from an extractor over the object's JSON form
    pub fn new<F>(name: impl Into<String>, extract: F) -> Self
    where
        F: Fn(&Value) -> Vec<String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            extract: Arc::new(extract),
        }
    }

    /// Index name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Values for an object
    #[must_use]
    pub fn values(&self, obj: &Value) -> Vec<String> {
        (self.extract)(obj)
    }
}

impl fmt::Debug for FieldIndexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldIndexer").field("name", &self.name).finish_non_exhaustive()
    }
}

/// A maintained index: value -> keys
#[derive(Debug)]
pub(crate) struct FieldIndex {
    indexer: FieldIndexer,
    entries: HashMap<String, BTreeSet<ObjectKey>>,
}

impl FieldIndex {
    pub(crate) fn new(indexer: FieldIndexer) -> Self {
        Self {
            indexer,
            entries: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, key: &ObjectKey, obj: &Value) {
        for value in self.indexer.values(obj) {
            self.entries.entry(value).or_default().insert(key.clone());
        }
    }

    pub(crate) fn remove(&mut self, key: &ObjectKey, obj: &Value) {
        for value in self.indexer.values(obj) {
            if let Some(keys) = self.entries.get_mut(&value) {
                keys.remove(key);
                if keys.is_empty() {
                    self.entries.remove(&value);
                }
            }
        }
    }

    pub(crate) fn lookup(&self, value: &str) -> impl Iterator<Item = &ObjectKey> {
        self.entries.get(value).into_iter().flatten()
    }
}

/// Read a label from an object's JSON form
#[must_use]
pub fn label_of<'a>(obj: &'a Value, key: &str) -> Option<&'a str> {
    obj.pointer("/metadata/labels")
        .and_then(|labels| labels.get(key))
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
}

/// Read an annotation from an object's JSON form
#[must_use]
pub fn annotation_of<'a>(obj: &'a Value, key: &str) -> Option<&'a str> {
    obj.pointer("/metadata/annotations")
        .and_then(|annotations| annotations.get(key))
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
}
