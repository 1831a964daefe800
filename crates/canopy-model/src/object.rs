//! Untyped objects of watched, propagated kinds

use crate::error::ModelError;
use crate::kind::GroupVersionKind;
use crate::markers;
use crate::meta::{Object, ObjectMeta};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Propagation mode declared by the `propagate` annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropagateMode {
    /// Provision once, never overwrite
    Create,
    /// Keep continuously in sync, cascade deletion
    Update,
}

impl PropagateMode {
    /// Parse an annotation value
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            markers::PROPAGATE_CREATE => Some(Self::Create),
            markers::PROPAGATE_UPDATE => Some(Self::Update),
            _ => None,
        }
    }

    /// Annotation value
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => markers::PROPAGATE_CREATE,
            Self::Update => markers::PROPAGATE_UPDATE,
        }
    }
}

impl fmt::Display for PropagateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an object sits in the propagation graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropagationState<'a> {
    /// Not a copy; `mode` is its own propagation request, if any
    Origin {
        /// Declared mode
        mode: Option<PropagateMode>,
    },
    /// A copy made from `source`
    Copy {
        /// Source scope
        source: &'a str,
        /// Mode inherited from the origin
        mode: Option<PropagateMode>,
    },
}

/// Any instance of a watched kind
///
/// Only metadata is interpreted; the rest of the body is kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicObject {
    /// `group/version`
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    /// Kind name
    pub kind: String,
    /// Standard metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Server-managed status, never propagated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
    /// Everything else (`spec`, `data`, ...)
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl DynamicObject {
    /// Create an empty object of `gvk`
    #[must_use]
    pub fn new(gvk: &GroupVersionKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            api_version: gvk.api_version(),
            kind: gvk.kind.clone(),
            metadata: ObjectMeta::namespaced(namespace, name),
            status: None,
            data: Map::new(),
        }
    }

    /// Set a top-level body field
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Add a label
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    /// Add an annotation
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.annotations.insert(key.into(), value.into());
        self
    }

    /// Request propagation
    #[must_use]
    pub fn with_propagate(self, mode: PropagateMode) -> Self {
        self.with_annotation(markers::ANN_PROPAGATE, mode.as_str())
    }

    /// Kind identifier
    ///
    /// # Errors
    /// Returns error if `apiVersion` is malformed.
    pub fn gvk(&self) -> Result<GroupVersionKind, ModelError> {
        GroupVersionKind::from_api_version(&self.api_version, &self.kind)
    }

    /// Namespace-scope the object lives in
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// Declared propagation mode
    #[must_use]
    pub fn propagate_mode(&self) -> Option<PropagateMode> {
        self.metadata
            .annotation(markers::ANN_PROPAGATE)
            .and_then(PropagateMode::parse)
    }

    /// Whether a `propagate` annotation is present, valid or not
    #[must_use]
    pub fn declares_propagate(&self) -> bool {
        self.metadata.annotations.contains_key(markers::ANN_PROPAGATE)
    }

    /// Source scope of a copy
    #[must_use]
    pub fn source_scope(&self) -> Option<&str> {
        self.metadata.annotation(markers::ANN_FROM)
    }

    /// Whether a `from` annotation is present, even empty
    #[must_use]
    pub fn declares_source(&self) -> bool {
        self.metadata.annotations.contains_key(markers::ANN_FROM)
    }

    /// Whether the owner check already concluded "not generated"
    #[must_use]
    pub fn marked_not_generated(&self) -> bool {
        self.metadata.annotation(markers::ANN_GENERATED) == Some(markers::NOT_GENERATED)
    }

    /// Classify as origin or copy
    #[must_use]
    pub fn propagation_state(&self) -> PropagationState<'_> {
        let mode = self.propagate_mode();
        match self.source_scope() {
            Some(source) => PropagationState::Copy { source, mode },
            None => PropagationState::Origin { mode },
        }
    }

    /// Whether the controller should look at this object at all
    ///
    /// Objects carrying propagation markers are always interesting; other
    /// objects only while they have a controller owner whose propagation
    /// setting has not been checked yet.
    #[must_use]
    pub fn is_propagation_candidate(&self) -> bool {
        if self.declares_source() || self.declares_propagate() {
            return true;
        }
        if self.marked_not_generated() {
            return false;
        }
        self.metadata.controller_owner().is_some()
    }
}

impl Object for DynamicObject {
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
