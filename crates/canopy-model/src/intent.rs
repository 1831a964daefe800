//! Intents: requests to materialize a child scope

use crate::kind::GroupVersionKind;
use crate::markers;
use crate::meta::{Object, ObjectMeta};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Condition type set while an intent cannot make progress
pub const CONDITION_STALLED: &str = "Stalled";
/// Reason used when a foreign scope holds the requested name
pub const REASON_CONFLICT: &str = "Conflict";

/// A request, stored inside its parent scope, to materialize a child scope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    /// Standard metadata; `namespace` is the owning (parent) scope
    pub metadata: ObjectMeta,
    /// Desired metadata of the child scope
    #[serde(default)]
    pub spec: IntentSpec,
    /// Observed state
    #[serde(default)]
    pub status: IntentStatus,
}

/// Desired labels and annotations for the child scope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentSpec {
    /// Labels to propagate to the child scope
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations to propagate to the child scope
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Summary of the last reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntentState {
    /// The child scope exists and is parented to this intent's scope
    Ok,
    /// A scope with the same name exists under another parent
    Conflict,
}

/// Observed status of an intent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentStatus {
    /// Generation the status was computed from
    #[serde(default)]
    pub observed_generation: i64,
    /// Summary; `None` until the first reconcile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<IntentState>,
    /// Structured conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl IntentStatus {
    /// Find a condition by type
    #[must_use]
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

/// Condition status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Not known
    Unknown,
}

/// A structured status observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: String,
    /// Status
    pub status: ConditionStatus,
    /// Generation this was observed at
    #[serde(default)]
    pub observed_generation: i64,
    /// Machine-readable reason
    pub reason: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
    /// Last time `status` changed
    pub last_transition_time: DateTime<Utc>,
}

impl Intent {
    /// Kind identifier of intents
    #[must_use]
    pub fn gvk() -> GroupVersionKind {
        GroupVersionKind::new("canopy.dev", "v1", "Intent")
    }

    /// Create an intent for child `name` under scope `owning_scope`
    #[must_use]
    pub fn new(owning_scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::namespaced(owning_scope, name),
            spec: IntentSpec::default(),
            status: IntentStatus::default(),
        }
    }

    /// Add a desired label
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.labels.insert(key.into(), value.into());
        self
    }

    /// Add a desired annotation
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.annotations.insert(key.into(), value.into());
        self
    }

    /// The parent scope this intent lives in
    #[must_use]
    pub fn owning_scope(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// Whether the finalizer marker is present
    #[must_use]
    pub fn finalizer_present(&self) -> bool {
        self.metadata.has_finalizer(markers::FINALIZER)
    }

    /// Whether deletion has been requested
    #[inline]
    #[must_use]
    pub fn deletion_pending(&self) -> bool {
        self.metadata.deletion_pending
    }
}

impl Object for Intent {
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
