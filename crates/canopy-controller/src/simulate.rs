//! Offline convergence: seed an in-memory store, settle, dump the result

use crate::error::{ReconcileError, StartupError};
use crate::manager::{guard, Manager, ManagerOptions};
use canopy_hierarchy::{HierarchyError, HierarchyGraph, ScopeSnapshot};
use canopy_model::{GroupVersionKind, Intent, Scope, ValidatedConfig};
use canopy_store::{InMemoryStore, ListParams, ObjectStore, StoreError};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Rounds allowed before a simulation is declared divergent
pub const MAX_ROUNDS: usize = 1000;

/// Simulation failures
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    /// Objects file is not valid YAML
    #[error("failed to parse objects: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A document is not a usable object
    #[error("object #{index}: {reason}")]
    Object {
        /// Position of the document, 0-based
        index: usize,
        /// What is wrong with it
        reason: String,
    },

    /// Seeding a document was refused
    #[error("object #{index}: {source}")]
    Seed {
        /// Position of the document, 0-based
        index: usize,
        /// Store or admission error
        #[source]
        source: StoreError,
    },

    /// The manager did not start
    #[error(transparent)]
    Startup(#[from] StartupError),

    /// Convergence failed
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    /// Convergence took longer than allowed
    #[error("did not converge within {0:?}")]
    Timeout(Duration),

    /// Reading back the result failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Converged scopes do not form a forest
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),
}

/// Parse a multi-document YAML stream into JSON objects
///
/// Empty documents are skipped.
///
/// # Errors
/// Returns [`SimulationError::Parse`] on malformed YAML.
pub fn parse_objects(data: &str) -> Result<Vec<Value>, SimulationError> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(data) {
        let value = Value::deserialize(document)?;
        if !value.is_null() {
            objects.push(value);
        }
    }
    Ok(objects)
}

fn kind_of(index: usize, obj: &Value) -> Result<GroupVersionKind, SimulationError> {
    let field = |name: &str| {
        obj.get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| SimulationError::Object {
                index,
                reason: format!("missing {name}"),
            })
    };
    GroupVersionKind::from_api_version(field("apiVersion")?, field("kind")?).map_err(|e| SimulationError::Object {
        index,
        reason: e.to_string(),
    })
}

/// Seeding order: scopes, then intents, then everything else
fn rank(gvk: &GroupVersionKind) -> u8 {
    if *gvk == Scope::gvk() {
        0
    } else if *gvk == Intent::gvk() {
        1
    } else {
        2
    }
}

fn strip_server_fields(mut obj: Value) -> Value {
    if let Some(meta) = obj.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.remove("managedFields");
        meta.remove("uid");
    }
    obj
}

/// Converge `objects` under `config` and return every stored object
///
/// Objects are created through the admission gate, so a document the gate
/// would deny fails the simulation.
///
/// # Errors
/// Returns [`SimulationError`] for unusable input, refused writes, or a
/// run that does not settle within `timeout`.
pub async fn simulate(
    config: ValidatedConfig,
    objects: Vec<Value>,
    options: ManagerOptions,
    timeout: Duration,
) -> Result<Vec<Value>, SimulationError> {
    let inner = Arc::new(InMemoryStore::new());
    for gvk in &config.watches {
        inner.register_kind(gvk, true);
    }
    let watches = config.watches.clone();
    let store: Arc<dyn ObjectStore> = guard(inner, &config, &options)?;
    let manager = Manager::new(Arc::clone(&store), config, options).await?;

    let mut seeds = objects
        .into_iter()
        .enumerate()
        .map(|(index, obj)| kind_of(index, &obj).map(|gvk| (index, gvk, obj)))
        .collect::<Result<Vec<_>, _>>()?;
    seeds.sort_by_key(|(index, gvk, _)| (rank(gvk), *index));
    for (index, gvk, obj) in seeds {
        store
            .create_json(&gvk, obj, "simulate")
            .await
            .map_err(|source| SimulationError::Seed { index, source })?;
    }
    manager.prime().await?;

    let rounds = tokio::time::timeout(timeout, manager.settle(MAX_ROUNDS))
        .await
        .map_err(|_| SimulationError::Timeout(timeout))??;

    let mut result = Vec::new();
    for gvk in [Scope::gvk(), Intent::gvk()].iter().chain(&watches) {
        let listed = store.list_json(gvk, &ListParams::default()).await?;
        result.extend(listed.into_iter().map(strip_server_fields));
    }
    let graph = hierarchy(&result)?;
    info!(rounds, scopes = graph.node_count(), "converged");
    debug!(tree = %graph.render(), "converged hierarchy");
    Ok(result)
}

/// Scope graph of a set of objects; everything but scopes is ignored
///
/// # Errors
/// - [`SimulationError::Object`] if a scope document is malformed
/// - [`SimulationError::Hierarchy`] if the scope references loop
pub fn hierarchy(objects: &[Value]) -> Result<HierarchyGraph, SimulationError> {
    let mut snapshot = ScopeSnapshot::new();
    for (index, obj) in objects.iter().enumerate() {
        if kind_of(index, obj)? != Scope::gvk() {
            continue;
        }
        let scope = serde_json::from_value::<Scope>(obj.clone()).map_err(|e| SimulationError::Object {
            index,
            reason: e.to_string(),
        })?;
        snapshot.insert(scope);
    }
    let graph = HierarchyGraph::from_snapshot(&snapshot);
    graph.top_down()?;
    Ok(graph)
}

/// Render objects as a multi-document YAML stream
///
/// # Errors
/// Returns [`SimulationError::Parse`] if an object cannot be rendered.
pub fn render(objects: &[Value]) -> Result<String, SimulationError> {
    let mut out = String::new();
    for obj in objects {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(obj)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_documents_and_reports_bad_ones() {
        let objects = parse_objects(
            "---\napiVersion: canopy.dev/v1\nkind: Scope\nmetadata:\n  name: a\n---\nkind: x\n",
        )
        .unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0]["metadata"]["name"], "a");

        assert!(matches!(
            kind_of(1, &objects[1]),
            Err(SimulationError::Object { index: 1, .. })
        ));
    }

    #[test]
    fn hierarchy_skips_other_kinds_and_rejects_loops() {
        let objects = parse_objects(
            "apiVersion: canopy.dev/v1\nkind: Scope\nmetadata:\n  name: a\n  labels:\n    canopy.dev/parent: b\n\
             ---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n  namespace: a\n",
        )
        .unwrap();
        let graph = hierarchy(&objects).unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.tops(), vec!["b"]);

        let looped = parse_objects(
            "apiVersion: canopy.dev/v1\nkind: Scope\nmetadata:\n  name: a\n  labels:\n    canopy.dev/parent: b\n\
             ---\napiVersion: canopy.dev/v1\nkind: Scope\nmetadata:\n  name: b\n  labels:\n    canopy.dev/parent: a\n",
        )
        .unwrap();
        assert!(matches!(hierarchy(&looped), Err(SimulationError::Hierarchy(_))));
    }

    #[test]
    fn scopes_seed_first() {
        let cm = GroupVersionKind::new("", "v1", "ConfigMap");
        assert!(rank(&Scope::gvk()) < rank(&Intent::gvk()));
        assert!(rank(&Intent::gvk()) < rank(&cm));
    }
}
