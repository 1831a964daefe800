//! Scope reconciler
//!
//! Keyed by scope name. Applies metadata from the scope's source, runs the
//! scope-driven resource pass for every watched kind, and repeats both for
//! the scopes directly below it.

use crate::error::ReconcileError;
use crate::metadata::MetadataPropagator;
use crate::resource::ResourcePropagator;
use crate::runtime::{Action, Reconciler, WatchSource};
use async_trait::async_trait;
use canopy_hierarchy::HierarchyResolver;
use canopy_model::{Intent, Object, Scope};
use canopy_store::{read_meta, ObjectStore, WatchEvent};
use std::sync::Arc;
use tracing::debug;

/// Reconciles one scope at a time
#[derive(Debug, Clone)]
pub struct ScopeReconciler {
    resolver: HierarchyResolver<dyn ObjectStore>,
    metadata: MetadataPropagator,
    resources: Vec<ResourcePropagator>,
}

impl ScopeReconciler {
    /// Create new reconciler
    pub fn new(
        store: Arc<dyn ObjectStore>,
        metadata: MetadataPropagator,
        resources: Vec<ResourcePropagator>,
    ) -> Self {
        Self {
            resolver: HierarchyResolver::new(store),
            metadata,
            resources,
        }
    }

    /// Re-run the resource pass for every scope fed by `scope`
    ///
    /// Removes copies whose origin here was deleted or stopped propagating
    /// even when no event names the downstream scope.
    async fn resync_downstream(&self, scope: &Scope) -> Result<(), ReconcileError> {
        for child in self.resolver.children(scope).await? {
            if child.deletion_pending() || child.upstream_ref() != Some(scope.name()) {
                continue;
            }
            for resources in &self.resources {
                resources.sync_scope(scope.name(), child.name()).await?;
            }
        }
        Ok(())
    }

    async fn upstream(&self, name: &str) -> Result<Scope, ReconcileError> {
        self.resolver
            .scope(name)
            .await?
            .ok_or_else(|| ReconcileError::MissingScope(name.to_string()))
    }
}

fn object_name(event: &WatchEvent) -> Vec<String> {
    event
        .object()
        .and_then(|obj| read_meta(obj).ok())
        .map(|meta| meta.name)
        .into_iter()
        .collect()
}

#[async_trait]
impl Reconciler for ScopeReconciler {
    type Key = String;

    fn name(&self) -> &'static str {
        "scope"
    }

    fn sources(&self) -> Vec<WatchSource<String>> {
        // an intent's name is the name of the scope it materializes
        vec![
            WatchSource::sync(Scope::gvk(), object_name),
            WatchSource::sync(Intent::gvk(), object_name),
        ]
    }

    async fn reconcile(&self, name: &String) -> Result<Action, ReconcileError> {
        let Some(scope) = self.resolver.scope(name).await? else {
            return Ok(Action::Done);
        };
        if scope.deletion_pending() {
            return Ok(Action::Done);
        }

        if let Some(parent) = scope.parent_ref() {
            let parent = self.upstream(parent).await?;
            self.metadata.sync(&scope, Some(&parent)).await?;
            for resources in &self.resources {
                resources.sync_scope(parent.name(), name).await?;
            }
        } else if let Some(template) = scope.template_ref() {
            let template = self.upstream(template).await?;
            self.metadata.sync(&scope, Some(&template)).await?;
            for resources in &self.resources {
                resources.sync_scope(template.name(), name).await?;
            }
        } else {
            self.metadata.sync(&scope, None).await?;
            for resources in &self.resources {
                resources.delete_propagated(name).await?;
            }
        }

        if scope.is_sub_scope() || scope.is_root() || scope.is_template() {
            self.metadata.fan_out(&self.resolver, &scope).await?;
            self.resync_downstream(&scope).await?;
        }
        debug!(scope = name.as_str(), class = ?scope.classify(), "scope reconciled");
        Ok(Action::Done)
    }
}
