//! Scope-driven propagation pass
//!
//! Run when a sub-scope or instance is reconciled: pull every eligible
//! object from its source scope and drop update-mode copies the source no
//! longer backs.

use super::compare::in_sync;
use super::propagator::ResourcePropagator;
use crate::error::ReconcileError;
use canopy_model::{markers, DynamicObject, Object, PropagateMode};
use canopy_store::{ListParams, ObjectStoreExt};
use std::collections::HashSet;
use tracing::info;

impl ResourcePropagator {
    async fn list_mode(&self, scope: &str, mode: PropagateMode) -> Result<Vec<DynamicObject>, ReconcileError> {
        let params = ListParams::default()
            .in_namespace(scope)
            .matching(markers::INDEX_PROPAGATE, mode.as_str());
        Ok(self.store.list(&self.gvk, &params).await?)
    }

    /// Bring `scope` in line with the objects of `source`
    ///
    /// # Errors
    /// Returns the first store failure.
    pub async fn sync_scope(&self, source: &str, scope: &str) -> Result<(), ReconcileError> {
        for origin in self.list_mode(source, PropagateMode::Create).await? {
            if self.get(scope, origin.name()).await?.is_some() {
                continue;
            }
            if self.create_copy(&self.clone_for(&origin, scope)).await? {
                info!(kind = %self.gvk.kind, name = origin.name(), scope, from = source, "created a resource");
            }
        }

        let mut backed = HashSet::new();
        for origin in self.list_mode(source, PropagateMode::Update).await? {
            backed.insert(origin.name().to_string());
            let clone = self.clone_for(&origin, scope);
            match self.get(scope, origin.name()).await? {
                None => {
                    if self.create_copy(&clone).await? {
                        info!(kind = %self.gvk.kind, name = origin.name(), scope, from = source, "created a resource");
                    }
                }
                Some(existing) if !in_sync(&clone, &existing) => {
                    self.replace_copy(clone, &existing).await?;
                    info!(kind = %self.gvk.kind, name = origin.name(), scope, from = source, "updated a resource");
                }
                Some(_) => {}
            }
        }

        for copy in self.list_mode(scope, PropagateMode::Update).await? {
            let Some(from) = copy.source_scope() else {
                continue;
            };
            if from == source && backed.contains(copy.name()) {
                continue;
            }
            self.delete_object(&copy.key()).await?;
            info!(kind = %self.gvk.kind, name = copy.name(), scope, from, "deleted a stale resource");
        }
        Ok(())
    }

    /// Remove every update-mode copy from a scope that has no source
    ///
    /// # Errors
    /// Returns the first store failure.
    pub async fn delete_propagated(&self, scope: &str) -> Result<(), ReconcileError> {
        for copy in self.list_mode(scope, PropagateMode::Update).await? {
            if !copy.declares_source() {
                continue;
            }
            self.delete_object(&copy.key()).await?;
            info!(kind = %self.gvk.kind, name = copy.name(), scope, "deleted a propagated resource");
        }
        Ok(())
    }
}
