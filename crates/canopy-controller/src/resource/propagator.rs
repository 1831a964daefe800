//! Resource Propagator
//!
//! One propagator per watched kind. The object-driven operations here react
//! to a single origin or copy; the scope-driven pass lives in
//! [`super::scope_pass`].

use super::clone::clone_into;
use super::compare::in_sync;
use crate::error::ReconcileError;
use canopy_hierarchy::HierarchyResolver;
use canopy_model::{
    markers, DynamicObject, GroupVersionKind, Object, ObjectKey, PropagateMode, PropagationState, Scope,
    ValidatedConfig,
};
use canopy_store::{ignore_not_found, ObjectStore, ObjectStoreExt, StoreError};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Propagates objects of one namespaced kind down the hierarchy
#[derive(Clone)]
pub struct ResourcePropagator {
    pub(crate) gvk: GroupVersionKind,
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) resolver: HierarchyResolver<dyn ObjectStore>,
    pub(crate) config: Arc<ValidatedConfig>,
}

impl std::fmt::Debug for ResourcePropagator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePropagator")
            .field("gvk", &self.gvk)
            .finish_non_exhaustive()
    }
}

impl ResourcePropagator {
    /// Create new propagator for `gvk`
    pub fn new(gvk: GroupVersionKind, store: Arc<dyn ObjectStore>, config: Arc<ValidatedConfig>) -> Self {
        let resolver = HierarchyResolver::new(Arc::clone(&store));
        Self {
            gvk,
            store,
            resolver,
            config,
        }
    }

    /// The propagated kind
    #[inline]
    #[must_use]
    pub fn gvk(&self) -> &GroupVersionKind {
        &self.gvk
    }

    /// Whether an object's events deserve a reconcile
    #[must_use]
    pub fn is_candidate(&self, obj: &DynamicObject) -> bool {
        if self.config.disable_propagate_generated {
            obj.declares_source() || obj.declares_propagate()
        } else {
            obj.is_propagation_candidate()
        }
    }

    pub(crate) fn clone_for(&self, source: &DynamicObject, scope: &str) -> DynamicObject {
        clone_into(source, scope, &self.config.propagation_key_excludes)
    }

    pub(crate) async fn get(&self, scope: &str, name: &str) -> Result<Option<DynamicObject>, StoreError> {
        self.store
            .get_opt(&self.gvk, &ObjectKey::namespaced(scope, name))
            .await
    }

    /// Create `copy`, treating "already exists" as done
    pub(crate) async fn create_copy(&self, copy: &DynamicObject) -> Result<bool, StoreError> {
        match self.store.create(&self.gvk, copy, markers::FIELD_MANAGER).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_already_exists() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Overwrite `existing` with `copy`
    pub(crate) async fn replace_copy(&self, mut copy: DynamicObject, existing: &DynamicObject) -> Result<(), StoreError> {
        copy.metadata.resource_version = existing.metadata.resource_version;
        self.store
            .update(&self.gvk, &copy, markers::FIELD_MANAGER)
            .await
            .map(|_| ())
    }

    pub(crate) async fn delete_object(&self, key: &ObjectKey) -> Result<(), StoreError> {
        ignore_not_found(self.store.delete(&self.gvk, key).await).map(|_| ())
    }

    /// Live scopes directly below `name`
    async fn children(&self, name: &str) -> Result<Vec<Scope>, ReconcileError> {
        let Some(scope) = self.resolver.scope(name).await? else {
            return Ok(Vec::new());
        };
        let children = self.resolver.children(&scope).await?;
        Ok(children.into_iter().filter(|c| !c.deletion_pending()).collect())
    }

    /// Reconcile one object of this kind
    ///
    /// # Errors
    /// Returns store or lookup failures.
    pub async fn reconcile_object(&self, key: &ObjectKey) -> Result<(), ReconcileError> {
        let Some(obj) = self.store.get_opt::<DynamicObject>(&self.gvk, key).await? else {
            return self.handle_delete(key).await;
        };
        if obj.metadata.deletion_pending {
            return Ok(());
        }

        if let PropagationState::Copy { source, mode } = obj.propagation_state() {
            match self.get(source, obj.name()).await? {
                Some(origin) if origin.propagate_mode() == Some(PropagateMode::Update) => {
                    return self.propagate_update(&obj, Some(&origin)).await;
                }
                // gone, or no longer keeping its copies in sync
                _ if mode == Some(PropagateMode::Update) => {
                    self.delete_object(key).await?;
                    info!(kind = %self.gvk.kind, %key, from = source, "deleted a stale resource");
                    return Ok(());
                }
                _ => {}
            }
        }
        if obj.propagate_mode() != Some(PropagateMode::Update) {
            self.retract_update_copies(&obj).await?;
        }

        match obj.metadata.annotation(markers::ANN_PROPAGATE) {
            None if !obj.marked_not_generated() && !self.config.disable_propagate_generated => {
                self.check_controller(&obj).await
            }
            None => Ok(()),
            Some(value) => match PropagateMode::parse(value) {
                Some(PropagateMode::Create) => self.propagate_create(&obj).await,
                Some(PropagateMode::Update) => self.propagate_update(&obj, None).await,
                None => {
                    debug!(kind = %self.gvk.kind, %key, value, "unknown propagate mode");
                    Ok(())
                }
            },
        }
    }

    /// Give every child scope a copy it does not have yet; never overwrite
    ///
    /// # Errors
    /// Returns store or lookup failures.
    pub async fn propagate_create(&self, obj: &DynamicObject) -> Result<(), ReconcileError> {
        for child in self.children(obj.namespace()).await? {
            if self.get(child.name(), obj.name()).await?.is_some() {
                continue;
            }
            if self.create_copy(&self.clone_for(obj, child.name())).await? {
                info!(kind = %self.gvk.kind, name = obj.name(), scope = child.name(), "created a child resource");
            }
        }
        Ok(())
    }

    /// Keep copies of an update-mode object in sync
    ///
    /// With `origin` set, `obj` is itself a copy: it is first brought in line
    /// with its origin, and only an in-sync copy is pushed further down.
    ///
    /// # Errors
    /// Returns store or lookup failures.
    pub async fn propagate_update(
        &self,
        obj: &DynamicObject,
        origin: Option<&DynamicObject>,
    ) -> Result<(), ReconcileError> {
        if let Some(origin) = origin {
            let clone = self.clone_for(origin, obj.namespace());
            if !in_sync(&clone, obj) {
                self.replace_copy(clone, obj).await?;
                info!(kind = %self.gvk.kind, key = %obj.key(), from = origin.namespace(), "updated");
                return Ok(());
            }
        }

        for child in self.children(obj.namespace()).await? {
            let clone = self.clone_for(obj, child.name());
            match self.get(child.name(), obj.name()).await? {
                None => {
                    if self.create_copy(&clone).await? {
                        info!(kind = %self.gvk.kind, name = obj.name(), scope = child.name(), "created a child resource");
                    }
                }
                Some(existing) if !in_sync(&clone, &existing) => {
                    self.replace_copy(clone, &existing).await?;
                    info!(kind = %self.gvk.kind, name = obj.name(), scope = child.name(), "updated a child resource");
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Delete update-mode copies of `obj` from its child scopes
    ///
    /// Run for an object that does not propagate in update mode (anymore);
    /// deleting a copy cascades further down through [`Self::handle_delete`].
    ///
    /// # Errors
    /// Returns store or lookup failures.
    pub async fn retract_update_copies(&self, obj: &DynamicObject) -> Result<(), ReconcileError> {
        for child in self.children(obj.namespace()).await? {
            let Some(copy) = self.get(child.name(), obj.name()).await? else {
                continue;
            };
            if copy.propagate_mode() != Some(PropagateMode::Update) || copy.source_scope() != Some(obj.namespace()) {
                continue;
            }
            self.delete_object(&copy.key()).await?;
            info!(kind = %self.gvk.kind, name = obj.name(), scope = child.name(), "deleted a stale resource");
        }
        Ok(())
    }

    /// Copy the mode of a controller-owned object from its owner, or record
    /// that it is not generated
    ///
    /// # Errors
    /// Returns store failures other than a missing owner.
    pub async fn check_controller(&self, obj: &DynamicObject) -> Result<(), ReconcileError> {
        let Some(owner) = obj.metadata.controller_owner() else {
            return Ok(());
        };
        let owner_gvk = GroupVersionKind::from_api_version(&owner.api_version, &owner.kind)?;
        let found = match self
            .store
            .get_opt::<DynamicObject>(&owner_gvk, &ObjectKey::namespaced(obj.namespace(), &owner.name))
            .await
        {
            Ok(found) => found,
            Err(StoreError::UnknownKind(_)) => None,
            Err(e) => return Err(e.into()),
        };
        let Some(found) = found else {
            info!(kind = %self.gvk.kind, key = %obj.key(), owner = %owner.name, "the controller object is not found");
            return Ok(());
        };

        let mut annotations = Map::new();
        match found.metadata.annotations.get(markers::ANN_PROPAGATE_GENERATED) {
            Some(mode) => annotations.insert(markers::ANN_PROPAGATE.to_string(), Value::String(mode.clone())),
            None => annotations.insert(
                markers::ANN_GENERATED.to_string(),
                Value::String(markers::NOT_GENERATED.to_string()),
            ),
        };
        let patch = json!({ "metadata": { "annotations": annotations } });
        self.store
            .merge_patch(&self.gvk, &obj.key(), &patch, None, markers::FIELD_MANAGER)
            .await?;
        info!(kind = %self.gvk.kind, key = %obj.key(), "annotated to store the result of checking the owner");
        Ok(())
    }

    /// React to an object that is gone
    ///
    /// A copy whose origin is still eligible is re-created. Otherwise the
    /// update-mode copies of the same name in child scopes are deleted,
    /// which cascades level by level.
    ///
    /// # Errors
    /// Returns store or lookup failures.
    pub async fn handle_delete(&self, key: &ObjectKey) -> Result<(), ReconcileError> {
        let Some(ns) = key.namespace.as_deref() else {
            return Ok(());
        };
        let Some(scope) = self.resolver.scope(ns).await? else {
            return Ok(());
        };

        if let Some(upstream) = scope.upstream_ref() {
            if let Some(origin) = self.get(upstream, &key.name).await? {
                if origin.propagate_mode().is_some() && !scope.deletion_pending() {
                    if self.create_copy(&self.clone_for(&origin, ns)).await? {
                        info!(kind = %self.gvk.kind, %key, from = upstream, "re-created");
                    }
                    return Ok(());
                }
            }
        }

        for child in self.resolver.children(&scope).await? {
            let Some(copy) = self.get(child.name(), &key.name).await? else {
                continue;
            };
            if copy.propagate_mode() != Some(PropagateMode::Update) {
                continue;
            }
            self.delete_object(&copy.key()).await?;
            info!(kind = %self.gvk.kind, name = %key.name, scope = child.name(), "deleted a child resource");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_hierarchy::register_scope_indexes;
    use canopy_model::{Config, Role};
    use canopy_store::InMemoryStore;

    fn config_map_gvk() -> GroupVersionKind {
        GroupVersionKind::new("", "v1", "ConfigMap")
    }

    async fn setup() -> (Arc<InMemoryStore>, ResourcePropagator) {
        let store = Arc::new(InMemoryStore::new());
        store.register_kind(&config_map_gvk(), true);
        register_scope_indexes(store.as_ref()).unwrap();
        for scope in [
            Scope::new("r").with_role(Role::Root),
            Scope::new("s").with_parent("r"),
            Scope::new("t").with_parent("r"),
        ] {
            store.create(&Scope::gvk(), &scope, "test").await.unwrap();
        }
        let config = Config::default().validate().unwrap();
        let propagator = ResourcePropagator::new(config_map_gvk(), store.clone(), Arc::new(config));
        (store, propagator)
    }

    #[tokio::test]
    async fn origin_without_update_mode_retracts_its_copies() {
        let (store, propagator) = setup().await;
        let gvk = config_map_gvk();
        store
            .create(&gvk, &DynamicObject::new(&gvk, "r", "cm"), "test")
            .await
            .unwrap();
        let copy = DynamicObject::new(&gvk, "s", "cm")
            .with_propagate(PropagateMode::Update)
            .with_annotation(markers::ANN_FROM, "r");
        store.create(&gvk, &copy, "test").await.unwrap();
        let foreign = DynamicObject::new(&gvk, "t", "cm").with_propagate(PropagateMode::Update);
        store.create(&gvk, &foreign, "test").await.unwrap();

        propagator.reconcile_object(&ObjectKey::namespaced("r", "cm")).await.unwrap();

        assert!(propagator.get("s", "cm").await.unwrap().is_none());
        assert!(propagator.get("t", "cm").await.unwrap().is_some());
        assert!(propagator.get("r", "cm").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn update_copy_of_a_create_mode_origin_is_stale() {
        let (store, propagator) = setup().await;
        let gvk = config_map_gvk();
        let origin = DynamicObject::new(&gvk, "r", "cm").with_propagate(PropagateMode::Create);
        store.create(&gvk, &origin, "test").await.unwrap();
        let copy = DynamicObject::new(&gvk, "s", "cm")
            .with_propagate(PropagateMode::Update)
            .with_annotation(markers::ANN_FROM, "r");
        store.create(&gvk, &copy, "test").await.unwrap();

        propagator.reconcile_object(&ObjectKey::namespaced("s", "cm")).await.unwrap();
        assert!(propagator.get("s", "cm").await.unwrap().is_none());
    }
}
