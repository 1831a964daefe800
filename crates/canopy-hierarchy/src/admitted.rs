//! Store wrapper that runs every scope and intent write through the gate
//!
//! Writes to other kinds pass straight through. For patches and applies the
//! resulting object is computed locally and reviewed, then the write is
//! forwarded with a `resourceVersion` precondition so that nothing changes
//! between review and commit.

use crate::admission::{mutate_intent, AdmissionGate, Review};
use async_trait::async_trait;
use canopy_model::{GroupVersionKind, Intent, ObjectKey, Scope};
use canopy_store::merge::merge_patch;
use canopy_store::ownership;
use canopy_store::{
    read_meta, to_object_json, FieldIndexer, KindInfo, ListParams, MetadataApply, ObjectStore,
    StoreError, Verb, WatchStream,
};
use serde_json::Value;
use std::sync::Arc;

/// An [`ObjectStore`] guarded by an [`AdmissionGate`]
#[derive(Debug)]
pub struct AdmittedStore<S: ?Sized> {
    inner: Arc<S>,
    gate: AdmissionGate<S>,
}

impl<S: ObjectStore + ?Sized + 'static> AdmittedStore<S> {
    /// Guard `inner` with `gate`
    pub fn new(inner: Arc<S>, gate: AdmissionGate<S>) -> Self {
        Self { inner, gate }
    }

    /// Unguarded store
    #[inline]
    #[must_use]
    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    /// The gate
    #[inline]
    #[must_use]
    pub fn gate(&self) -> &AdmissionGate<S> {
        &self.gate
    }

    async fn review_scope_write(&self, gvk: &GroupVersionKind, key: &ObjectKey, next: &Value) -> Result<u64, StoreError> {
        let current = self.inner.get_json(gvk, key).await?;
        let version = read_meta(&current)?.resource_version;
        let old: Scope = serde_json::from_value(current)?;
        let new: Scope = serde_json::from_value(next.clone())?;
        self.gate.review(Review::UpdateScope { old: &old, new: &new }).await?;
        Ok(version)
    }
}

fn check_version(key: &ObjectKey, requested: Option<u64>, current: u64) -> Result<(), StoreError> {
    match requested {
        Some(v) if v != current => Err(StoreError::conflict(
            key,
            format!("resourceVersion {v} does not match {current}"),
        )),
        _ => Ok(()),
    }
}

#[async_trait]
impl<S: ObjectStore + ?Sized + 'static> ObjectStore for AdmittedStore<S> {
    fn register_index(&self, gvk: &GroupVersionKind, indexer: FieldIndexer) -> Result<(), StoreError> {
        self.inner.register_index(gvk, indexer)
    }

    fn watch(&self, gvk: &GroupVersionKind) -> Result<WatchStream, StoreError> {
        self.inner.watch(gvk)
    }

    async fn get_json(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<Value, StoreError> {
        self.inner.get_json(gvk, key).await
    }

    async fn list_json(&self, gvk: &GroupVersionKind, params: &ListParams) -> Result<Vec<Value>, StoreError> {
        self.inner.list_json(gvk, params).await
    }

    async fn create_json(&self, gvk: &GroupVersionKind, obj: Value, manager: &str) -> Result<Value, StoreError> {
        if *gvk == Scope::gvk() {
            let scope: Scope = serde_json::from_value(obj.clone())?;
            self.gate.review(Review::CreateScope(&scope)).await?;
            return self.inner.create_json(gvk, obj, manager).await;
        }
        if *gvk == Intent::gvk() {
            let mut intent: Intent = serde_json::from_value(obj)?;
            mutate_intent(&mut intent);
            self.gate.review(Review::CreateIntent(&intent)).await?;
            return self
                .inner
                .create_json(gvk, to_object_json(gvk, &intent)?, manager)
                .await;
        }
        self.inner.create_json(gvk, obj, manager).await
    }

    async fn update_json(&self, gvk: &GroupVersionKind, obj: Value, manager: &str) -> Result<Value, StoreError> {
        if *gvk == Scope::gvk() {
            let key = read_meta(&obj)?.key();
            self.review_scope_write(gvk, &key, &obj).await?;
        }
        self.inner.update_json(gvk, obj, manager).await
    }

    async fn merge_patch(
        &self,
        gvk: &GroupVersionKind,
        key: &ObjectKey,
        patch: &Value,
        resource_version: Option<u64>,
        manager: &str,
    ) -> Result<Value, StoreError> {
        if *gvk != Scope::gvk() {
            return self
                .inner
                .merge_patch(gvk, key, patch, resource_version, manager)
                .await;
        }
        let mut next = self.inner.get_json(gvk, key).await?;
        let current = read_meta(&next)?.resource_version;
        check_version(key, resource_version, current)?;
        merge_patch(&mut next, patch);
        let reviewed = self.review_scope_write(gvk, key, &next).await?;
        check_version(key, Some(current), reviewed)?;
        self.inner
            .merge_patch(gvk, key, patch, Some(current), manager)
            .await
    }

    async fn apply_metadata(
        &self,
        gvk: &GroupVersionKind,
        key: &ObjectKey,
        apply: &MetadataApply,
    ) -> Result<Value, StoreError> {
        if *gvk != Scope::gvk() {
            return self.inner.apply_metadata(gvk, key, apply).await;
        }
        let current = self.inner.get_json(gvk, key).await?;
        let mut meta = read_meta(&current)?;
        let version = meta.resource_version;
        check_version(key, apply.resource_version, version)?;
        if ownership::apply(&mut meta, apply).is_err() {
            // let the store report the conflicting fields
            return self.inner.apply_metadata(gvk, key, apply).await;
        }

        let mut next = current;
        next["metadata"] = serde_json::to_value(&meta)?;
        let reviewed = self.review_scope_write(gvk, key, &next).await?;
        check_version(key, Some(version), reviewed)?;

        let mut pinned = apply.clone();
        pinned.resource_version = Some(version);
        self.inner.apply_metadata(gvk, key, &pinned).await
    }

    async fn delete(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<(), StoreError> {
        if *gvk == Scope::gvk() {
            let current = self.inner.get_json(gvk, key).await?;
            let scope: Scope = serde_json::from_value(current)?;
            self.gate.review(Review::DeleteScope(&scope)).await?;
        }
        self.inner.delete(gvk, key).await
    }

    async fn resolve_kind(&self, gvk: &GroupVersionKind) -> Result<Option<KindInfo>, StoreError> {
        self.inner.resolve_kind(gvk).await
    }

    async fn access_allowed(&self, gvk: &GroupVersionKind, verb: Verb) -> Result<bool, StoreError> {
        self.inner.access_allowed(gvk, verb).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_model::{markers, Object, Role};
    use canopy_store::{InMemoryStore, ObjectStoreExt};
    use serde_json::json;

    fn guarded() -> AdmittedStore<InMemoryStore> {
        let inner = Arc::new(InMemoryStore::new());
        crate::lookup::register_scope_indexes(inner.as_ref()).unwrap();
        let gate = AdmissionGate::new(Arc::clone(&inner), Vec::new());
        AdmittedStore::new(inner, gate)
    }

    #[tokio::test]
    async fn scope_writes_are_reviewed() {
        let store = guarded();
        store
            .create(&Scope::gvk(), &Scope::new("root").with_role(Role::Root), "admin")
            .await
            .unwrap();
        store
            .create(&Scope::gvk(), &Scope::new("a").with_parent("root"), "admin")
            .await
            .unwrap();

        let err = store
            .create(&Scope::gvk(), &Scope::new("b").with_parent("missing"), "admin")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Admission(ref m) if m == "namespace does not exist: missing"));

        let err = store
            .merge_patch(
                &Scope::gvk(),
                &ObjectKey::cluster("root"),
                &json!({"metadata": {"labels": {"canopy.dev/type": null}}}),
                None,
                "admin",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Admission(_)));

        let err = store
            .delete(&Scope::gvk(), &ObjectKey::cluster("root"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Admission(ref m) if m.ends_with("child namespaces exist")));
    }

    #[tokio::test]
    async fn applies_are_reviewed_on_their_result() {
        let store = guarded();
        store
            .create(&Scope::gvk(), &Scope::new("root").with_role(Role::Root), "admin")
            .await
            .unwrap();
        store
            .create(&Scope::gvk(), &Scope::new("a").with_parent("root"), "admin")
            .await
            .unwrap();

        let mut apply = MetadataApply::new("tool");
        apply.labels.insert(markers::LABEL_TEMPLATE.into(), "x".into());
        let err = store
            .apply_metadata(&Scope::gvk(), &ObjectKey::cluster("a"), &apply)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Admission(ref m) if m.ends_with("a sub-namespace cannot have a template")));

        let mut apply = MetadataApply::new("tool");
        apply.labels.insert("team".into(), "x".into());
        let scope: Scope = serde_json::from_value(
            store
                .apply_metadata(&Scope::gvk(), &ObjectKey::cluster("a"), &apply)
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(scope.metadata.label("team"), Some("x"));
    }

    #[tokio::test]
    async fn intents_get_the_finalizer() {
        let store = guarded();
        store
            .create(&Scope::gvk(), &Scope::new("root").with_role(Role::Root), "admin")
            .await
            .unwrap();
        let intent = store
            .create(&Intent::gvk(), &Intent::new("root", "child"), "admin")
            .await
            .unwrap();
        assert!(intent.finalizer_present());
        assert_eq!(intent.name(), "child");
    }
}
