//! Testing utilities for the canopy workspace
//!
//! [`Harness`] wires an in-memory store, the admission gate, and every
//! controller together, and drives them to a fixed point on demand.

#![allow(missing_docs)]

use canopy_controller::{guard, Manager, ManagerOptions, ReconcileError};
use canopy_hierarchy::AdmittedStore;
use canopy_model::{Config, DynamicObject, GroupVersionKind, Intent, ObjectKey, Role, Scope};
use canopy_store::{InMemoryStore, ObjectStore, ObjectStoreExt, StoreError};
use serde_json::Value;
use std::sync::Arc;

pub const ACTOR: &str = "tester";
pub const MAX_ROUNDS: usize = 200;

pub fn config_map_gvk() -> GroupVersionKind {
    GroupVersionKind::new("", "v1", "ConfigMap")
}

/// A config map in `ns` with one data entry
pub fn config_map(ns: &str, name: &str, key: &str, value: &str) -> DynamicObject {
    DynamicObject::new(&config_map_gvk(), ns, name)
        .with_field("data", serde_json::json!({ key: value }))
}

/// Config watching config maps and propagating the given label keys
pub fn config(label_keys: &[&str]) -> Config {
    Config {
        label_keys: label_keys.iter().map(ToString::to_string).collect(),
        watches: vec![config_map_gvk()],
        ..Config::default()
    }
}

pub struct Harness {
    pub inner: Arc<InMemoryStore>,
    pub store: Arc<AdmittedStore<InMemoryStore>>,
    pub manager: Manager,
}

impl Harness {
    pub async fn new(config: Config) -> Self {
        let config = config.validate().unwrap();
        let inner = Arc::new(InMemoryStore::new());
        for gvk in &config.watches {
            inner.register_kind(gvk, true);
        }
        let options = ManagerOptions::default();
        let store = guard(Arc::clone(&inner), &config, &options).unwrap();
        let dyn_store: Arc<dyn ObjectStore> = store.clone();
        let manager = Manager::new(dyn_store, config, options).await.unwrap();
        manager.prime().await.unwrap();
        Self { inner, store, manager }
    }

    pub async fn with_label_keys(label_keys: &[&str]) -> Self {
        Self::new(config(label_keys)).await
    }

    /// Step every controller until nothing changes
    ///
    /// Only watch events and requeues drive the controllers here; the store
    /// is listed once, when the harness is built.
    pub async fn converge(&self) -> usize {
        self.try_converge().await.unwrap()
    }

    pub async fn try_converge(&self) -> Result<usize, ReconcileError> {
        self.manager.settle(MAX_ROUNDS).await
    }

    pub async fn create_scope(&self, scope: Scope) -> Result<Scope, StoreError> {
        self.store.create(&Scope::gvk(), &scope, ACTOR).await
    }

    pub async fn root(&self, name: &str) -> Scope {
        self.create_scope(Scope::new(name).with_role(Role::Root)).await.unwrap()
    }

    pub async fn create_intent(&self, intent: Intent) -> Result<Intent, StoreError> {
        self.store.create(&Intent::gvk(), &intent, ACTOR).await
    }

    pub async fn scope(&self, name: &str) -> Option<Scope> {
        self.store.get_opt(&Scope::gvk(), &ObjectKey::cluster(name)).await.unwrap()
    }

    pub async fn intent(&self, parent: &str, name: &str) -> Option<Intent> {
        self.store
            .get_opt(&Intent::gvk(), &ObjectKey::namespaced(parent, name))
            .await
            .unwrap()
    }

    pub async fn put(&self, obj: &DynamicObject) -> DynamicObject {
        self.store.create(&config_map_gvk(), obj, ACTOR).await.unwrap()
    }

    pub async fn object(&self, ns: &str, name: &str) -> Option<DynamicObject> {
        self.store
            .get_opt(&config_map_gvk(), &ObjectKey::namespaced(ns, name))
            .await
            .unwrap()
    }

    /// Overwrite the `data` of an object as an external actor would
    pub async fn edit_data(&self, ns: &str, name: &str, data: Value) -> DynamicObject {
        let mut obj = self.object(ns, name).await.unwrap();
        obj.data.insert("data".to_string(), data);
        self.store.update(&config_map_gvk(), &obj, ACTOR).await.unwrap()
    }

    pub async fn delete_object(&self, ns: &str, name: &str) {
        self.store
            .delete(&config_map_gvk(), &ObjectKey::namespaced(ns, name))
            .await
            .unwrap();
    }

    pub async fn delete_scope(&self, name: &str) -> Result<(), StoreError> {
        self.store.delete(&Scope::gvk(), &ObjectKey::cluster(name)).await
    }

    /// Root `root` with a materialized sub-scope `sub`
    pub async fn root_with_sub(&self, root: &str, sub: &str) {
        self.root(root).await;
        self.create_intent(Intent::new(root, sub)).await.unwrap();
        self.converge().await;
    }
}
