//! In-process object store
//!
//! A complete [`ObjectStore`] over JSON documents:
//! - optimistic concurrency on `resourceVersion` (a global revision counter)
//! - finalizer-gated deletion and namespace-scope termination
//! - maintained field indexes
//! - label/annotation field ownership
//! - per-kind broadcast watch channels

use crate::api::{KindInfo, ListParams, MetadataApply, ObjectStore, Verb, WatchEvent, WatchStream};
use crate::error::StoreError;
use crate::index::{FieldIndex, FieldIndexer};
use crate::{merge, ownership};
use async_trait::async_trait;
use canopy_model::{GroupVersionKind, Intent, ObjectKey, ObjectMeta, Scope};
use dashmap::DashSet;
use futures::StreamExt;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default capacity of each watch channel
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug)]
struct KindTable {
    info: KindInfo,
    objects: BTreeMap<ObjectKey, Value>,
    indexes: HashMap<String, FieldIndex>,
    events: broadcast::Sender<WatchEvent>,
}

impl KindTable {
    fn new(info: KindInfo, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            info,
            objects: BTreeMap::new(),
            indexes: HashMap::new(),
            events,
        }
    }

    fn put(&mut self, key: ObjectKey, value: Value) {
        if let Some(old) = self.objects.remove(&key) {
            for index in self.indexes.values_mut() {
                index.remove(&key, &old);
            }
        }
        for index in self.indexes.values_mut() {
            index.insert(&key, &value);
        }
        self.objects.insert(key, value);
    }

    fn take(&mut self, key: &ObjectKey) -> Option<Value> {
        let old = self.objects.remove(key)?;
        for index in self.indexes.values_mut() {
            index.remove(key, &old);
        }
        Some(old)
    }

    fn emit(&self, event: WatchEvent) {
        // No receivers is fine: nobody is watching yet.
        let _ = self.events.send(event);
    }
}

#[derive(Debug, Default)]
struct State {
    kinds: BTreeMap<GroupVersionKind, KindTable>,
    revision: u64,
}

impl State {
    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    fn table(&self, gvk: &GroupVersionKind) -> Result<&KindTable, StoreError> {
        self.kinds
            .get(gvk)
            .ok_or_else(|| StoreError::UnknownKind(gvk.clone()))
    }

    fn table_mut(&mut self, gvk: &GroupVersionKind) -> Result<&mut KindTable, StoreError> {
        self.kinds
            .get_mut(gvk)
            .ok_or_else(|| StoreError::UnknownKind(gvk.clone()))
    }

    fn fetch(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<Value, StoreError> {
        self.table(gvk)?
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(gvk, key))
    }

    /// Namespaced objects living in namespace-scope `ns`
    fn contents(&self, ns: &str) -> Vec<(GroupVersionKind, ObjectKey)> {
        self.kinds
            .iter()
            .filter(|(_, table)| table.info.namespaced)
            .flat_map(|(gvk, table)| {
                table
                    .objects
                    .keys()
                    .filter(|k| k.namespace.as_deref() == Some(ns))
                    .map(move |k| (gvk.clone(), k.clone()))
            })
            .collect()
    }
}

enum Ownership<'a> {
    Update(&'a str),
    Applied,
}

/// The in-memory store
#[derive(Debug)]
pub struct InMemoryStore {
    state: RwLock<State>,
    namespace_kind: GroupVersionKind,
    event_capacity: usize,
    denied: DashSet<(GroupVersionKind, Verb)>,
    failing_writes: AtomicUsize,
    failing_lists: AtomicUsize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Create a store serving scopes and intents
    #[must_use]
    pub fn new() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create a store with a custom watch channel capacity
    #[must_use]
    pub fn with_event_capacity(event_capacity: usize) -> Self {
        let store = Self {
            state: RwLock::new(State::default()),
            namespace_kind: Scope::gvk(),
            event_capacity,
            denied: DashSet::new(),
            failing_writes: AtomicUsize::new(0),
            failing_lists: AtomicUsize::new(0),
        };
        store.register_kind(&Scope::gvk(), false);
        store.register_kind(&Intent::gvk(), true);
        store
    }

    /// Serve a kind; re-registering keeps existing objects
    pub fn register_kind(&self, gvk: &GroupVersionKind, namespaced: bool) {
        let mut state = self.state.write();
        state
            .kinds
            .entry(gvk.clone())
            .or_insert_with(|| KindTable::new(KindInfo { namespaced }, self.event_capacity));
    }

    /// Revoke a permission for the permission self-check
    pub fn deny(&self, gvk: &GroupVersionKind, verb: Verb) {
        self.denied.insert((gvk.clone(), verb));
    }

    /// Make the next `count` writes fail with [`StoreError::Unavailable`]
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` lists fail with [`StoreError::Unavailable`]
    pub fn fail_next_lists(&self, count: usize) {
        self.failing_lists.store(count, Ordering::SeqCst);
    }

    /// Global revision; changes on every committed write
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.state.read().revision
    }

    fn check_available(&self) -> Result<(), StoreError> {
        Self::take_failure(&self.failing_writes)
    }

    fn take_failure(counter: &AtomicUsize) -> Result<(), StoreError> {
        let injected = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }

    fn create_locked(
        &self,
        state: &mut State,
        gvk: &GroupVersionKind,
        mut value: Value,
        manager: &str,
    ) -> Result<Value, StoreError> {
        let info = state.table(gvk)?.info;
        let mut meta = read_meta(&value)?;
        if meta.name.is_empty() {
            return Err(StoreError::Invalid("metadata.name is required".to_string()));
        }
        match (&meta.namespace, info.namespaced) {
            (Some(ns), true) if !ns.is_empty() => self.check_namespace_open(state, ns)?,
            (None, false) => {}
            (_, true) => {
                return Err(StoreError::Invalid(format!("{} requires a namespace", gvk.kind)));
            }
            (Some(_), false) => {
                return Err(StoreError::Invalid(format!("{} is not namespaced", gvk.kind)));
            }
        }

        let key = meta.key();
        if state.table(gvk)?.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: gvk.kind.clone(),
                key,
            });
        }

        let blank = ObjectMeta::default();
        meta.uid = Some(uuid::Uuid::new_v4().to_string());
        meta.generation = 1;
        meta.deletion_pending = false;
        meta.managed_fields = Vec::new();
        ownership::record_update(&blank, &mut meta, manager);
        meta.resource_version = state.next_revision();
        stamp_kind(&mut value, gvk)?;
        write_meta(&mut value, &meta)?;

        let table = state.table_mut(gvk)?;
        table.put(key.clone(), value.clone());
        table.emit(WatchEvent::Added(value.clone()));
        debug!(kind = %gvk.kind, %key, "created");
        Ok(value)
    }

    fn check_namespace_open(&self, state: &State, ns: &str) -> Result<(), StoreError> {
        let key = ObjectKey::cluster(ns);
        let scope = state.fetch(&self.namespace_kind, &key)?;
        if read_meta(&scope)?.deletion_pending {
            return Err(StoreError::Forbidden(format!(
                "unable to create new content in namespace {ns} because it is being terminated"
            )));
        }
        Ok(())
    }

    fn removable(&self, state: &State, gvk: &GroupVersionKind, meta: &ObjectMeta) -> bool {
        meta.deletion_pending
            && meta.finalizers.is_empty()
            && (*gvk != self.namespace_kind || state.contents(&meta.name).is_empty())
    }

    fn commit_locked(
        &self,
        state: &mut State,
        gvk: &GroupVersionKind,
        existing: &Value,
        mut value: Value,
        owner: Ownership<'_>,
    ) -> Result<Value, StoreError> {
        let old_meta = read_meta(existing)?;
        let mut meta = read_meta(&value)?;
        if meta.name != old_meta.name || meta.namespace != old_meta.namespace {
            return Err(StoreError::Invalid(
                "metadata.name and metadata.namespace are immutable".to_string(),
            ));
        }

        meta.uid.clone_from(&old_meta.uid);
        meta.deletion_pending = old_meta.deletion_pending;
        if let Ownership::Update(manager) = owner {
            ownership::record_update(&old_meta, &mut meta, manager);
        }
        meta.generation = if body(existing) == body(&value) {
            old_meta.generation
        } else {
            old_meta.generation + 1
        };
        meta.resource_version = old_meta.resource_version;
        stamp_kind(&mut value, gvk)?;
        write_meta(&mut value, &meta)?;
        if value == *existing {
            return Ok(value);
        }

        meta.resource_version = state.next_revision();
        write_meta(&mut value, &meta)?;
        let key = meta.key();

        if self.removable(state, gvk, &meta) {
            state.table_mut(gvk)?.take(&key);
            state.table(gvk)?.emit(WatchEvent::Deleted(value.clone()));
            debug!(kind = %gvk.kind, %key, "removed after last finalizer");
            self.after_removal(state, gvk, &key)?;
        } else {
            let table = state.table_mut(gvk)?;
            table.put(key, value.clone());
            table.emit(WatchEvent::Modified {
                old: existing.clone(),
                new: value.clone(),
            });
        }
        Ok(value)
    }

    fn delete_locked(
        &self,
        state: &mut State,
        gvk: &GroupVersionKind,
        key: &ObjectKey,
    ) -> Result<(), StoreError> {
        let existing = state.fetch(gvk, key)?;
        let mut meta = read_meta(&existing)?;
        if meta.deletion_pending {
            return Ok(());
        }
        meta.deletion_pending = true;
        meta.resource_version = state.next_revision();
        let mut value = existing.clone();
        write_meta(&mut value, &meta)?;

        if self.removable(state, gvk, &meta) {
            state.table_mut(gvk)?.take(key);
            state.table(gvk)?.emit(WatchEvent::Deleted(value));
            debug!(kind = %gvk.kind, %key, "deleted");
            return self.after_removal(state, gvk, key);
        }

        let table = state.table_mut(gvk)?;
        table.put(key.clone(), value.clone());
        table.emit(WatchEvent::Modified {
            old: existing,
            new: value,
        });
        debug!(kind = %gvk.kind, %key, "deletion pending");

        if *gvk == self.namespace_kind {
            for (content_gvk, content_key) in state.contents(&key.name) {
                self.delete_locked(state, &content_gvk, &content_key)?;
            }
        }
        Ok(())
    }

    /// Finish a terminating namespace-scope once its last object is gone
    fn after_removal(
        &self,
        state: &mut State,
        gvk: &GroupVersionKind,
        key: &ObjectKey,
    ) -> Result<(), StoreError> {
        let Some(ns) = key.namespace.as_deref() else {
            return Ok(());
        };
        if !state.table(gvk)?.info.namespaced {
            return Ok(());
        }
        let ns_key = ObjectKey::cluster(ns);
        let Some(scope) = state.table(&self.namespace_kind)?.objects.get(&ns_key).cloned() else {
            return Ok(());
        };
        let mut meta = read_meta(&scope)?;
        if !self.removable(state, &self.namespace_kind, &meta) {
            return Ok(());
        }
        meta.resource_version = state.next_revision();
        let mut value = scope;
        write_meta(&mut value, &meta)?;
        let ns_kind = self.namespace_kind.clone();
        state.table_mut(&ns_kind)?.take(&ns_key);
        state.table(&ns_kind)?.emit(WatchEvent::Deleted(value));
        debug!(namespace = ns, "namespace terminated");
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    fn register_index(&self, gvk: &GroupVersionKind, indexer: FieldIndexer) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let table = state.table_mut(gvk)?;
        if table.indexes.contains_key(indexer.name()) {
            debug!(kind = %gvk.kind, index = indexer.name(), "index already registered");
            return Ok(());
        }
        let name = indexer.name().to_string();
        let mut index = FieldIndex::new(indexer);
        for (key, value) in &table.objects {
            index.insert(key, value);
        }
        table.indexes.insert(name, index);
        Ok(())
    }

    fn watch(&self, gvk: &GroupVersionKind) -> Result<WatchStream, StoreError> {
        let rx = self.state.read().table(gvk)?.events.subscribe();
        let kind = gvk.kind.clone();
        let stream = futures::stream::unfold((rx, kind), |(mut rx, kind)| async move {
            match rx.recv().await {
                Ok(event) => Some((event, (rx, kind))),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(%kind, missed, "watcher fell behind");
                    Some((WatchEvent::Desynced, (rx, kind)))
                }
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });
        Ok(stream.boxed())
    }

    async fn get_json(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<Value, StoreError> {
        self.state.read().fetch(gvk, key)
    }

    async fn list_json(&self, gvk: &GroupVersionKind, params: &ListParams) -> Result<Vec<Value>, StoreError> {
        Self::take_failure(&self.failing_lists)?;
        let state = self.state.read();
        let table = state.table(gvk)?;
        let in_namespace =
            |key: &ObjectKey| params.namespace.is_none() || key.namespace == params.namespace;

        let items = match &params.field {
            Some((name, value)) => {
                let index = table.indexes.get(name).ok_or_else(|| {
                    StoreError::Invalid(format!("index {name} is not registered for {gvk}"))
                })?;
                index
                    .lookup(value)
                    .filter(|k| in_namespace(*k))
                    .filter_map(|k| table.objects.get(k).cloned())
                    .collect()
            }
            None => table
                .objects
                .iter()
                .filter(|(k, _)| in_namespace(*k))
                .map(|(_, v)| v.clone())
                .collect(),
        };
        Ok(items)
    }

    async fn create_json(&self, gvk: &GroupVersionKind, obj: Value, manager: &str) -> Result<Value, StoreError> {
        self.check_available()?;
        let mut state = self.state.write();
        self.create_locked(&mut state, gvk, obj, manager)
    }

    async fn update_json(&self, gvk: &GroupVersionKind, obj: Value, manager: &str) -> Result<Value, StoreError> {
        self.check_available()?;
        let meta = read_meta(&obj)?;
        let key = meta.key();
        let mut state = self.state.write();
        let existing = state.fetch(gvk, &key)?;
        let current = read_meta(&existing)?.resource_version;
        if meta.resource_version != current {
            return Err(StoreError::conflict(
                &key,
                format!(
                    "resourceVersion {} does not match {current}",
                    meta.resource_version
                ),
            ));
        }
        self.commit_locked(&mut state, gvk, &existing, obj, Ownership::Update(manager))
    }

    async fn merge_patch(
        &self,
        gvk: &GroupVersionKind,
        key: &ObjectKey,
        patch: &Value,
        resource_version: Option<u64>,
        manager: &str,
    ) -> Result<Value, StoreError> {
        self.check_available()?;
        let mut state = self.state.write();
        let existing = state.fetch(gvk, key)?;
        check_precondition(key, &existing, resource_version)?;
        let mut value = existing.clone();
        merge::merge_patch(&mut value, patch);
        self.commit_locked(&mut state, gvk, &existing, value, Ownership::Update(manager))
    }

    async fn apply_metadata(
        &self,
        gvk: &GroupVersionKind,
        key: &ObjectKey,
        apply: &MetadataApply,
    ) -> Result<Value, StoreError> {
        self.check_available()?;
        let mut state = self.state.write();
        let existing = state.fetch(gvk, key)?;
        check_precondition(key, &existing, apply.resource_version)?;
        let mut meta = read_meta(&existing)?;
        ownership::apply(&mut meta, apply).map_err(|fields| {
            StoreError::conflict(
                key,
                format!(
                    "Apply failed with {} conflict(s): {}",
                    fields.len(),
                    fields.join(", ")
                ),
            )
        })?;
        let mut value = existing.clone();
        write_meta(&mut value, &meta)?;
        self.commit_locked(&mut state, gvk, &existing, value, Ownership::Applied)
    }

    async fn delete(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.write();
        self.delete_locked(&mut state, gvk, key)
    }

    async fn resolve_kind(&self, gvk: &GroupVersionKind) -> Result<Option<KindInfo>, StoreError> {
        Ok(self.state.read().kinds.get(gvk).map(|t| t.info))
    }

    async fn access_allowed(&self, gvk: &GroupVersionKind, verb: Verb) -> Result<bool, StoreError> {
        Ok(!self.denied.contains(&(gvk.clone(), verb)))
    }
}

fn check_precondition(key: &ObjectKey, existing: &Value, expected: Option<u64>) -> Result<(), StoreError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let current = read_meta(existing)?.resource_version;
    if current != expected {
        return Err(StoreError::conflict(
            key,
            format!("resourceVersion {expected} does not match {current}"),
        ));
    }
    Ok(())
}

/// Decode the `metadata` member of an object
///
/// # Errors
/// Returns [`StoreError::Invalid`] if metadata is missing or malformed.
pub fn read_meta(value: &Value) -> Result<ObjectMeta, StoreError> {
    let meta = value
        .get("metadata")
        .ok_or_else(|| StoreError::Invalid("metadata is required".to_string()))?;
    serde_json::from_value(meta.clone()).map_err(|e| StoreError::Invalid(format!("metadata: {e}")))
}

fn write_meta(value: &mut Value, meta: &ObjectMeta) -> Result<(), StoreError> {
    let map = value
        .as_object_mut()
        .ok_or_else(|| StoreError::Invalid("object must be a map".to_string()))?;
    map.insert("metadata".to_string(), serde_json::to_value(meta)?);
    Ok(())
}

fn stamp_kind(value: &mut Value, gvk: &GroupVersionKind) -> Result<(), StoreError> {
    let map = value
        .as_object_mut()
        .ok_or_else(|| StoreError::Invalid("object must be a map".to_string()))?;
    map.insert("apiVersion".to_string(), Value::String(gvk.api_version()));
    map.insert("kind".to_string(), Value::String(gvk.kind.clone()));
    Ok(())
}

/// Everything outside metadata and status
fn body(value: &Value) -> Map<String, Value> {
    value
        .as_object()
        .map(|map| {
            map.iter()
                .filter(|(k, _)| !matches!(k.as_str(), "metadata" | "status"))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ObjectStoreExt;
    use canopy_model::{markers, DynamicObject, Object, Role};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn config_map_gvk() -> GroupVersionKind {
        GroupVersionKind::new("", "v1", "ConfigMap")
    }

    async fn store_with_root() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.register_kind(&config_map_gvk(), true);
        store
            .create(&Scope::gvk(), &Scope::new("root").with_role(Role::Root), "test")
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn create_assigns_server_fields() {
        let store = store_with_root().await;
        let root: Scope = store.get(&Scope::gvk(), &ObjectKey::cluster("root")).await.unwrap();
        assert!(root.metadata.uid.is_some());
        assert_eq!(root.metadata.generation, 1);
        assert_eq!(root.metadata.resource_version, store.revision());
        assert_eq!(root.metadata.managed_fields.len(), 1);

        let dup = store.create(&Scope::gvk(), &Scope::new("root"), "test").await;
        assert!(dup.unwrap_err().is_already_exists());
    }

    #[tokio::test]
    async fn update_requires_matching_version() {
        let store = store_with_root().await;
        let mut root: Scope = store.get(&Scope::gvk(), &ObjectKey::cluster("root")).await.unwrap();
        let stale = root.clone();

        root = root.with_label("team", "neco");
        store.update(&Scope::gvk(), &root, "test").await.unwrap();

        let err = store
            .update(&Scope::gvk(), &stale.with_label("team", "other"), "test")
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn noop_writes_do_not_bump_revision() {
        let store = store_with_root().await;
        let root: Scope = store.get(&Scope::gvk(), &ObjectKey::cluster("root")).await.unwrap();
        let before = store.revision();
        store.update(&Scope::gvk(), &root, "test").await.unwrap();
        store
            .merge_patch(&Scope::gvk(), &root.key(), &json!({}), None, "test")
            .await
            .unwrap();
        assert_eq!(store.revision(), before);
    }

    #[tokio::test]
    async fn generation_tracks_body_changes_only() {
        let store = store_with_root().await;
        let cm = DynamicObject::new(&config_map_gvk(), "root", "cm").with_field("data", json!({"k": "1"}));
        let created: DynamicObject = store.create(&config_map_gvk(), &cm, "test").await.unwrap();
        assert_eq!(created.metadata.generation, 1);

        let labeled: DynamicObject = store
            .patch(
                &config_map_gvk(),
                &cm.key(),
                &json!({"metadata": {"labels": {"a": "b"}}}),
                None,
                "test",
            )
            .await
            .unwrap();
        assert_eq!(labeled.metadata.generation, 1);

        let changed: DynamicObject = store
            .patch(&config_map_gvk(), &cm.key(), &json!({"data": {"k": "2"}}), None, "test")
            .await
            .unwrap();
        assert_eq!(changed.metadata.generation, 2);
    }

    #[tokio::test]
    async fn finalizers_gate_removal() {
        let store = store_with_root().await;
        let mut intent = Intent::new("root", "sub");
        intent.metadata.finalizers.push(markers::FINALIZER.to_string());
        store.create(&Intent::gvk(), &intent, "test").await.unwrap();

        store.delete(&Intent::gvk(), &intent.key()).await.unwrap();
        let pending: Intent = store.get(&Intent::gvk(), &intent.key()).await.unwrap();
        assert!(pending.deletion_pending());

        store
            .merge_patch(
                &Intent::gvk(),
                &intent.key(),
                &json!({"metadata": {"finalizers": null}}),
                None,
                "test",
            )
            .await
            .unwrap();
        let gone = store.get::<Intent>(&Intent::gvk(), &intent.key()).await;
        assert!(gone.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn terminating_scope_waits_for_contents() {
        let store = store_with_root().await;
        let mut intent = Intent::new("root", "sub");
        intent.metadata.finalizers.push(markers::FINALIZER.to_string());
        store.create(&Intent::gvk(), &intent, "test").await.unwrap();
        store
            .create(&config_map_gvk(), &DynamicObject::new(&config_map_gvk(), "root", "cm"), "test")
            .await
            .unwrap();

        store.delete(&Scope::gvk(), &ObjectKey::cluster("root")).await.unwrap();
        let root: Scope = store.get(&Scope::gvk(), &ObjectKey::cluster("root")).await.unwrap();
        assert!(root.deletion_pending());
        let cms = store.list_json(&config_map_gvk(), &ListParams::default()).await.unwrap();
        assert!(cms.is_empty());

        let err = store
            .create(&config_map_gvk(), &DynamicObject::new(&config_map_gvk(), "root", "cm2"), "test")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Forbidden(_)));

        store
            .merge_patch(
                &Intent::gvk(),
                &intent.key(),
                &json!({"metadata": {"finalizers": null}}),
                None,
                "test",
            )
            .await
            .unwrap();
        assert!(store
            .get_opt::<Scope>(&Scope::gvk(), &ObjectKey::cluster("root"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn index_lookup() {
        let store = store_with_root().await;
        store
            .register_index(
                &Scope::gvk(),
                FieldIndexer::new(markers::INDEX_SCOPE_PARENT, |obj| {
                    crate::index::label_of(obj, markers::LABEL_PARENT)
                        .map(str::to_string)
                        .into_iter()
                        .collect()
                }),
            )
            .unwrap();
        store
            .create(&Scope::gvk(), &Scope::new("sub").with_parent("root"), "test")
            .await
            .unwrap();

        let children: Vec<Scope> = store
            .list(
                &Scope::gvk(),
                &ListParams::default().matching(markers::INDEX_SCOPE_PARENT, "root"),
            )
            .await
            .unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name(), "sub");

        let unknown = store
            .list_json(&Scope::gvk(), &ListParams::default().matching("nope", "x"))
            .await;
        assert!(matches!(unknown, Err(StoreError::Invalid(_))));
    }

    #[tokio::test]
    async fn watch_delivers_events() {
        let store = store_with_root().await;
        let mut events = store.watch(&Scope::gvk()).unwrap();

        store.create(&Scope::gvk(), &Scope::new("other"), "test").await.unwrap();
        store.delete(&Scope::gvk(), &ObjectKey::cluster("other")).await.unwrap();

        match events.next().await.unwrap() {
            WatchEvent::Added(obj) => assert_eq!(obj["metadata"]["name"], "other"),
            other => panic!("unexpected event {other:?}"),
        }
        match events.next().await.unwrap() {
            WatchEvent::Deleted(obj) => assert_eq!(obj["metadata"]["deletionPending"], true),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn apply_metadata_conflicts_without_force() {
        let store = store_with_root().await;
        store
            .merge_patch(
                &Scope::gvk(),
                &ObjectKey::cluster("root"),
                &json!({"metadata": {"labels": {"team": "a"}}}),
                None,
                "user",
            )
            .await
            .unwrap();

        let mut apply = MetadataApply::new("ctrl");
        apply.labels.insert("team".into(), "b".into());
        let err = store
            .apply_metadata(&Scope::gvk(), &ObjectKey::cluster("root"), &apply)
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let applied = store
            .apply_metadata(&Scope::gvk(), &ObjectKey::cluster("root"), &apply.forced())
            .await
            .unwrap();
        assert_eq!(applied["metadata"]["labels"]["team"], "b");
    }

    #[tokio::test]
    async fn injected_failures_are_transient() {
        let store = store_with_root().await;
        store.fail_next_writes(1);
        let err = store
            .create(&Scope::gvk(), &Scope::new("a"), "test")
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        store.create(&Scope::gvk(), &Scope::new("a"), "test").await.unwrap();
    }

    #[tokio::test]
    async fn injected_list_failures_leave_writes_alone() {
        let store = store_with_root().await;
        store.fail_next_lists(1);
        store.create(&Scope::gvk(), &Scope::new("a"), "test").await.unwrap();
        let err = store
            .list::<Scope>(&Scope::gvk(), &ListParams::default())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        let scopes = store.list::<Scope>(&Scope::gvk(), &ListParams::default()).await.unwrap();
        assert_eq!(scopes.len(), 2);
    }

    #[tokio::test]
    async fn namespaced_objects_need_a_live_scope() {
        let store = store_with_root().await;
        let err = store
            .create(&config_map_gvk(), &DynamicObject::new(&config_map_gvk(), "missing", "cm"), "test")
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        store.deny(&config_map_gvk(), Verb::Delete);
        assert!(!store.access_allowed(&config_map_gvk(), Verb::Delete).await.unwrap());
        assert!(store.access_allowed(&config_map_gvk(), Verb::Get).await.unwrap());
    }
}
