//! Intent reconciler
//!
//! Performs the step [`observe`] picks and nothing else; the next event or
//! requeue looks again.

use super::state::{desired_status, observe, LifecycleState, Step};
use crate::error::ReconcileError;
use crate::runtime::{Action, Reconciler, WatchSource};
use async_trait::async_trait;
use canopy_model::{markers, Intent, IntentState, Object, ObjectKey, Scope};
use canopy_store::merge::diff;
use canopy_store::{ignore_not_found, read_meta, ListParams, ObjectStore, ObjectStoreExt, StoreError, WatchEvent};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long to wait before looking at a scope being deleted again
pub const FINALIZE_POLL: Duration = Duration::from_millis(200);

/// Materializes intents into scopes, keyed by intent
#[derive(Clone)]
pub struct IntentReconciler {
    store: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for IntentReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentReconciler").finish_non_exhaustive()
    }
}

impl IntentReconciler {
    /// Create new reconciler writing through `store`
    ///
    /// Scopes are created through this store, so it should be the admitted
    /// one.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    async fn create_scope(&self, intent: &Intent) -> Result<Action, ReconcileError> {
        let scope = Scope::new(intent.name())
            .with_parent(intent.owning_scope())
            .with_label(markers::LABEL_CREATED_BY, markers::CREATED_BY);
        match self.store.create(&Scope::gvk(), &scope, markers::FIELD_MANAGER).await {
            Ok(_) => {
                info!(intent = %intent.key(), "created a sub namespace");
                self.record_status(intent, IntentState::Ok).await?;
                Ok(Action::Done)
            }
            Err(e) if e.is_already_exists() => {
                debug!(intent = %intent.key(), "scope appeared concurrently");
                Ok(Action::RequeueAfter(Duration::ZERO))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn record_status(&self, intent: &Intent, state: IntentState) -> Result<(), ReconcileError> {
        let status = desired_status(intent, state, chrono::Utc::now());
        if status == intent.status {
            return Ok(());
        }
        let old = serde_json::to_value(&intent.status).map_err(StoreError::from)?;
        let new = serde_json::to_value(&status).map_err(StoreError::from)?;
        let patch = json!({ "status": diff(&old, &new) });
        self.store
            .merge_patch(
                &Intent::gvk(),
                &intent.key(),
                &patch,
                Some(intent.metadata.resource_version),
                markers::FIELD_MANAGER,
            )
            .await?;
        if state == IntentState::Conflict {
            warn!(intent = %intent.key(), "a scope of the same name exists under another parent");
        }
        Ok(())
    }

    async fn delete_scope(&self, intent: &Intent) -> Result<Action, ReconcileError> {
        ignore_not_found(self.store.delete(&Scope::gvk(), &ObjectKey::cluster(intent.name())).await)
            .map_err(|source| ReconcileError::Finalization {
                intent: intent.key().to_string(),
                source,
            })?;
        info!(intent = %intent.key(), "deleting the sub namespace");
        Ok(Action::RequeueAfter(FINALIZE_POLL))
    }

    async fn release_finalizer(&self, intent: &Intent) -> Result<(), ReconcileError> {
        let remaining: Vec<&String> = intent
            .metadata
            .finalizers
            .iter()
            .filter(|f| *f != markers::FINALIZER)
            .collect();
        let patch = json!({ "metadata": { "finalizers": remaining } });
        self.store
            .merge_patch(
                &Intent::gvk(),
                &intent.key(),
                &patch,
                Some(intent.metadata.resource_version),
                markers::FIELD_MANAGER,
            )
            .await?;
        info!(intent = %intent.key(), "finalizer removed");
        Ok(())
    }
}

/// Intents affected by a scope event
///
/// Lookup failures are returned so the event is retried.
async fn intents_for_scope(store: Arc<dyn ObjectStore>, event: WatchEvent) -> Result<Vec<ObjectKey>, ReconcileError> {
    let Some(value) = (match &event {
        WatchEvent::Modified { new, .. } => Some(new),
        WatchEvent::Deleted(obj) => Some(obj),
        WatchEvent::Added(_) | WatchEvent::Desynced => None,
    }) else {
        return Ok(Vec::new());
    };
    let Ok(scope) = serde_json::from_value::<Scope>(value.clone()) else {
        return Ok(Vec::new());
    };
    if let Some(parent) = scope.parent_ref() {
        return Ok(vec![ObjectKey::namespaced(parent, scope.name())]);
    }
    if !scope.deletion_pending() {
        return Ok(Vec::new());
    }

    let params = ListParams::default().matching(markers::INDEX_INTENT_NAME, scope.name());
    let intents = store.list::<Intent>(&Intent::gvk(), &params).await?;
    Ok(intents.iter().map(Object::key).collect())
}

#[async_trait]
impl Reconciler for IntentReconciler {
    type Key = ObjectKey;

    fn name(&self) -> &'static str {
        "intent"
    }

    fn sources(&self) -> Vec<WatchSource<ObjectKey>> {
        let store = Arc::clone(&self.store);
        vec![
            WatchSource::sync(Intent::gvk(), |event: &WatchEvent| {
                event
                    .object()
                    .and_then(|obj| read_meta(obj).ok())
                    .map(|meta| meta.key())
                    .into_iter()
                    .collect()
            }),
            WatchSource::new(Scope::gvk(), move |event| intents_for_scope(Arc::clone(&store), event)),
        ]
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        let intent: Option<Intent> = self.store.get_opt(&Intent::gvk(), key).await?;
        let scope: Option<Scope> = self
            .store
            .get_opt(&Scope::gvk(), &ObjectKey::cluster(&key.name))
            .await?;

        let (state, step) = observe(intent.as_ref(), scope.as_ref());
        debug!(%key, %state, ?step, "observed intent");
        let Some(intent) = intent else {
            return Ok(Action::Done);
        };

        match step {
            Step::CreateScope => self.create_scope(&intent).await,
            Step::RecordStatus(status) => {
                self.record_status(&intent, status).await?;
                Ok(Action::Done)
            }
            Step::DeleteScope => self.delete_scope(&intent).await,
            Step::ReleaseFinalizer => {
                self.release_finalizer(&intent).await?;
                Ok(Action::Done)
            }
            Step::Wait => {
                if state == LifecycleState::Finalizing {
                    debug!(%key, "waiting for removal");
                }
                Ok(Action::Done)
            }
        }
    }
}
