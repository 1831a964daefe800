//! Object-driven reconciler for one watched kind

use super::propagator::ResourcePropagator;
use crate::error::ReconcileError;
use crate::runtime::{Action, Reconciler, WatchSource};
use async_trait::async_trait;
use canopy_model::{DynamicObject, ObjectKey};
use canopy_store::{read_meta, WatchEvent};
use serde_json::Value;

/// Reconciles origins and copies of one kind, keyed by object
#[derive(Debug, Clone)]
pub struct ResourceReconciler {
    propagator: ResourcePropagator,
}

impl ResourceReconciler {
    /// Create new reconciler
    pub fn new(propagator: ResourcePropagator) -> Self {
        Self { propagator }
    }

    /// The propagator
    #[inline]
    #[must_use]
    pub fn propagator(&self) -> &ResourcePropagator {
        &self.propagator
    }
}

fn candidate(propagator: &ResourcePropagator, value: Option<&Value>) -> bool {
    value
        .and_then(|v| serde_json::from_value::<DynamicObject>(v.clone()).ok())
        .is_some_and(|obj| propagator.is_candidate(&obj))
}

#[async_trait]
impl Reconciler for ResourceReconciler {
    type Key = ObjectKey;

    fn name(&self) -> &'static str {
        "resource"
    }

    fn sources(&self) -> Vec<WatchSource<ObjectKey>> {
        let propagator = self.propagator.clone();
        vec![WatchSource::sync(self.propagator.gvk().clone(), move |event: &WatchEvent| {
            if !candidate(&propagator, event.object()) && !candidate(&propagator, event.old_object()) {
                return Vec::new();
            }
            event
                .object()
                .and_then(|obj| read_meta(obj).ok())
                .map(|meta| meta.key())
                .into_iter()
                .collect()
        })]
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        self.propagator.reconcile_object(key).await?;
        Ok(Action::Done)
    }
}
