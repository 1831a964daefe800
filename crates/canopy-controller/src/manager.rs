//! Manager: wires every controller to one store and runs them together

use crate::error::{ReconcileError, StartupError};
use crate::indexing::register_indexes;
use crate::lifecycle::IntentReconciler;
use crate::metadata::MetadataPropagator;
use crate::resource::{ResourcePropagator, ResourceReconciler};
use crate::runtime::{Backoff, Controller};
use crate::scope::ScopeReconciler;
use crate::startup::validate_watched_kinds;
use canopy_hierarchy::{register_scope_indexes, AdmissionGate, AdmittedStore, DEFAULT_REVIEW_TIMEOUT};
use canopy_model::ValidatedConfig;
use canopy_store::{ObjectStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Runtime knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerOptions {
    /// Workers per controller
    pub workers: usize,
    /// Deadline for one admission review
    pub admission_timeout: Duration,
    /// Retry backoff for failed reconciles
    pub backoff: Backoff,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            admission_timeout: DEFAULT_REVIEW_TIMEOUT,
            backoff: Backoff::default(),
        }
    }
}

/// Put the admission gate in front of `inner`
///
/// # Errors
/// Returns [`StoreError::UnknownKind`] if `inner` does not serve scopes.
pub fn guard<S: ObjectStore + 'static>(
    inner: Arc<S>,
    config: &ValidatedConfig,
    options: &ManagerOptions,
) -> Result<Arc<AdmittedStore<S>>, StoreError> {
    register_scope_indexes(inner.as_ref())?;
    let gate = AdmissionGate::new(Arc::clone(&inner), config.naming_policies.clone())
        .with_timeout(options.admission_timeout);
    Ok(Arc::new(AdmittedStore::new(inner, gate)))
}

/// The scope controller, the intent controller, and one resource controller
/// per watched kind
#[derive(Debug)]
pub struct Manager {
    scopes: Arc<Controller<ScopeReconciler>>,
    intents: Arc<Controller<IntentReconciler>>,
    resources: Vec<Arc<Controller<ResourceReconciler>>>,
    workers: usize,
}

impl Manager {
    /// Validate watched kinds, register indexes, and build every controller
    ///
    /// `store` should be guarded (see [`guard`]) so that the controllers'
    /// own scope writes are reviewed like everyone else's.
    ///
    /// # Errors
    /// Returns [`StartupError`] if a watched kind is unusable or the store
    /// refuses index registration or watches.
    pub async fn new(
        store: Arc<dyn ObjectStore>,
        config: ValidatedConfig,
        options: ManagerOptions,
    ) -> Result<Self, StartupError> {
        validate_watched_kinds(store.as_ref(), &config.watches).await?;
        register_indexes(store.as_ref(), &config.watches)?;

        let config = Arc::new(config);
        let propagators: Vec<ResourcePropagator> = config
            .watches
            .iter()
            .map(|gvk| ResourcePropagator::new(gvk.clone(), Arc::clone(&store), Arc::clone(&config)))
            .collect();

        let metadata = MetadataPropagator::new(Arc::clone(&store), Arc::clone(&config));
        let scopes = Controller::new(
            Arc::clone(&store),
            ScopeReconciler::new(Arc::clone(&store), metadata, propagators.clone()),
            options.backoff,
        )?;
        let intents = Controller::new(
            Arc::clone(&store),
            IntentReconciler::new(Arc::clone(&store)),
            options.backoff,
        )?;
        let resources = propagators
            .into_iter()
            .map(|p| Controller::new(Arc::clone(&store), ResourceReconciler::new(p), options.backoff).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        info!(kinds = config.watches.len(), workers = options.workers, "manager ready");
        Ok(Self {
            scopes: Arc::new(scopes),
            intents: Arc::new(intents),
            resources,
            workers: options.workers,
        })
    }

    /// Run every controller until `shutdown` flips to true
    ///
    /// A controller that fails to start is logged; the others keep running.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let mut set = JoinSet::new();
        set.spawn(Arc::clone(&self.scopes).run(self.workers, shutdown.clone()));
        set.spawn(Arc::clone(&self.intents).run(self.workers, shutdown.clone()));
        for controller in &self.resources {
            set.spawn(Arc::clone(controller).run(self.workers, shutdown.clone()));
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "controller stopped with an error"),
                Err(e) => error!(error = %e, "controller task panicked"),
            }
        }
        info!("manager stopped");
    }

    /// Queue every existing object on every controller
    ///
    /// Stepping drivers call this once before [`Manager::settle`]; after
    /// that only watch events feed the queues. [`Manager::run`] primes on
    /// its own.
    ///
    /// # Errors
    /// Returns the first listing failure.
    pub async fn prime(&self) -> Result<(), ReconcileError> {
        self.scopes.prime().await?;
        self.intents.prime().await?;
        for controller in &self.resources {
            controller.prime().await?;
        }
        Ok(())
    }

    /// One stepping round: absorb delivered events, then reconcile what is
    /// queued. Returns `(events, reconciles)`.
    async fn step(&self) -> (usize, usize) {
        let mut events = self.scopes.absorb().await + self.intents.absorb().await;
        for controller in &self.resources {
            events += controller.absorb().await;
        }
        let mut ran = self.scopes.drain().await + self.intents.drain().await;
        for controller in &self.resources {
            ran += controller.drain().await;
        }
        (events, ran)
    }

    /// Drive every controller on the calling task until a round neither sees
    /// an event nor runs a reconcile
    ///
    /// Only queued keys and delivered events are processed; nothing is
    /// relisted. Returns the number of rounds taken.
    ///
    /// # Errors
    /// Returns [`ReconcileError::NotQuiescent`] if `max_rounds` is not enough.
    pub async fn settle(&self, max_rounds: usize) -> Result<usize, ReconcileError> {
        for round in 1..=max_rounds {
            let (events, ran) = self.step().await;
            debug!(round, events, ran, "settle round");
            if events == 0 && ran == 0 {
                return Ok(round);
            }
        }
        Err(ReconcileError::NotQuiescent(max_rounds))
    }
}
