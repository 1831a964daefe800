//! Controller loop
//!
//! Watch streams are the producers, the worker pool is the consumer, and the
//! [`WorkQueue`] between them deduplicates by key. A controller can run
//! freely ([`Controller::run`]) or be stepped by a driver that wants a
//! deterministic fixed point ([`Controller::absorb`], [`Controller::drain`]).

use super::queue::{Backoff, WorkQueue};
use crate::error::ReconcileError;
use async_trait::async_trait;
use canopy_model::GroupVersionKind;
use canopy_store::{ListParams, ObjectStore, StoreError, WatchEvent, WatchStream};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info_span, warn, Instrument};

/// Outcome of a successful reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Converged for now; wait for the next event
    Done,
    /// Look again after a delay
    RequeueAfter(Duration),
}

/// Maps a watch event of one kind to the keys it affects
///
/// A mapper that needs the store may fail; the event is then retried rather
/// than dropped.
pub type KeyMapper<K> = Arc<dyn Fn(WatchEvent) -> BoxFuture<'static, Result<Vec<K>, ReconcileError>> + Send + Sync>;

/// One watched kind feeding a controller
pub struct WatchSource<K> {
    gvk: GroupVersionKind,
    mapper: KeyMapper<K>,
}

impl<K> WatchSource<K> {
    /// Create a source from a fallible async mapper
    pub fn new<F, Fut>(gvk: GroupVersionKind, mapper: F) -> Self
    where
        F: Fn(WatchEvent) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Vec<K>, ReconcileError>> + Send + 'static,
    {
        Self {
            gvk,
            mapper: Arc::new(move |event| mapper(event).boxed()),
        }
    }

    /// Create a source from a synchronous mapper
    pub fn sync<F>(gvk: GroupVersionKind, mapper: F) -> Self
    where
        F: Fn(&WatchEvent) -> Vec<K> + Send + Sync + 'static,
        K: Send + 'static,
    {
        Self::new(gvk, move |event| futures::future::ready(Ok(mapper(&event))))
    }

    /// Watched kind
    #[inline]
    #[must_use]
    pub fn gvk(&self) -> &GroupVersionKind {
        &self.gvk
    }
}

impl<K> Clone for WatchSource<K> {
    fn clone(&self) -> Self {
        Self {
            gvk: self.gvk.clone(),
            mapper: Arc::clone(&self.mapper),
        }
    }
}

impl<K> fmt::Debug for WatchSource<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchSource").field("gvk", &self.gvk).finish_non_exhaustive()
    }
}

/// A reconcile function over one key type
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    /// Work item identity
    type Key: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;

    /// Controller name for logs and metrics
    fn name(&self) -> &'static str;

    /// Kinds to watch and how their events map to keys
    fn sources(&self) -> Vec<WatchSource<Self::Key>>;

    /// Drive the state behind `key` one step toward the desired state
    ///
    /// Must be idempotent and computed from currently observed state only.
    async fn reconcile(&self, key: &Self::Key) -> Result<Action, ReconcileError>;
}

/// Queue, watch pumps and workers around one [`Reconciler`]
pub struct Controller<R: Reconciler> {
    reconciler: Arc<R>,
    store: Arc<dyn ObjectStore>,
    queue: Arc<WorkQueue<R::Key>>,
    sources: Vec<WatchSource<R::Key>>,
    streams: Mutex<Vec<WatchStream>>,
    deferred: Mutex<Vec<(usize, WatchEvent)>>,
    backoff: Backoff,
}

impl<R: Reconciler> fmt::Debug for Controller<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("name", &self.reconciler.name())
            .field("sources", &self.sources)
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

impl<R: Reconciler> Controller<R> {
    /// Create a controller and subscribe to its sources
    ///
    /// Subscribing happens here, before any initial listing, so nothing
    /// written in between is missed.
    ///
    /// # Errors
    /// Returns [`StoreError::UnknownKind`] if a source kind is not served.
    pub fn new(store: Arc<dyn ObjectStore>, reconciler: R, backoff: Backoff) -> Result<Self, StoreError> {
        let sources = reconciler.sources();
        let streams = sources
            .iter()
            .map(|s| store.watch(&s.gvk))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            reconciler: Arc::new(reconciler),
            store,
            queue: Arc::new(WorkQueue::new(backoff)),
            sources,
            streams: Mutex::new(streams),
            deferred: Mutex::new(Vec::new()),
            backoff,
        })
    }

    /// Controller name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.reconciler.name()
    }

    /// The reconciler
    #[inline]
    #[must_use]
    pub fn reconciler(&self) -> &R {
        &self.reconciler
    }

    /// Queue a key by hand
    pub fn enqueue(&self, key: R::Key) {
        self.queue.add(key);
    }

    /// Number of keys waiting
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Number of watch events whose mapping failed and awaits a retry
    #[must_use]
    pub fn deferred(&self) -> usize {
        self.deferred.lock().len()
    }

    /// List every source kind and queue the keys of all existing objects
    ///
    /// # Errors
    /// Returns the first listing failure.
    pub async fn prime(&self) -> Result<(), ReconcileError> {
        for source in &self.sources {
            self.relist(source).await?;
        }
        Ok(())
    }

    async fn relist(&self, source: &WatchSource<R::Key>) -> Result<(), ReconcileError> {
        let objects = self.store.list_json(&source.gvk, &ListParams::default()).await?;
        for obj in objects {
            for key in (source.mapper)(WatchEvent::Added(obj)).await? {
                self.queue.add(key);
            }
        }
        Ok(())
    }

    async fn map_event(&self, source: &WatchSource<R::Key>, event: WatchEvent) -> Result<(), ReconcileError> {
        if event == WatchEvent::Desynced {
            return self.relist(source).await;
        }
        for key in (source.mapper)(event).await? {
            self.queue.add(key);
        }
        Ok(())
    }

    /// Move every event already delivered by the watches into the queue
    ///
    /// Events deferred by an earlier failed mapping are retried first; one
    /// that fails again stays deferred. Returns the number of events handled.
    pub async fn absorb(&self) -> usize {
        // receiving draws on the task's cooperative budget; start from a fresh one
        tokio::task::yield_now().await;
        let mut ready = std::mem::take(&mut *self.deferred.lock());
        {
            let mut streams = self.streams.lock();
            for (i, stream) in streams.iter_mut().enumerate() {
                while let Some(Some(event)) = stream.next().now_or_never() {
                    ready.push((i, event));
                }
            }
        }
        let count = ready.len();
        for (i, event) in ready {
            if let Err(e) = self.map_event(&self.sources[i], event.clone()).await {
                warn!(controller = self.name(), error = %e, "failed to map a watch event, deferring");
                self.deferred.lock().push((i, event));
            }
        }
        count
    }

    /// Reconcile every key queued right now, once, on the calling task
    ///
    /// Keys requeued by these reconciles wait for the next call, without
    /// their delay or backoff. Returns the number of reconciles run.
    pub async fn drain(&self) -> usize {
        let batch = self.queue.len();
        let mut ran = 0;
        for _ in 0..batch {
            let Some(key) = self.queue.try_get() else {
                break;
            };
            let requeue = match self.reconcile_logged(&key).await {
                Ok(Action::Done) => false,
                Ok(Action::RequeueAfter(_)) => true,
                Err(e) => e.is_retryable(),
            };
            self.queue.done(&key);
            if requeue {
                self.queue.add(key);
            }
            ran += 1;
        }
        ran
    }

    async fn reconcile_logged(&self, key: &R::Key) -> Result<Action, ReconcileError> {
        let name = self.name();
        let span = info_span!("reconcile", controller = name, key = %key);
        let result = self.reconciler.reconcile(key).instrument(span.clone()).await;
        let outcome = match &result {
            Ok(Action::Done) => "success",
            Ok(Action::RequeueAfter(_)) => "requeue",
            Err(e) if e.is_retryable() => {
                span.in_scope(|| warn!(error = %e, "reconcile failed, retrying"));
                "error"
            }
            Err(e) => {
                span.in_scope(|| error!(error = %e, "reconcile failed"));
                "error"
            }
        };
        metrics::counter!("canopy_reconcile_total", "controller" => name, "result" => outcome).increment(1);
        result
    }

    async fn process(&self, key: R::Key) {
        match self.reconcile_logged(&key).await {
            Ok(Action::Done) => self.queue.forget(&key),
            Ok(Action::RequeueAfter(delay)) => {
                self.queue.forget(&key);
                self.queue.add_after(key.clone(), delay);
            }
            Err(e) if e.is_retryable() => self.queue.add_rate_limited(key.clone()),
            Err(_) => self.queue.forget(&key),
        }
        self.queue.done(&key);
    }

    /// Run watch pumps and `workers` workers until `shutdown` flips to true
    ///
    /// # Errors
    /// Returns an error if the initial listing fails.
    pub async fn run(self: Arc<Self>, workers: usize, mut shutdown: watch::Receiver<bool>) -> Result<(), ReconcileError> {
        self.prime().await?;

        let mut pumps = JoinSet::new();
        let streams: Vec<WatchStream> = std::mem::take(&mut *self.streams.lock());
        for (i, mut stream) in streams.into_iter().enumerate() {
            let this = Arc::clone(&self);
            pumps.spawn(async move {
                while let Some(event) = stream.next().await {
                    let mut failures = 0;
                    while let Err(e) = this.map_event(&this.sources[i], event.clone()).await {
                        failures += 1;
                        warn!(controller = this.name(), error = %e, failures, "failed to map a watch event, retrying");
                        tokio::time::sleep(this.backoff.delay(failures)).await;
                    }
                }
            });
        }

        let mut pool = JoinSet::new();
        for _ in 0..workers.max(1) {
            let this = Arc::clone(&self);
            pool.spawn(async move {
                while let Some(key) = this.queue.get().await {
                    this.process(key).await;
                }
            });
        }
        debug!(controller = self.name(), workers, "controller started");

        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
        self.queue.shutdown();
        pumps.abort_all();
        while pool.join_next().await.is_some() {}
        debug!(controller = self.name(), "controller stopped");
        Ok(())
    }
}
