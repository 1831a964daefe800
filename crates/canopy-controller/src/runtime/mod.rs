//! Reconcile runtime: work queue, controller loop, backoff

pub mod controller;
pub mod queue;

pub use controller::{Action, Controller, KeyMapper, Reconciler, WatchSource};
pub use queue::{Backoff, WorkQueue};
