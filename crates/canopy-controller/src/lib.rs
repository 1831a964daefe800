//! Canopy controller
//!
//! The reconcile loops that keep a scope hierarchy converged:
//! - [`scope::ScopeReconciler`]: metadata propagation and the scope-driven
//!   resource pass
//! - [`lifecycle::IntentReconciler`]: intents to scopes, conflicts,
//!   finalization
//! - [`resource::ResourceReconciler`]: object-driven propagation of one
//!   watched kind
//!
//! [`Manager`] builds all of them from a [`canopy_model::ValidatedConfig`]
//! and runs them over one store, or steps them to a fixed point with
//! [`Manager::settle`].
//!
//! # Example
//!
//! ```rust,ignore
//! use canopy_controller::{guard, Manager, ManagerOptions};
//! use canopy_store::InMemoryStore;
//! use std::sync::Arc;
//!
//! let config = canopy_model::Config::from_file("canopy.yaml")?.validate()?;
//! let options = ManagerOptions::default();
//! let store = guard(Arc::new(InMemoryStore::new()), &config, &options)?;
//! let manager = Manager::new(store, config, options).await?;
//! manager.run(shutdown).await;
//! ```

#![warn(unreachable_pub)]

pub mod error;
pub mod indexing;
pub mod lifecycle;
pub mod manager;
pub mod metadata;
pub mod resource;
pub mod runtime;
pub mod scope;
pub mod simulate;
pub mod startup;

pub use error::{ReconcileError, StartupError};
pub use manager::{guard, Manager, ManagerOptions};
pub use metadata::MetadataPropagator;
pub use runtime::{Action, Backoff, Controller, Reconciler, WatchSource, WorkQueue};
pub use startup::validate_watched_kinds;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
