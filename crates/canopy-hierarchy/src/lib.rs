//! Canopy hierarchy
//!
//! Everything that reasons about the shape of the scope tree:
//! - [`HierarchyResolver`]: roles, ancestor chains, roots, children
//! - [`HierarchyGraph`]: whole-hierarchy snapshot on petgraph
//! - [`AdmissionGate`]: validation of scope and intent writes
//! - [`AdmittedStore`]: an object store with the gate in front of it
//!
//! # Example
//!
//! ```rust,ignore
//! use canopy_hierarchy::{register_scope_indexes, AdmissionGate, AdmittedStore};
//! use canopy_store::InMemoryStore;
//! use std::sync::Arc;
//!
//! let inner = Arc::new(InMemoryStore::new());
//! register_scope_indexes(inner.as_ref())?;
//! let gate = AdmissionGate::new(Arc::clone(&inner), config.naming_policies.clone());
//! let store = AdmittedStore::new(inner, gate);
//! ```

#![warn(unreachable_pub)]

pub mod admission;
pub mod admitted;
pub mod error;
pub mod graph;
pub mod lookup;
pub mod naming;
pub mod resolver;

pub use admission::{mutate_intent, AdmissionGate, Review, DEFAULT_REVIEW_TIMEOUT};
pub use admitted::AdmittedStore;
pub use error::{AdmissionError, Denial, HierarchyError, Relation};
pub use graph::{HierarchyGraph, Link};
pub use lookup::{register_scope_indexes, ScopeLookup, ScopeSnapshot};
pub use resolver::HierarchyResolver;
