//! Propagation of watched resource kinds
//!
//! Two modes, set by the `propagate` annotation on the origin:
//! - `create`: each descendant gets a copy once; later edits are left alone
//! - `update`: copies track the origin and disappear with it

pub mod clone;
pub mod compare;
pub mod propagator;
pub mod reconciler;
pub mod scope_pass;

pub use clone::clone_into;
pub use compare::in_sync;
pub use propagator::ResourcePropagator;
pub use reconciler::ResourceReconciler;
