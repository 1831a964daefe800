//! Lifecycle Controller
//!
//! Turns intents into scopes, reports naming conflicts on the intent, and
//! holds an intent's removal until the scope it materialized is gone.

mod reconciler;
mod state;

pub use reconciler::{IntentReconciler, FINALIZE_POLL};
pub use state::{desired_status, observe, LifecycleState, Step, CONFLICT_MESSAGE};
