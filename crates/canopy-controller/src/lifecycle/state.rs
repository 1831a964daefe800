//! Intent lifecycle as an explicit state machine
//!
//! ```text
//! Pending --create scope--> Materialized <--> Conflict
//!    \                          |                |
//!     `--------------------> Finalizing <-------'
//!                               |
//!                            Removed
//! ```
//!
//! [`observe`] classifies what is currently stored and names the single
//! step that moves it forward. The reconciler performs that step and looks
//! again.

use canopy_model::{
    Condition, ConditionStatus, Intent, IntentState, IntentStatus, Object, Scope, CONDITION_STALLED,
    REASON_CONFLICT,
};
use chrono::{DateTime, Utc};
use std::fmt;

/// Message on the stalled condition
pub const CONFLICT_MESSAGE: &str = "Conflicting namespace already exists";

/// Where an intent stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No scope of that name exists yet
    Pending,
    /// The scope exists and is parented to the intent's scope
    Materialized,
    /// A scope of that name exists under another parent
    Conflict,
    /// Deletion requested
    Finalizing,
    /// The intent is gone
    Removed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Materialized => "materialized",
            Self::Conflict => "conflict",
            Self::Finalizing => "finalizing",
            Self::Removed => "removed",
        };
        f.write_str(s)
    }
}

/// The next step for an intent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Create the child scope
    CreateScope,
    /// Bring the status in line with the observed state
    RecordStatus(IntentState),
    /// Delete the child scope before letting the intent go
    DeleteScope,
    /// Remove the finalizer
    ReleaseFinalizer,
    /// Nothing to do until something changes
    Wait,
}

/// Classify the stored intent and its child scope
#[must_use]
pub fn observe(intent: Option<&Intent>, scope: Option<&Scope>) -> (LifecycleState, Step) {
    let Some(intent) = intent else {
        return (LifecycleState::Removed, Step::Wait);
    };
    let owned = |scope: &Scope| scope.parent_ref() == Some(intent.owning_scope());

    if intent.deletion_pending() {
        if !intent.finalizer_present() {
            return (LifecycleState::Finalizing, Step::Wait);
        }
        // never delete a scope this intent does not own
        return match scope {
            Some(scope) if owned(scope) && !scope.deletion_pending() => (LifecycleState::Finalizing, Step::DeleteScope),
            _ => (LifecycleState::Finalizing, Step::ReleaseFinalizer),
        };
    }

    match scope {
        None => (LifecycleState::Pending, Step::CreateScope),
        Some(scope) if owned(scope) => (LifecycleState::Materialized, Step::RecordStatus(IntentState::Ok)),
        Some(_) => (LifecycleState::Conflict, Step::RecordStatus(IntentState::Conflict)),
    }
}

/// Status an intent should carry in `state`
///
/// The stalled condition keeps its `lastTransitionTime` while it stays true.
#[must_use]
pub fn desired_status(intent: &Intent, state: IntentState, now: DateTime<Utc>) -> IntentStatus {
    let generation = intent.meta().generation;
    let conditions = match state {
        IntentState::Ok => Vec::new(),
        IntentState::Conflict => {
            let since = intent
                .status
                .condition(CONDITION_STALLED)
                .filter(|c| c.status == ConditionStatus::True)
                .map_or(now, |c| c.last_transition_time);
            vec![Condition {
                type_: CONDITION_STALLED.to_string(),
                status: ConditionStatus::True,
                observed_generation: generation,
                reason: REASON_CONFLICT.to_string(),
                message: CONFLICT_MESSAGE.to_string(),
                last_transition_time: since,
            }]
        }
    };
    IntentStatus {
        observed_generation: generation,
        state: Some(state),
        conditions,
    }
}
