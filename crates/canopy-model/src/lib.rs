//! Canopy object model
//!
//! Types shared by every canopy component:
//! - [`Scope`]: a namespace-like node of the hierarchy
//! - [`Intent`]: a request, stored inside a parent scope, to materialize a child scope
//! - [`DynamicObject`]: any instance of a watched, propagated resource kind
//! - [`markers`]: the label/annotation contract other tooling must honor
//! - [`Config`]: the configuration value object handed to each component
//!
//! # Example
//!
//! ```rust,ignore
//! use canopy_model::{Role, Scope};
//!
//! let root = Scope::new("team-a").with_role(Role::Root);
//! let sub = Scope::new("team-a-dev").with_parent("team-a");
//!
//! assert!(root.is_root());
//! assert_eq!(sub.parent_ref(), Some("team-a"));
//! ```

#![warn(unreachable_pub)]

pub mod config;
pub mod error;
pub mod intent;
pub mod kind;
pub mod markers;
pub mod meta;
pub mod object;
pub mod pattern;
pub mod scope;
pub mod validation;

pub use config::{Config, NamingPolicy, NamingPolicyRegex, ValidatedConfig};
pub use error::{ConfigError, ModelError};
pub use intent::{
    Condition, ConditionStatus, Intent, IntentSpec, IntentState, IntentStatus, CONDITION_STALLED, REASON_CONFLICT,
};
pub use kind::GroupVersionKind;
pub use meta::{FieldOperation, ManagedFieldsEntry, Object, ObjectKey, ObjectMeta, OwnerReference};
pub use object::{DynamicObject, PropagateMode, PropagationState};
pub use pattern::{KeyPattern, KeyPatternSet};
pub use scope::{Role, Scope, ScopeClass};
pub use validation::{validate_annotations, validate_labels, FieldError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
