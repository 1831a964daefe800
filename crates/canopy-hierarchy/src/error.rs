//! Hierarchy and admission errors

use canopy_model::{FieldError, Role};
use canopy_store::StoreError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors from walking the hierarchy
#[derive(Debug, Error)]
pub enum HierarchyError {
    /// Following upstream references revisits a scope
    #[error("circular reference is not permitted: {}", path.join(" -> "))]
    CycleDetected {
        /// Scopes visited, ending with the repeated one
        path: Vec<String>,
    },

    /// A reference names a scope that does not exist
    #[error("parent namespace does not exist: {name}")]
    DanglingReference {
        /// Missing scope
        name: String,
    },

    /// Store lookup failed
    #[error("lookup failed: {0}")]
    Lookup(#[from] StoreError),
}

/// Which children block a change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// Sub-scopes under a root losing its role or its parent
    SubScopes,
    /// Instances referencing a template losing its role
    Instances,
    /// Any children of a scope being deleted
    Deletion,
}

/// A rejected request, with the message shown to the requester
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    /// The change would close a loop of references
    CycleDetected {
        /// Scopes on the loop
        path: Vec<String>,
    },
    /// A referenced scope does not exist
    DanglingReference {
        /// Missing scope
        name: String,
    },
    /// Role labels contradict each other
    RoleConflict(&'static str),
    /// A reference points at a scope of the wrong kind
    InvalidReference {
        /// Referenced scope
        name: String,
        /// Role the reference requires
        expected: Role,
    },
    /// An intent lives in a scope outside any hierarchy
    NotInHierarchy {
        /// Owning scope
        scope: String,
    },
    /// Children block the change
    ChildrenExist {
        /// Scope being changed or deleted
        scope: String,
        /// Kind of children found
        relation: Relation,
    },
    /// A child name does not match the naming policy of its root
    NamingPolicyViolation {
        /// Owning scope
        scope: String,
        /// Requested child name
        target: String,
        /// Root of the owning scope
        root: String,
        /// Policy root pattern
        policy_root: String,
        /// Policy match template
        policy_match: String,
    },
    /// Malformed label or annotation in an intent
    LabelOrAnnotationSyntaxError(Vec<FieldError>),
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CycleDetected { .. } => f.write_str("circular reference is not permitted"),
            Self::DanglingReference { name } => write!(f, "namespace does not exist: {name}"),
            Self::RoleConflict(reason) => f.write_str(reason),
            Self::InvalidReference { name, expected } => {
                write!(f, "{name} is not a valid {expected} namespace")
            }
            Self::NotInHierarchy { scope } => {
                write!(f, "namespace {scope} is neither a root nor a sub namespace")
            }
            Self::ChildrenExist { scope, relation } => match relation {
                Relation::SubScopes => write!(f, "there are sub-namespaces under {scope}"),
                Relation::Instances => write!(f, "there are namespaces referencing {scope}"),
                Relation::Deletion => f.write_str("child namespaces exist"),
            },
            Self::NamingPolicyViolation {
                scope,
                target,
                root,
                policy_root,
                policy_match,
            } => write!(
                f,
                "namespace {scope} does not match naming policies: \
                 target={target} root={root} denied by policy root={policy_root} match={policy_match}"
            ),
            Self::LabelOrAnnotationSyntaxError(errs) => {
                let joined: Vec<String> = errs.iter().map(ToString::to_string).collect();
                if joined.len() == 1 {
                    f.write_str(&joined[0])
                } else {
                    write!(f, "[{}]", joined.join(", "))
                }
            }
        }
    }
}

impl std::error::Error for Denial {}

/// Admission outcome other than allow
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// Request rejected
    #[error(transparent)]
    Denied(#[from] Denial),

    /// A lookup needed for the decision failed; the request fails closed
    #[error("admission lookup failed: {0}")]
    Lookup(#[from] StoreError),

    /// The decision did not complete in time; the request fails closed
    #[error("admission review timed out after {0:?}")]
    Timeout(Duration),

    /// A naming policy expanded into an invalid pattern
    #[error("invalid naming policy pattern {pattern:?}: {source}")]
    NamingPolicy {
        /// Expanded pattern
        pattern: String,
        /// Compile error
        #[source]
        source: regex::Error,
    },
}

impl AdmissionError {
    /// Check if resubmitting the request may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Lookup(e) => e.is_retryable(),
            Self::Timeout(_) => true,
            Self::Denied(_) | Self::NamingPolicy { .. } => false,
        }
    }

    /// The denial, if this is one
    #[must_use]
    pub fn denial(&self) -> Option<&Denial> {
        match self {
            Self::Denied(d) => Some(d),
            _ => None,
        }
    }
}

impl From<HierarchyError> for AdmissionError {
    fn from(err: HierarchyError) -> Self {
        match err {
            HierarchyError::CycleDetected { path } => Denial::CycleDetected { path }.into(),
            HierarchyError::DanglingReference { name } => Denial::DanglingReference { name }.into(),
            HierarchyError::Lookup(e) => Self::Lookup(e),
        }
    }
}

impl From<AdmissionError> for StoreError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::Denied(d) => Self::Admission(d.to_string()),
            AdmissionError::NamingPolicy { .. } => Self::Admission(err.to_string()),
            AdmissionError::Lookup(_) | AdmissionError::Timeout(_) => Self::Unavailable(err.to_string()),
        }
    }
}
