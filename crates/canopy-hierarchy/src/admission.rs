//! Admission gate
//!
//! Synchronous validation of every write to scopes and intents. Each review
//! either allows the write or rejects it with a [`Denial`]; lookups that fail
//! or run past the deadline reject it as well, so nothing unvalidated is
//! committed.
//!
//! Checks, in order:
//! - scope create: self references, role conflicts, reference targets, then
//!   an ancestor chain walk
//! - scope update: ancestor chain walk, role removal with children, parent
//!   removal with children, then the reference checks on the new state
//! - scope delete: no children of the relevant kind
//! - intent create: owning scope in a hierarchy, key syntax, naming policy

use crate::error::{AdmissionError, Denial, Relation};
use crate::lookup::ScopeLookup;
use crate::naming;
use crate::resolver::HierarchyResolver;
use canopy_model::{
    markers, validate_annotations, validate_labels, Intent, NamingPolicyRegex, Object, Role, Scope,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Deadline for a single review
pub const DEFAULT_REVIEW_TIMEOUT: Duration = Duration::from_secs(10);

/// A write awaiting admission
#[derive(Debug, Clone, Copy)]
pub enum Review<'a> {
    /// Scope creation
    CreateScope(&'a Scope),
    /// Scope replacement
    UpdateScope {
        /// Stored state
        old: &'a Scope,
        /// Requested state
        new: &'a Scope,
    },
    /// Scope deletion
    DeleteScope(&'a Scope),
    /// Intent creation
    CreateIntent(&'a Intent),
}

impl Review<'_> {
    /// Operation name for logs
    #[must_use]
    pub fn operation(&self) -> &'static str {
        match self {
            Self::CreateScope(_) => "create-scope",
            Self::UpdateScope { .. } => "update-scope",
            Self::DeleteScope(_) => "delete-scope",
            Self::CreateIntent(_) => "create-intent",
        }
    }

    /// Name of the object under review
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::CreateScope(s) | Self::DeleteScope(s) | Self::UpdateScope { new: s, .. } => s.name(),
            Self::CreateIntent(i) => i.name(),
        }
    }
}

/// Validates writes against the hierarchy rules
pub struct AdmissionGate<L: ?Sized> {
    resolver: HierarchyResolver<L>,
    naming_policies: Arc<[NamingPolicyRegex]>,
    timeout: Duration,
}

impl<L: ?Sized> std::fmt::Debug for AdmissionGate<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("naming_policies", &self.naming_policies.len())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<L: ?Sized> Clone for AdmissionGate<L> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
            naming_policies: Arc::clone(&self.naming_policies),
            timeout: self.timeout,
        }
    }
}

impl<L: ScopeLookup + ?Sized> AdmissionGate<L> {
    /// Create new gate
    pub fn new(lookup: Arc<L>, naming_policies: Vec<NamingPolicyRegex>) -> Self {
        Self {
            resolver: HierarchyResolver::new(lookup),
            naming_policies: naming_policies.into(),
            timeout: DEFAULT_REVIEW_TIMEOUT,
        }
    }

    /// Override the review deadline
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Review deadline
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Decide on a write
    ///
    /// # Errors
    /// - [`AdmissionError::Denied`] if a rule rejects the write
    /// - [`AdmissionError::Lookup`] or [`AdmissionError::Timeout`] if the
    ///   decision could not be made
    pub async fn review(&self, review: Review<'_>) -> Result<(), AdmissionError> {
        let decision = async {
            match review {
                Review::CreateScope(scope) => self.check_scope_create(scope).await,
                Review::UpdateScope { old, new } => self.check_scope_update(old, new).await,
                Review::DeleteScope(scope) => self.check_scope_delete(scope).await,
                Review::CreateIntent(intent) => self.check_intent_create(intent).await,
            }
        };

        match tokio::time::timeout(self.timeout, decision).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                debug!(
                    operation = review.operation(),
                    name = review.name(),
                    error = %err,
                    "admission rejected"
                );
                Err(err)
            }
            Err(_) => {
                warn!(
                    operation = review.operation(),
                    name = review.name(),
                    timeout = ?self.timeout,
                    "admission review timed out"
                );
                Err(AdmissionError::Timeout(self.timeout))
            }
        }
    }

    async fn check_reference(&self, name: &str, expected: Role) -> Result<(), AdmissionError> {
        let Some(target) = self.resolver.scope(name).await? else {
            return Err(Denial::DanglingReference {
                name: name.to_string(),
            }
            .into());
        };
        if target.role() == expected || target.is_sub_scope() {
            return Ok(());
        }
        Err(Denial::InvalidReference {
            name: name.to_string(),
            expected,
        }
        .into())
    }

    async fn check_scope_create(&self, scope: &Scope) -> Result<(), AdmissionError> {
        self.check_references(scope).await?;
        // a dangling reference to this name elsewhere could close a loop
        self.resolver.ancestor_chain(scope).await?;
        Ok(())
    }

    async fn check_references(&self, scope: &Scope) -> Result<(), AdmissionError> {
        let name = scope.name();
        if let Some(parent) = scope.parent_ref() {
            if name == parent {
                return Err(self_reference(name));
            }
            if scope.declares_template() {
                return Err(Denial::RoleConflict("a sub-namespace cannot have a template").into());
            }
            if scope.declares_role() {
                return Err(Denial::RoleConflict("a sub-namespace cannot be a root or a template").into());
            }
            self.check_reference(parent, Role::Root).await?;
        }
        if let Some(template) = scope.template_ref() {
            if name == template {
                return Err(self_reference(name));
            }
            self.check_reference(template, Role::Template).await?;
        }
        Ok(())
    }

    async fn ensure_no_children(&self, scope: &str, index: &str, relation: Relation) -> Result<(), AdmissionError> {
        let children = self.resolver.lookup().scopes_by(index, scope).await?;
        if children.is_empty() {
            Ok(())
        } else {
            Err(Denial::ChildrenExist {
                scope: scope.to_string(),
                relation,
            }
            .into())
        }
    }

    async fn check_scope_update(&self, old: &Scope, new: &Scope) -> Result<(), AdmissionError> {
        self.resolver.ancestor_chain(new).await?;

        let name = new.name();
        let old_type = old.metadata.label(markers::LABEL_TYPE);
        let new_type = new.metadata.label(markers::LABEL_TYPE);
        if old_type != new_type {
            match old.role() {
                Role::Root => {
                    self.ensure_no_children(name, markers::INDEX_SCOPE_PARENT, Relation::SubScopes)
                        .await?;
                }
                Role::Template => {
                    self.ensure_no_children(name, markers::INDEX_SCOPE_TEMPLATE, Relation::Instances)
                        .await?;
                }
                Role::None => {}
            }
        }

        if new.upstream_ref().is_none() && old.is_sub_scope() && !new.is_root() {
            self.ensure_no_children(name, markers::INDEX_SCOPE_PARENT, Relation::SubScopes)
                .await?;
        }

        self.check_references(new).await
    }

    async fn check_scope_delete(&self, scope: &Scope) -> Result<(), AdmissionError> {
        let index = match scope.role() {
            Role::Root => markers::INDEX_SCOPE_PARENT,
            Role::Template => markers::INDEX_SCOPE_TEMPLATE,
            Role::None if scope.is_sub_scope() => markers::INDEX_SCOPE_PARENT,
            Role::None => return Ok(()),
        };
        self.ensure_no_children(scope.name(), index, Relation::Deletion).await
    }

    async fn check_intent_create(&self, intent: &Intent) -> Result<(), AdmissionError> {
        let owner_name = intent.owning_scope();
        let Some(owner) = self.resolver.scope(owner_name).await? else {
            return Err(Denial::DanglingReference {
                name: owner_name.to_string(),
            }
            .into());
        };
        if !owner.is_root() && !owner.is_sub_scope() {
            return Err(Denial::NotInHierarchy {
                scope: owner_name.to_string(),
            }
            .into());
        }

        let mut errs = validate_labels(&intent.spec.labels, "spec.labels");
        errs.extend(validate_annotations(&intent.spec.annotations, "spec.annotations"));
        if !errs.is_empty() {
            return Err(Denial::LabelOrAnnotationSyntaxError(errs).into());
        }

        let root = self.resolver.root_of(&owner).await?;
        match naming::check(&self.naming_policies, owner_name, intent.name(), &root)? {
            Some(denial) => Err(denial.into()),
            None => Ok(()),
        }
    }
}

fn self_reference(name: &str) -> AdmissionError {
    Denial::CycleDetected {
        path: vec![name.to_string(), name.to_string()],
    }
    .into()
}

/// Defaulting applied to new intents: attach the lifecycle finalizer
pub fn mutate_intent(intent: &mut Intent) {
    if !intent.finalizer_present() {
        intent.metadata.finalizers.push(markers::FINALIZER.to_string());
    }
}
