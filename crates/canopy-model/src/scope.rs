//! Scopes: the nodes of the hierarchy
//!
//! `role`, `parentRef` and `templateRef` are carried as labels (see
//! [`crate::markers`]) so that any tool able to edit labels can also edit the
//! hierarchy. [`Scope`] exposes them as typed accessors.

use crate::kind::GroupVersionKind;
use crate::markers;
use crate::meta::{Object, ObjectMeta};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role a scope declares for itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    /// No role
    #[default]
    None,
    /// Hierarchy root
    Root,
    /// Template for instances
    Template,
}

impl Role {
    /// Parse a `canopy.dev/type` label value; unknown values mean no role
    #[must_use]
    pub fn from_label(value: Option<&str>) -> Self {
        match value {
            Some(markers::TYPE_ROOT) => Self::Root,
            Some(markers::TYPE_TEMPLATE) => Self::Template,
            _ => Self::None,
        }
    }

    /// Label value for this role
    #[must_use]
    pub fn as_label(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Root => Some(markers::TYPE_ROOT),
            Self::Template => Some(markers::TYPE_TEMPLATE),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label().unwrap_or("none"))
    }
}

/// Structural classification of a scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeClass {
    /// Not part of any hierarchy
    Plain,
    /// Root of a sub-scope tree
    Root,
    /// Template other scopes instantiate
    Template,
    /// Child of `parent`
    SubScope {
        /// Parent scope name
        parent: String,
    },
    /// Instance of `template`; may also carry its own role
    Instance {
        /// Template scope name
        template: String,
        /// Role declared alongside the template reference
        role: Role,
    },
}

/// A namespace-like node of the hierarchy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    /// Standard metadata; scopes are cluster-scoped
    pub metadata: ObjectMeta,
}

impl Scope {
    /// Kind identifier of scopes
    #[must_use]
    pub fn gvk() -> GroupVersionKind {
        GroupVersionKind::new("canopy.dev", "v1", "Scope")
    }

    /// Create a plain scope
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
        }
    }

    /// Set role label
    #[must_use]
    pub fn with_role(mut self, role: Role) -> Self {
        match role.as_label() {
            Some(v) => {
                self.metadata
                    .labels
                    .insert(markers::LABEL_TYPE.to_string(), v.to_string());
            }
            None => {
                self.metadata.labels.remove(markers::LABEL_TYPE);
            }
        }
        self
    }

    /// Set parent reference
    #[must_use]
    pub fn with_parent(self, parent: impl Into<String>) -> Self {
        self.with_label(markers::LABEL_PARENT, parent)
    }

    /// Set template reference
    #[must_use]
    pub fn with_template(self, template: impl Into<String>) -> Self {
        self.with_label(markers::LABEL_TEMPLATE, template)
    }

    /// Add a label
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    /// Add an annotation
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.annotations.insert(key.into(), value.into());
        self
    }

    /// Declared role
    #[must_use]
    pub fn role(&self) -> Role {
        Role::from_label(self.metadata.label(markers::LABEL_TYPE))
    }

    /// Whether the role label is present at all, with any value
    #[must_use]
    pub fn declares_role(&self) -> bool {
        self.metadata.labels.contains_key(markers::LABEL_TYPE)
    }

    /// Whether the template label is present at all, with any value
    #[must_use]
    pub fn declares_template(&self) -> bool {
        self.metadata.labels.contains_key(markers::LABEL_TEMPLATE)
    }

    /// Parent reference
    #[must_use]
    pub fn parent_ref(&self) -> Option<&str> {
        self.metadata.label(markers::LABEL_PARENT)
    }

    /// Template reference
    #[must_use]
    pub fn template_ref(&self) -> Option<&str> {
        self.metadata.label(markers::LABEL_TEMPLATE)
    }

    /// The next scope up the chain: parent first, else template
    #[must_use]
    pub fn upstream_ref(&self) -> Option<&str> {
        self.parent_ref().or_else(|| self.template_ref())
    }

    /// Check for root role
    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.role() == Role::Root
    }

    /// Check for template role
    #[inline]
    #[must_use]
    pub fn is_template(&self) -> bool {
        self.role() == Role::Template
    }

    /// Check for a parent reference
    #[inline]
    #[must_use]
    pub fn is_sub_scope(&self) -> bool {
        self.parent_ref().is_some()
    }

    /// Whether deletion has been requested
    #[inline]
    #[must_use]
    pub fn deletion_pending(&self) -> bool {
        self.metadata.deletion_pending
    }

    /// Structural classification
    #[must_use]
    pub fn classify(&self) -> ScopeClass {
        if let Some(parent) = self.parent_ref() {
            return ScopeClass::SubScope {
                parent: parent.to_string(),
            };
        }
        if let Some(template) = self.template_ref() {
            return ScopeClass::Instance {
                template: template.to_string(),
                role: self.role(),
            };
        }
        match self.role() {
            Role::Root => ScopeClass::Root,
            Role::Template => ScopeClass::Template,
            Role::None => ScopeClass::Plain,
        }
    }

    /// Whether this scope's children are found through the parent index
    ///
    /// Roots and sub-scopes have sub-scopes; every other scope can only
    /// have instances.
    #[must_use]
    pub fn children_by_parent(&self) -> bool {
        self.is_root() || self.is_sub_scope()
    }
}

impl Object for Scope {
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_roles() {
        assert_eq!(Scope::new("a").classify(), ScopeClass::Plain);
        assert_eq!(Scope::new("a").with_role(Role::Root).classify(), ScopeClass::Root);
        assert_eq!(
            Scope::new("a").with_role(Role::Template).classify(),
            ScopeClass::Template
        );
        assert_eq!(
            Scope::new("a").with_parent("p").classify(),
            ScopeClass::SubScope { parent: "p".into() }
        );
        assert_eq!(
            Scope::new("a").with_template("t").with_role(Role::Root).classify(),
            ScopeClass::Instance {
                template: "t".into(),
                role: Role::Root
            }
        );
    }

    #[test]
    fn unknown_role_value_is_none_but_declared() {
        let scope = Scope::new("a").with_label(markers::LABEL_TYPE, "bogus");
        assert_eq!(scope.role(), Role::None);
        assert!(scope.declares_role());
    }

    #[test]
    fn upstream_prefers_parent() {
        let scope = Scope::new("a").with_parent("p").with_template("t");
        assert_eq!(scope.upstream_ref(), Some("p"));
        let scope = Scope::new("a").with_template("t");
        assert_eq!(scope.upstream_ref(), Some("t"));
    }

    #[test]
    fn removing_role() {
        let scope = Scope::new("a").with_role(Role::Root).with_role(Role::None);
        assert!(!scope.declares_role());
    }
}
