//! Hierarchy resolver
//!
//! Derives roles, ancestor chains, roots and children from the references
//! scopes carry. Walks are bounded by a visited set, so a cycle that slipped
//! into the store surfaces as [`HierarchyError::CycleDetected`] instead of
//! looping.

use crate::error::HierarchyError;
use crate::lookup::ScopeLookup;
use canopy_model::{markers, Object, Role, Scope, ScopeClass};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::trace;

/// Resolves hierarchy questions against a [`ScopeLookup`]
pub struct HierarchyResolver<L: ?Sized> {
    lookup: Arc<L>,
}

impl<L: ?Sized> std::fmt::Debug for HierarchyResolver<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HierarchyResolver").finish_non_exhaustive()
    }
}

impl<L: ?Sized> Clone for HierarchyResolver<L> {
    fn clone(&self) -> Self {
        Self {
            lookup: Arc::clone(&self.lookup),
        }
    }
}

impl<L: ScopeLookup + ?Sized> HierarchyResolver<L> {
    /// Create new resolver
    pub fn new(lookup: Arc<L>) -> Self {
        Self { lookup }
    }

    /// Underlying lookup
    #[inline]
    #[must_use]
    pub fn lookup(&self) -> &Arc<L> {
        &self.lookup
    }

    /// Declared role of a scope
    #[inline]
    #[must_use]
    pub fn resolve_role(scope: &Scope) -> Role {
        scope.role()
    }

    /// Structural classification of a scope
    #[inline]
    #[must_use]
    pub fn classify(scope: &Scope) -> ScopeClass {
        scope.classify()
    }

    /// Fetch a scope by name
    ///
    /// # Errors
    /// Returns [`HierarchyError::Lookup`] if the store read fails.
    pub async fn scope(&self, name: &str) -> Result<Option<Scope>, HierarchyError> {
        Ok(self.lookup.scope(name).await?)
    }

    /// Names from `scope` upward, following parent then template references
    ///
    /// The first element is `scope` itself, which need not be stored yet.
    ///
    /// # Errors
    /// - [`HierarchyError::CycleDetected`] if a name repeats
    /// - [`HierarchyError::DanglingReference`] if a referenced scope is missing
    pub async fn ancestor_chain(&self, scope: &Scope) -> Result<Vec<String>, HierarchyError> {
        let mut chain = vec![scope.name().to_string()];
        let mut visited: HashSet<String> = chain.iter().cloned().collect();
        let mut next = scope.upstream_ref().map(str::to_string);

        while let Some(name) = next {
            if !visited.insert(name.clone()) {
                chain.push(name);
                return Err(HierarchyError::CycleDetected { path: chain });
            }
            let Some(current) = self.lookup.scope(&name).await? else {
                return Err(HierarchyError::DanglingReference { name });
            };
            chain.push(name);
            next = current.upstream_ref().map(str::to_string);
        }
        trace!(scope = %scope.name(), depth = chain.len(), "resolved ancestor chain");
        Ok(chain)
    }

    /// Root scope of `scope`
    ///
    /// Follows parent references up to the first scope declaring the root
    /// role. A chain that never reaches a root yields its terminal scope.
    ///
    /// # Errors
    /// Same as [`Self::ancestor_chain`].
    pub async fn root_of(&self, scope: &Scope) -> Result<String, HierarchyError> {
        let mut visited = HashSet::from([scope.name().to_string()]);
        let mut path = vec![scope.name().to_string()];
        let mut current = scope.clone();

        loop {
            if current.is_root() {
                return Ok(current.name().to_string());
            }
            let Some(up) = current.upstream_ref().map(str::to_string) else {
                return Ok(current.name().to_string());
            };
            path.push(up.clone());
            if !visited.insert(up.clone()) {
                return Err(HierarchyError::CycleDetected { path });
            }
            current = self
                .lookup
                .scope(&up)
                .await?
                .ok_or(HierarchyError::DanglingReference { name: up })?;
        }
    }

    /// Direct children: sub-scopes of roots and sub-scopes, otherwise instances
    ///
    /// # Errors
    /// Returns [`HierarchyError::Lookup`] if the store read fails.
    pub async fn children(&self, scope: &Scope) -> Result<Vec<Scope>, HierarchyError> {
        let index = if scope.children_by_parent() {
            markers::INDEX_SCOPE_PARENT
        } else {
            markers::INDEX_SCOPE_TEMPLATE
        };
        Ok(self.lookup.scopes_by(index, scope.name()).await?)
    }

    /// Every scope below `scope`, breadth first
    ///
    /// # Errors
    /// Returns [`HierarchyError::Lookup`] if a store read fails.
    pub async fn descendants(&self, scope: &Scope) -> Result<Vec<Scope>, HierarchyError> {
        let mut seen = HashSet::from([scope.name().to_string()]);
        let mut queue = VecDeque::from([scope.clone()]);
        let mut out = Vec::new();

        while let Some(current) = queue.pop_front() {
            for child in self.children(&current).await? {
                if seen.insert(child.name().to_string()) {
                    queue.push_back(child.clone());
                    out.push(child);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::ScopeSnapshot;
    use pretty_assertions::assert_eq;

    fn resolver(scopes: Vec<Scope>) -> HierarchyResolver<ScopeSnapshot> {
        HierarchyResolver::new(Arc::new(scopes.into_iter().collect()))
    }

    #[tokio::test]
    async fn chain_follows_parents_then_templates() {
        let r = resolver(vec![
            Scope::new("tmpl").with_role(Role::Template),
            Scope::new("root").with_role(Role::Root).with_template("tmpl"),
            Scope::new("sub").with_parent("root"),
        ]);
        let leaf = Scope::new("leaf").with_parent("sub");
        assert_eq!(
            r.ancestor_chain(&leaf).await.unwrap(),
            vec!["leaf", "sub", "root", "tmpl"]
        );
        assert_eq!(r.root_of(&leaf).await.unwrap(), "root");
    }

    #[tokio::test]
    async fn chain_reports_cycles_and_dangling_refs() {
        let r = resolver(vec![
            Scope::new("a").with_parent("b"),
            Scope::new("b").with_parent("a"),
        ]);
        let err = r.ancestor_chain(&Scope::new("a").with_parent("b")).await.unwrap_err();
        match err {
            HierarchyError::CycleDetected { path } => assert_eq!(path, vec!["a", "b", "a"]),
            other => panic!("unexpected {other:?}"),
        }

        let err = r.ancestor_chain(&Scope::new("x").with_parent("gone")).await.unwrap_err();
        assert!(matches!(err, HierarchyError::DanglingReference { name } if name == "gone"));
    }

    #[tokio::test]
    async fn root_of_without_root_is_terminal_scope() {
        let r = resolver(vec![Scope::new("tmpl").with_role(Role::Template)]);
        let instance = Scope::new("i").with_template("tmpl");
        assert_eq!(r.root_of(&instance).await.unwrap(), "tmpl");
        assert_eq!(r.root_of(&Scope::new("plain")).await.unwrap(), "plain");
    }

    #[tokio::test]
    async fn children_and_descendants() {
        let r = resolver(vec![
            Scope::new("root").with_role(Role::Root),
            Scope::new("a").with_parent("root"),
            Scope::new("b").with_parent("a"),
            Scope::new("tmpl").with_role(Role::Template),
            Scope::new("i").with_template("tmpl"),
            Scope::new("j").with_template("i"),
        ]);
        let root = Scope::new("root").with_role(Role::Root);
        let names: Vec<String> = r
            .descendants(&root)
            .await
            .unwrap()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b"]);

        let tmpl = Scope::new("tmpl").with_role(Role::Template);
        let names: Vec<String> = r
            .descendants(&tmpl)
            .await
            .unwrap()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["i", "j"]);
    }
}
