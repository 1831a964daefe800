//! Read access to scopes
//!
//! Everything in this crate reads the hierarchy through [`ScopeLookup`]: any
//! [`ObjectStore`] provides it through the scope field indexes, and
//! [`ScopeSnapshot`] provides it over a fixed set of scopes.

use async_trait::async_trait;
use canopy_model::{markers, Object, ObjectKey, Scope};
use canopy_store::{label_of, FieldIndexer, ListParams, ObjectStore, ObjectStoreExt, StoreError};
use std::collections::BTreeMap;

/// Scope reads the hierarchy needs
#[async_trait]
pub trait ScopeLookup: Send + Sync {
    /// Fetch a scope by name, `None` if absent
    async fn scope(&self, name: &str) -> Result<Option<Scope>, StoreError>;

    /// Scopes whose field index `index` yields `value`
    ///
    /// `index` is [`markers::INDEX_SCOPE_PARENT`] or
    /// [`markers::INDEX_SCOPE_TEMPLATE`].
    async fn scopes_by(&self, index: &str, value: &str) -> Result<Vec<Scope>, StoreError>;
}

#[async_trait]
impl<S: ObjectStore + ?Sized> ScopeLookup for S {
    async fn scope(&self, name: &str) -> Result<Option<Scope>, StoreError> {
        self.get_opt(&Scope::gvk(), &ObjectKey::cluster(name)).await
    }

    async fn scopes_by(&self, index: &str, value: &str) -> Result<Vec<Scope>, StoreError> {
        self.list(&Scope::gvk(), &ListParams::default().matching(index, value))
            .await
    }
}

/// Register the scope indexes that [`ScopeLookup::scopes_by`] reads
///
/// # Errors
/// Returns [`StoreError::UnknownKind`] if the store does not serve scopes.
pub fn register_scope_indexes<S: ObjectStore + ?Sized>(store: &S) -> Result<(), StoreError> {
    for (index, label) in [
        (markers::INDEX_SCOPE_PARENT, markers::LABEL_PARENT),
        (markers::INDEX_SCOPE_TEMPLATE, markers::LABEL_TEMPLATE),
    ] {
        store.register_index(
            &Scope::gvk(),
            FieldIndexer::new(index, move |obj| {
                label_of(obj, label).map(str::to_string).into_iter().collect()
            }),
        )?;
    }
    Ok(())
}

/// An immutable set of scopes, keyed by name
#[derive(Debug, Clone, Default)]
pub struct ScopeSnapshot {
    scopes: BTreeMap<String, Scope>,
}

impl ScopeSnapshot {
    /// Create new empty snapshot
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a scope
    pub fn insert(&mut self, scope: Scope) {
        self.scopes.insert(scope.name().to_string(), scope);
    }

    /// Remove a scope
    pub fn remove(&mut self, name: &str) -> Option<Scope> {
        self.scopes.remove(name)
    }

    /// Look up a scope
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Scope> {
        self.scopes.get(name)
    }

    /// All scopes, ordered by name
    pub fn iter(&self) -> impl Iterator<Item = &Scope> {
        self.scopes.values()
    }

    /// Number of scopes
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    /// Check if empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    fn matches(scope: &Scope, index: &str, value: &str) -> Result<bool, StoreError> {
        let found = match index {
            markers::INDEX_SCOPE_PARENT => scope.parent_ref(),
            markers::INDEX_SCOPE_TEMPLATE => scope.template_ref(),
            other => {
                return Err(StoreError::Invalid(format!(
                    "index {other} is not registered for scopes"
                )))
            }
        };
        Ok(found == Some(value))
    }
}

impl FromIterator<Scope> for ScopeSnapshot {
    fn from_iter<I: IntoIterator<Item = Scope>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for scope in iter {
            snapshot.insert(scope);
        }
        snapshot
    }
}

#[async_trait]
impl ScopeLookup for ScopeSnapshot {
    async fn scope(&self, name: &str) -> Result<Option<Scope>, StoreError> {
        Ok(self.scopes.get(name).cloned())
    }

    async fn scopes_by(&self, index: &str, value: &str) -> Result<Vec<Scope>, StoreError> {
        let mut found = Vec::new();
        for scope in self.scopes.values() {
            if Self::matches(scope, index, value)? {
                found.push(scope.clone());
            }
        }
        Ok(found)
    }
}
