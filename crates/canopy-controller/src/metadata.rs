//! Metadata Propagator
//!
//! Copies allow-listed labels and annotations from a scope's source (parent
//! for a sub-scope, template for an instance) and, for sub-scopes, from the
//! intent that requested them. The result is applied declaratively under the
//! controller's field manager, so keys it asserted earlier and no longer
//! asserts are retracted by the store.

use crate::error::ReconcileError;
use canopy_hierarchy::HierarchyResolver;
use canopy_model::{markers, Intent, KeyPatternSet, Object, ObjectKey, Scope, ValidatedConfig};
use canopy_store::{read_meta, MetadataApply, ObjectStore, ObjectStoreExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Applies propagated metadata to scopes
#[derive(Clone)]
pub struct MetadataPropagator {
    store: Arc<dyn ObjectStore>,
    config: Arc<ValidatedConfig>,
}

impl std::fmt::Debug for MetadataPropagator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataPropagator").finish_non_exhaustive()
    }
}

impl MetadataPropagator {
    /// Create new propagator
    pub fn new(store: Arc<dyn ObjectStore>, config: Arc<ValidatedConfig>) -> Self {
        Self { store, config }
    }

    fn propagates(&self, key: &str, allow: &KeyPatternSet) -> bool {
        !markers::is_reserved(key) && !self.config.is_excluded(key) && allow.matches_any(key)
    }

    fn copy_allowed(
        &self,
        from: &BTreeMap<String, String>,
        allow: &KeyPatternSet,
        into: &mut BTreeMap<String, String>,
    ) {
        for (k, v) in from {
            if self.propagates(k, allow) {
                into.insert(k.clone(), v.clone());
            }
        }
    }

    /// Everything the controller should own on a scope
    ///
    /// Intent keys are merged last and win over keys from the source.
    #[must_use]
    pub fn desired(&self, source: Option<&Scope>, intent: Option<&Intent>) -> MetadataApply {
        let mut apply = MetadataApply::new(markers::FIELD_MANAGER).forced();
        if let Some(source) = source {
            self.copy_allowed(&source.metadata.labels, &self.config.label_keys, &mut apply.labels);
            self.copy_allowed(
                &source.metadata.annotations,
                &self.config.annotation_keys,
                &mut apply.annotations,
            );
        }
        if let Some(intent) = intent {
            self.copy_allowed(&intent.spec.labels, &self.config.sub_scope_label_keys, &mut apply.labels);
            self.copy_allowed(
                &intent.spec.annotations,
                &self.config.sub_scope_annotation_keys,
                &mut apply.annotations,
            );
            apply
                .labels
                .insert(markers::LABEL_CREATED_BY.to_string(), markers::CREATED_BY.to_string());
            apply
                .labels
                .insert(markers::LABEL_PARENT.to_string(), intent.owning_scope().to_string());
        }
        apply
    }

    /// Apply the desired metadata to `scope`
    ///
    /// Returns whether the scope changed. Terminating scopes are left alone.
    ///
    /// # Errors
    /// Returns store errors, including ownership conflicts.
    pub async fn sync(&self, scope: &Scope, source: Option<&Scope>) -> Result<bool, ReconcileError> {
        if scope.deletion_pending() {
            return Ok(false);
        }
        let intent = match scope.parent_ref() {
            Some(parent) => {
                self.store
                    .get_opt::<Intent>(&Intent::gvk(), &ObjectKey::namespaced(parent, scope.name()))
                    .await?
            }
            None => None,
        };
        let apply = self.desired(source, intent.as_ref());
        let applied = self
            .store
            .apply_metadata(&Scope::gvk(), &scope.key(), &apply)
            .await?;
        let changed = read_meta(&applied)?.resource_version != scope.metadata.resource_version;
        if changed {
            info!(scope = scope.name(), "propagated metadata");
        }
        Ok(changed)
    }

    /// Re-apply metadata to the direct children or instances of `scope`
    ///
    /// # Errors
    /// Returns the first lookup or write failure.
    pub async fn fan_out(
        &self,
        resolver: &HierarchyResolver<dyn ObjectStore>,
        scope: &Scope,
    ) -> Result<usize, ReconcileError> {
        let mut changed = 0;
        for child in resolver.children(scope).await? {
            let downstream = match (child.parent_ref(), child.template_ref()) {
                (Some(parent), _) => parent == scope.name(),
                (None, Some(template)) => template == scope.name(),
                (None, None) => false,
            };
            if !downstream {
                continue;
            }
            if self.sync(&child, Some(scope)).await? {
                changed += 1;
            }
        }
        debug!(scope = scope.name(), changed, "metadata fan-out");
        Ok(changed)
    }
}
