//! Startup checks against the store's discovery

use canopy_model::{ConfigError, GroupVersionKind};
use canopy_store::{ObjectStore, Verb};
use tracing::debug;

/// Check that every watched kind is served, namespaced, and fully accessible
///
/// # Errors
/// - [`ConfigError::UnknownKind`] for a kind the store does not serve
/// - [`ConfigError::ClusterScoped`] for a cluster-scoped kind
/// - [`ConfigError::MissingPermissions`] listing every missing verb
/// - [`ConfigError::Discovery`] if the store could not answer
pub async fn validate_watched_kinds(
    store: &dyn ObjectStore,
    watches: &[GroupVersionKind],
) -> Result<(), ConfigError> {
    let mut missing = Vec::new();
    for gvk in watches {
        let info = store
            .resolve_kind(gvk)
            .await
            .map_err(|e| ConfigError::Discovery(e.to_string()))?
            .ok_or_else(|| ConfigError::UnknownKind(gvk.clone()))?;
        if !info.namespaced {
            return Err(ConfigError::ClusterScoped(gvk.clone()));
        }

        for verb in Verb::PROPAGATION {
            let allowed = store
                .access_allowed(gvk, verb)
                .await
                .map_err(|e| ConfigError::Discovery(e.to_string()))?;
            if !allowed {
                missing.push(format!("missing permission to {verb} {}", gvk.kind.to_lowercase()));
            }
        }
        debug!(kind = %gvk, "watched kind validated");
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::MissingPermissions(missing))
    }
}
