//! Field indexes every reconciler relies on

use canopy_hierarchy::register_scope_indexes;
use canopy_model::{markers, GroupVersionKind, Intent, PropagateMode};
use canopy_store::{annotation_of, FieldIndexer, ObjectStore, StoreError};
use serde_json::Value;

/// Register the scope, intent and propagation indexes
///
/// # Errors
/// Returns [`StoreError::UnknownKind`] if a kind is not served.
pub fn register_indexes(store: &dyn ObjectStore, watches: &[GroupVersionKind]) -> Result<(), StoreError> {
    register_scope_indexes(store)?;
    store.register_index(
        &Intent::gvk(),
        FieldIndexer::new(markers::INDEX_INTENT_NAME, |obj| {
            obj.pointer("/metadata/name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .into_iter()
                .collect()
        }),
    )?;
    for gvk in watches {
        store.register_index(gvk, FieldIndexer::new(markers::INDEX_PROPAGATE, propagate_values))?;
    }
    Ok(())
}

/// `resource.propagate` values: the declared mode and `any`
fn propagate_values(obj: &Value) -> Vec<String> {
    annotation_of(obj, markers::ANN_PROPAGATE)
        .and_then(PropagateMode::parse)
        .map(|mode| vec![mode.as_str().to_string(), markers::PROPAGATE_ANY.to_string()])
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn propagate_index_values() {
        let obj = json!({"metadata": {"annotations": {"canopy.dev/propagate": "update"}}});
        assert_eq!(propagate_values(&obj), vec!["update", "any"]);

        let obj = json!({"metadata": {"annotations": {"canopy.dev/propagate": "sometimes"}}});
        assert!(propagate_values(&obj).is_empty());
        assert!(propagate_values(&json!({"metadata": {}})).is_empty());
    }
}
