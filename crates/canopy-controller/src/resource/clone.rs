//! Copy construction

use canopy_model::{markers, DynamicObject, KeyPatternSet, Object, ObjectMeta};
use std::collections::BTreeMap;

/// Build the copy of `source` that belongs in `scope`
///
/// System-managed metadata and `status` are dropped, as are label and
/// annotation keys containing `kubernetes.io/` or matching `excludes`. The
/// copy is stamped with the created-by label and the `from` annotation.
#[must_use]
pub fn clone_into(source: &DynamicObject, scope: &str, excludes: &KeyPatternSet) -> DynamicObject {
    let keep = |key: &str| !markers::is_system_key(key) && !excludes.matches_any(key);
    let filtered = |map: &BTreeMap<String, String>| -> BTreeMap<String, String> {
        map.iter()
            .filter(|(k, _)| keep(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    };

    let mut metadata = ObjectMeta::namespaced(scope, source.name());
    metadata.labels = filtered(&source.metadata.labels);
    metadata
        .labels
        .insert(markers::LABEL_CREATED_BY.to_string(), markers::CREATED_BY.to_string());
    metadata.annotations = filtered(&source.metadata.annotations);
    metadata
        .annotations
        .insert(markers::ANN_FROM.to_string(), source.namespace().to_string());

    DynamicObject {
        api_version: source.api_version.clone(),
        kind: source.kind.clone(),
        metadata,
        status: None,
        data: source.data.clone(),
    }
}
