//! Field ownership for labels and annotations
//!
//! Every write records which manager set which keys. An `Apply` by manager
//! M retracts the keys M applied before but no longer asserts, unless some
//! other record (including M's own `Update` record) still owns them.

use crate::api::MetadataApply;
use canopy_model::{FieldOperation, ManagedFieldsEntry, ObjectMeta};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Copy)]
enum Field {
    Labels,
    Annotations,
}

impl Field {
    fn owned(self, entry: &ManagedFieldsEntry) -> &BTreeSet<String> {
        match self {
            Self::Labels => &entry.labels,
            Self::Annotations => &entry.annotations,
        }
    }

    fn owned_mut(self, entry: &mut ManagedFieldsEntry) -> &mut BTreeSet<String> {
        match self {
            Self::Labels => &mut entry.labels,
            Self::Annotations => &mut entry.annotations,
        }
    }

    fn values(self, meta: &ObjectMeta) -> &BTreeMap<String, String> {
        match self {
            Self::Labels => &meta.labels,
            Self::Annotations => &meta.annotations,
        }
    }

    fn values_mut(self, meta: &mut ObjectMeta) -> &mut BTreeMap<String, String> {
        match self {
            Self::Labels => &mut meta.labels,
            Self::Annotations => &mut meta.annotations,
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            Self::Labels => "metadata.labels",
            Self::Annotations => "metadata.annotations",
        }
    }
}

fn entry_mut<'a>(
    entries: &'a mut Vec<ManagedFieldsEntry>,
    manager: &str,
    operation: FieldOperation,
) -> &'a mut ManagedFieldsEntry {
    let pos = entries
        .iter()
        .position(|e| e.manager == manager && e.operation == operation);
    let idx = if let Some(idx) = pos {
        idx
    } else {
        entries.push(ManagedFieldsEntry::new(manager, operation));
        entries.len() - 1
    };
    &mut entries[idx]
}

/// Record an imperative write by `manager`
///
/// Keys that were added or changed become owned by `manager` and are
/// released by everyone else; removed keys are released by everyone.
pub fn record_update(old: &ObjectMeta, new: &mut ObjectMeta, manager: &str) {
    let mut entries = old.managed_fields.clone();
    for field in [Field::Labels, Field::Annotations] {
        let before = field.values(old);
        let after = field.values(new);

        let changed: Vec<String> = after
            .iter()
            .filter(|(k, v)| before.get(*k) != Some(*v))
            .map(|(k, _)| k.clone())
            .collect();
        let removed: Vec<String> = before
            .keys()
            .filter(|k| !after.contains_key(*k))
            .cloned()
            .collect();

        for entry in &mut entries {
            let owned = field.owned_mut(entry);
            for key in removed.iter().chain(changed.iter()) {
                owned.remove(key);
            }
        }
        if !changed.is_empty() {
            field
                .owned_mut(entry_mut(&mut entries, manager, FieldOperation::Update))
                .extend(changed);
        }
    }
    entries.retain(|e| !e.is_empty());
    new.managed_fields = entries;
}

/// Apply labels and annotations declaratively
///
/// # Errors
/// Without `force`, returns the conflicting field paths when another
/// manager owns a key with a different value.
pub fn apply(meta: &mut ObjectMeta, request: &MetadataApply) -> Result<(), Vec<String>> {
    let manager = request.manager.as_str();
    let asserted = [
        (Field::Labels, &request.labels),
        (Field::Annotations, &request.annotations),
    ];

    let mut conflicts = Vec::new();
    for (field, wanted) in asserted {
        for (key, value) in wanted {
            if field.values(meta).get(key) == Some(value) {
                continue;
            }
            let foreign = meta
                .managed_fields
                .iter()
                .any(|e| e.manager != manager && field.owned(e).contains(key));
            if foreign {
                conflicts.push(format!("{}.{key}", field.prefix()));
            }
        }
    }
    if !conflicts.is_empty() && !request.force {
        return Err(conflicts);
    }

    for (field, wanted) in asserted {
        if request.force {
            let current = field.values(meta).clone();
            for entry in meta.managed_fields.iter_mut().filter(|e| e.manager != manager) {
                let owned = field.owned_mut(entry);
                for (key, value) in wanted {
                    if current.get(key) != Some(value) {
                        owned.remove(key);
                    }
                }
            }
        }

        let previous: BTreeSet<String> = meta
            .managed_fields
            .iter()
            .find(|e| e.manager == manager && e.operation == FieldOperation::Apply)
            .map(|e| field.owned(e).clone())
            .unwrap_or_default();

        for key in previous.iter().filter(|k| !wanted.contains_key(*k)) {
            let still_owned = meta.managed_fields.iter().any(|e| {
                !(e.manager == manager && e.operation == FieldOperation::Apply)
                    && field.owned(e).contains(key)
            });
            if !still_owned {
                field.values_mut(meta).remove(key);
            }
        }

        let values = field.values_mut(meta);
        for (key, value) in wanted {
            values.insert(key.clone(), value.clone());
        }

        *field.owned_mut(entry_mut(&mut meta.managed_fields, manager, FieldOperation::Apply)) =
            wanted.keys().cloned().collect();
    }

    meta.managed_fields.retain(|e| !e.is_empty());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn apply_labels(meta: &mut ObjectMeta, manager: &str, labels: &[(&str, &str)]) -> Result<(), Vec<String>> {
        let mut request = MetadataApply::new(manager);
        request.labels = labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        apply(meta, &request)
    }

    #[test]
    fn apply_retracts_keys_no_longer_asserted() {
        let mut meta = ObjectMeta::named("sub");
        apply_labels(&mut meta, "ctrl", &[("team", "neco"), ("tier", "1")]).unwrap();
        assert_eq!(meta.labels.len(), 2);

        apply_labels(&mut meta, "ctrl", &[("team", "neco")]).unwrap();
        assert_eq!(meta.label("tier"), None);
        assert_eq!(meta.label("team"), Some("neco"));
    }

    #[test]
    fn apply_keeps_keys_owned_elsewhere() {
        let mut meta = ObjectMeta::named("sub");
        apply_labels(&mut meta, "ctrl", &[("team", "neco")]).unwrap();

        let old = meta.clone();
        meta.labels.insert("team".into(), "neco".into());
        meta.labels.insert("own".into(), "x".into());
        record_update(&old, &mut meta, "user");

        apply_labels(&mut meta, "ctrl", &[]).unwrap();
        assert_eq!(meta.label("team"), None);
        assert_eq!(meta.label("own"), Some("x"));
    }

    #[test]
    fn update_written_keys_survive_apply() {
        let mut meta = ObjectMeta::named("sub");
        let old = meta.clone();
        meta.labels.insert("legacy".into(), "v".into());
        record_update(&old, &mut meta, "ctrl");

        apply_labels(&mut meta, "ctrl", &[("legacy", "v")]).unwrap();
        apply_labels(&mut meta, "ctrl", &[]).unwrap();
        assert_eq!(meta.label("legacy"), Some("v"));
    }

    #[test]
    fn conflicts_require_force() {
        let mut meta = ObjectMeta::named("sub");
        let old = meta.clone();
        meta.labels.insert("team".into(), "a".into());
        record_update(&old, &mut meta, "user");

        let err = apply_labels(&mut meta, "ctrl", &[("team", "b")]).unwrap_err();
        assert_eq!(err, vec!["metadata.labels.team".to_string()]);

        let mut request = MetadataApply::new("ctrl").forced();
        request.labels.insert("team".into(), "b".into());
        apply(&mut meta, &request).unwrap();
        assert_eq!(meta.label("team"), Some("b"));
        assert!(meta.managed_fields.iter().all(|e| e.manager == "ctrl"));
    }

    #[test]
    fn update_releases_changed_keys() {
        let mut meta = ObjectMeta::named("sub");
        apply_labels(&mut meta, "ctrl", &[("team", "neco")]).unwrap();

        let old = meta.clone();
        meta.labels.remove("team");
        record_update(&old, &mut meta, "user");
        assert!(meta.managed_fields.is_empty());
    }
}
