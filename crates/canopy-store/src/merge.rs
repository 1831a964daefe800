//! JSON merge patch (RFC 7386)

use serde_json::{Map, Value};

/// Apply `patch` to `target` in place
///
/// Objects merge recursively, `null` removes a member, anything else
/// replaces the target value.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// Compute the merge patch that turns `from` into `to`
#[must_use]
pub fn diff(from: &Value, to: &Value) -> Value {
    match (from, to) {
        (Value::Object(a), Value::Object(b)) => {
            let mut patch = Map::new();
            for key in a.keys().filter(|k| !b.contains_key(*k)) {
                patch.insert(key.clone(), Value::Null);
            }
            for (key, value) in b {
                match a.get(key) {
                    Some(old) if old == value => {}
                    Some(old) => {
                        patch.insert(key.clone(), diff(old, value));
                    }
                    None => {
                        patch.insert(key.clone(), value.clone());
                    }
                }
            }
            Value::Object(patch)
        }
        _ => to.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn rfc7386_examples() {
        let mut target = json!({"a": "b", "c": {"d": "e", "f": "g"}});
        merge_patch(&mut target, &json!({"a": "z", "c": {"f": null}}));
        assert_eq!(target, json!({"a": "z", "c": {"d": "e"}}));

        let mut target = json!({"a": [1, 2]});
        merge_patch(&mut target, &json!({"a": [3]}));
        assert_eq!(target, json!({"a": [3]}));

        let mut target = json!("scalar");
        merge_patch(&mut target, &json!({"a": {"b": null}}));
        assert_eq!(target, json!({"a": {}}));
    }

    #[test]
    fn diff_then_patch_reaches_target() {
        let from = json!({"metadata": {"finalizers": ["x"], "labels": {"a": "1"}}, "spec": {"k": 1}});
        let to = json!({"metadata": {"labels": {"a": "1", "b": "2"}}, "spec": {"k": 1}});
        let patch = diff(&from, &to);
        assert_eq!(
            patch,
            json!({"metadata": {"finalizers": null, "labels": {"b": "2"}}})
        );

        let mut applied = from.clone();
        merge_patch(&mut applied, &patch);
        assert_eq!(applied, to);
    }
}
