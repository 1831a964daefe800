//! Structural comparison of a copy against the clone it should match
//!
//! Labels and annotations must be equal. In the body, every field the clone
//! sets must be present and equal in the copy; fields the clone leaves empty
//! (`null`, `""`, `{}`, `[]`) match anything. Lists compare element-wise and
//! must have the same length. `status` and server-managed metadata are never
//! looked at.

use canopy_model::DynamicObject;
use serde_json::Value;

/// Check whether `copy` already carries everything `clone` asserts
#[must_use]
pub fn in_sync(clone: &DynamicObject, copy: &DynamicObject) -> bool {
    clone.api_version == copy.api_version
        && clone.kind == copy.kind
        && clone.metadata.labels == copy.metadata.labels
        && clone.metadata.annotations == copy.metadata.annotations
        && clone
            .data
            .iter()
            .all(|(key, want)| derivative(want, copy.data.get(key)))
}

fn derivative(want: &Value, have: Option<&Value>) -> bool {
    match want {
        Value::Null => true,
        Value::String(s) if s.is_empty() => true,
        Value::Object(m) if m.is_empty() => true,
        Value::Array(a) if a.is_empty() => true,
        Value::Object(want) => match have {
            Some(Value::Object(have)) => want.iter().all(|(k, v)| derivative(v, have.get(k))),
            _ => false,
        },
        Value::Array(want) => match have {
            Some(Value::Array(have)) => {
                want.len() == have.len() && want.iter().zip(have).all(|(w, h)| derivative(w, Some(h)))
            }
            _ => false,
        },
        other => have == Some(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_model::GroupVersionKind;
    use serde_json::json;

    fn object(data: Value) -> DynamicObject {
        DynamicObject::new(&GroupVersionKind::new("", "v1", "ConfigMap"), "ns", "a").with_field("data", data)
    }

    #[test]
    fn server_filled_fields_are_ignored() {
        let clone = object(json!({"k": "v", "opt": null, "list": [1, {"x": ""}]}));
        let mut copy = object(json!({"k": "v", "opt": 3, "extra": true, "list": [1, {"x": "filled"}]}));
        copy.metadata.resource_version = 9;
        copy.status = Some(json!({"phase": "Ready"}));
        assert!(in_sync(&clone, &copy));
    }

    #[test]
    fn differences_are_detected() {
        let clone = object(json!({"k": "v"}));
        assert!(!in_sync(&clone, &object(json!({"k": "w"}))));
        assert!(!in_sync(&clone, &object(json!({}))));

        let clone = object(json!({"list": [1, 2]}));
        assert!(!in_sync(&clone, &object(json!({"list": [1, 2, 3]}))));

        let clone = object(json!({"k": "v"})).with_label("team", "a");
        assert!(!in_sync(&clone, &object(json!({"k": "v"}))));
        assert!(!in_sync(&object(json!({"k": "v"})), &clone));
    }
}
