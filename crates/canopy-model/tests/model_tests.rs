//! Property tests for key patterns and key syntax, plus intent status decoding

use canopy_model::{
    markers, validate_labels, ConditionStatus, IntentState, IntentStatus, KeyPattern, Role, Scope, ScopeClass,
    CONDITION_STALLED, REASON_CONFLICT,
};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn escape_glob(literal: &str) -> String {
    let mut out = String::new();
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

proptest! {
    #[test]
    fn prop_escaped_literal_matches_only_itself(key in "[ -~]{0,24}", other in "[ -~]{0,24}") {
        let pattern = KeyPattern::new(&escape_glob(&key)).unwrap();
        prop_assert!(pattern.matches(&key));
        prop_assert_eq!(pattern.matches(&other), other == key);
    }

    #[test]
    fn prop_star_stays_within_segment(prefix in "[a-z.]{1,12}", name in "[a-z0-9-]{1,12}") {
        let key = format!("{prefix}/{name}");
        prop_assert!(!KeyPattern::new("*").unwrap().matches(&key));
        prop_assert!(KeyPattern::new("*/*").unwrap().matches(&key));
        let prefixed = KeyPattern::new(&format!("{}/*", escape_glob(&prefix))).unwrap();
        prop_assert!(prefixed.matches(&key));
    }

    #[test]
    fn prop_well_formed_labels_validate(
        prefix in "[a-z0-9]([a-z0-9-]{0,10}[a-z0-9])?",
        name in "[A-Za-z0-9]([A-Za-z0-9_.-]{0,20}[A-Za-z0-9])?",
        value in "([A-Za-z0-9]([A-Za-z0-9_.-]{0,20}[A-Za-z0-9])?)?",
    ) {
        let labels = BTreeMap::from([(format!("{prefix}.io/{name}"), value)]);
        prop_assert!(validate_labels(&labels, "metadata.labels").is_empty());
    }

    #[test]
    fn prop_label_edges_must_be_alphanumeric(name in "[a-z]{1,8}", edge in "[-_.]") {
        let leading = BTreeMap::from([(format!("{edge}{name}"), String::new())]);
        let trailing = BTreeMap::from([("team".to_string(), format!("{name}{edge}"))]);
        prop_assert_eq!(validate_labels(&leading, "metadata.labels").len(), 1);
        prop_assert_eq!(validate_labels(&trailing, "metadata.labels").len(), 1);
    }
}

#[test]
fn test_uppercase_prefix_is_rejected() {
    let labels = BTreeMap::from([("Example.com/team".to_string(), "a".to_string())]);
    let errs = validate_labels(&labels, "spec.labels");
    assert_eq!(errs.len(), 1);
    assert_eq!(errs[0].path, "spec.labels");
}

#[test]
fn test_unknown_role_still_counts_as_declared() {
    let odd = Scope::new("x").with_template("t").with_label(markers::LABEL_TYPE, "bogus");
    assert_eq!(odd.role(), Role::None);
    assert!(odd.declares_role());
    assert_eq!(
        odd.classify(),
        ScopeClass::Instance {
            template: "t".into(),
            role: Role::None
        }
    );
    assert_eq!(odd.upstream_ref(), Some("t"));
}

#[test]
fn test_conflict_status_decodes_with_pascal_case_state() {
    let status: IntentStatus = serde_json::from_value(serde_json::json!({
        "observedGeneration": 3,
        "state": "Conflict",
        "conditions": [{
            "type": CONDITION_STALLED,
            "status": "True",
            "reason": REASON_CONFLICT,
            "message": "taken",
            "lastTransitionTime": "2024-01-01T00:00:00Z",
        }],
    }))
    .unwrap();
    assert_eq!(status.state, Some(IntentState::Conflict));
    let stalled = status.condition(CONDITION_STALLED).unwrap();
    assert_eq!(stalled.status, ConditionStatus::True);
    assert_eq!(stalled.reason, REASON_CONFLICT);

    let lowercase = serde_json::from_value::<IntentStatus>(serde_json::json!({"state": "ok"}));
    assert!(lowercase.is_err());
}
