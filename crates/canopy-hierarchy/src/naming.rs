//! Naming policies for sub-scopes
//!
//! A policy applies when its `root` pattern matches the name of the root an
//! intent lives under. The `match` template is expanded with the captures of
//! every root match, concatenated, and the result must match the requested
//! child name.

use crate::error::{AdmissionError, Denial};
use canopy_model::NamingPolicyRegex;
use regex::Regex;

/// Check `target` against every applicable policy
///
/// Returns the first violated policy as a [`Denial`], or `None` if all
/// applicable policies accept the name.
///
/// # Errors
/// Returns [`AdmissionError::NamingPolicy`] if an expanded template does not
/// compile.
pub fn check(
    policies: &[NamingPolicyRegex],
    scope: &str,
    target: &str,
    root: &str,
) -> Result<Option<Denial>, AdmissionError> {
    for policy in policies {
        let Some(pattern) = expand(policy, root) else {
            continue;
        };
        let compiled = Regex::new(&pattern).map_err(|source| AdmissionError::NamingPolicy {
            pattern: pattern.clone(),
            source,
        })?;
        if !compiled.is_match(target) {
            return Ok(Some(Denial::NamingPolicyViolation {
                scope: scope.to_string(),
                target: target.to_string(),
                root: root.to_string(),
                policy_root: policy.root.as_str().to_string(),
                policy_match: policy.match_template.clone(),
            }));
        }
    }
    Ok(None)
}

/// Expanded `match` pattern, `None` if the policy does not apply to `root`
#[must_use]
pub fn expand(policy: &NamingPolicyRegex, root: &str) -> Option<String> {
    let mut expanded = String::new();
    let mut applies = false;
    for caps in policy.root.captures_iter(root) {
        applies = true;
        caps.expand(&policy.match_template, &mut expanded);
    }
    applies.then_some(expanded)
}
