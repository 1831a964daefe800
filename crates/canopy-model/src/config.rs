//! Configuration value object
//!
//! Loaded once at startup and handed to each component at construction. No
//! component reads configuration from global state.

use crate::error::ConfigError;
use crate::kind::GroupVersionKind;
use crate::markers;
use crate::pattern::KeyPatternSet;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Naming policy for children of matching roots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct NamingPolicy {
    /// Regex matched against the root scope name
    pub root: String,
    /// Template expanded with `root` captures; the result must match child names
    #[serde(rename = "match")]
    pub match_template: String,
}

/// A naming policy with its root pattern compiled
#[derive(Debug, Clone)]
pub struct NamingPolicyRegex {
    /// Compiled root pattern
    pub root: Regex,
    /// Match template, expanded per root
    pub match_template: String,
}

/// The configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// Label keys propagated from parents and templates
    #[serde(default)]
    pub label_keys: Vec<String>,
    /// Annotation keys propagated from parents and templates
    #[serde(default)]
    pub annotation_keys: Vec<String>,
    /// Label keys propagated from intents to their sub-scopes
    #[serde(default)]
    pub sub_namespace_label_keys: Vec<String>,
    /// Annotation keys propagated from intents to their sub-scopes
    #[serde(default)]
    pub sub_namespace_annotation_keys: Vec<String>,
    /// Namespace-scoped kinds whose objects are propagated
    #[serde(default)]
    pub watches: Vec<GroupVersionKind>,
    /// Label and annotation keys that are never propagated
    #[serde(default)]
    pub propagation_key_excludes: Vec<String>,
    /// Naming policies for sub-scopes
    #[serde(default)]
    pub naming_policies: Vec<NamingPolicy>,
    /// Never consult owners of generated objects
    #[serde(default)]
    pub disable_propagate_generated: bool,
}

/// Configuration with every pattern compiled
#[derive(Debug, Clone, Default)]
pub struct ValidatedConfig {
    /// Compiled `labelKeys`
    pub label_keys: KeyPatternSet,
    /// Compiled `annotationKeys`
    pub annotation_keys: KeyPatternSet,
    /// Compiled `subNamespaceLabelKeys`
    pub sub_scope_label_keys: KeyPatternSet,
    /// Compiled `subNamespaceAnnotationKeys`
    pub sub_scope_annotation_keys: KeyPatternSet,
    /// Compiled `propagationKeyExcludes`
    pub propagation_key_excludes: KeyPatternSet,
    /// Watched kinds
    pub watches: Vec<GroupVersionKind>,
    /// Compiled naming policies
    pub naming_policies: Vec<NamingPolicyRegex>,
    /// Feature switch for generated objects
    pub disable_propagate_generated: bool,
}

impl Config {
    /// Parse YAML, rejecting unknown fields
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] on malformed input.
    pub fn load(data: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(data)?)
    }

    /// Read and parse a config file
    ///
    /// # Errors
    /// Returns IO or parse errors.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| ConfigError::io_error(path, e))?;
        Self::load(&data)
    }

    /// Compile every pattern
    ///
    /// Watched kinds are checked separately against the store's discovery.
    ///
    /// # Errors
    /// Returns the first malformed glob, reserved allowlist key, or invalid
    /// naming policy.
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        let label_keys = compile_allowlist("labelKeys", &self.label_keys)?;
        let annotation_keys = compile_allowlist("annotationKeys", &self.annotation_keys)?;
        let sub_scope_label_keys =
            compile_allowlist("subNamespaceLabelKeys", &self.sub_namespace_label_keys)?;
        let sub_scope_annotation_keys = compile_allowlist(
            "subNamespaceAnnotationKeys",
            &self.sub_namespace_annotation_keys,
        )?;
        let propagation_key_excludes =
            compile_globs("propagationKeyExcludes", &self.propagation_key_excludes)?;

        let naming_policies = self
            .naming_policies
            .iter()
            .map(|policy| {
                Regex::new(&policy.root)
                    .map(|root| NamingPolicyRegex {
                        root,
                        match_template: policy.match_template.clone(),
                    })
                    .map_err(|source| ConfigError::InvalidNamingPolicy {
                        root: policy.root.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ValidatedConfig {
            label_keys,
            annotation_keys,
            sub_scope_label_keys,
            sub_scope_annotation_keys,
            propagation_key_excludes,
            watches: self.watches.clone(),
            naming_policies,
            disable_propagate_generated: self.disable_propagate_generated,
        })
    }
}

fn compile_globs(field: &'static str, globs: &[String]) -> Result<KeyPatternSet, ConfigError> {
    KeyPatternSet::compile(globs).map_err(|e| match e {
        crate::ModelError::MalformedPattern { pattern, reason } => ConfigError::MalformedPattern {
            field,
            pattern,
            reason,
        },
        other => ConfigError::MalformedPattern {
            field,
            pattern: String::new(),
            reason: other.to_string(),
        },
    })
}

fn compile_allowlist(field: &'static str, globs: &[String]) -> Result<KeyPatternSet, ConfigError> {
    let set = compile_globs(field, globs)?;
    if let Some(key) = globs.iter().find(|k| markers::is_reserved(k)) {
        return Err(ConfigError::ReservedKey {
            field,
            key: key.clone(),
        });
    }
    Ok(set)
}

impl ValidatedConfig {
    /// Check whether a key is excluded from all propagation
    #[inline]
    #[must_use]
    pub fn is_excluded(&self, key: &str) -> bool {
        self.propagation_key_excludes.matches_any(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const SAMPLE: &str = r#"
labelKeys:
  - team
annotationKeys:
  - "foo.bar/*"
subNamespaceLabelKeys:
  - app
watches:
  - group: rbac.authorization.k8s.io
    version: v1
    kind: Role
  - version: v1
    kind: Secret
propagationKeyExcludes:
  - "*.internal/*"
namingPolicies:
  - root: "^foo$"
    match: "^foo-.*$"
  - root: "^(?P<team>.+)-root$"
    match: "^${team}-.*$"
disablePropagateGenerated: true
"#;

    #[test]
    fn loads_sample() {
        let cfg = Config::load(SAMPLE).unwrap();
        assert_eq!(cfg.label_keys, vec!["team".to_string()]);
        assert_eq!(cfg.watches.len(), 2);
        assert_eq!(cfg.watches[1], GroupVersionKind::new("", "v1", "Secret"));
        assert_eq!(cfg.naming_policies[1].match_template, "^${team}-.*$");
        assert!(cfg.disable_propagate_generated);

        let validated = cfg.validate().unwrap();
        assert!(validated.label_keys.matches_any("team"));
        assert!(validated.annotation_keys.matches_any("foo.bar/baz"));
        assert!(validated.is_excluded("a.internal/x"));
        assert_eq!(validated.naming_policies.len(), 2);
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(matches!(Config::load("labelKey: [a]"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn rejects_malformed_glob() {
        let cfg = Config {
            annotation_keys: vec!["[".into()],
            ..Config::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::MalformedPattern { field: "annotationKeys", .. })
        ));
    }

    #[test]
    fn rejects_reserved_allowlist_key() {
        let cfg = Config {
            sub_namespace_label_keys: vec!["canopy.dev/type".into()],
            ..Config::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ReservedKey { field: "subNamespaceLabelKeys", .. })
        ));
    }

    #[test]
    fn rejects_invalid_naming_policy() {
        let cfg = Config {
            naming_policies: vec![NamingPolicy {
                root: "(".into(),
                match_template: ".*".into(),
            }],
            ..Config::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidNamingPolicy { .. })
        ));
    }

    #[test]
    fn from_file_roundtrip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let cfg = Config::from_file(file.path()).unwrap();
        assert_eq!(cfg, Config::load(SAMPLE).unwrap());

        assert!(matches!(
            Config::from_file("/nonexistent/canopy.yaml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
