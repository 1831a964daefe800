//! Label and annotation key syntax
//!
//! Keys are qualified names: an optional DNS-1123 subdomain prefix followed
//! by `/` and a name segment. Label values use the name alphabet and may be
//! empty.

use std::collections::BTreeMap;
use std::fmt;

const QUALIFIED_NAME_MAX_LEN: usize = 63;
const LABEL_VALUE_MAX_LEN: usize = 63;
const DNS1123_SUBDOMAIN_MAX_LEN: usize = 253;
const TOTAL_ANNOTATION_SIZE_LIMIT: usize = 256 * 1024;

/// Alphanumeric at both ends, `inner` everywhere in between
fn bracketed(s: &str, inner: impl Fn(char) -> bool) -> bool {
    let bytes = s.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric() && s.chars().all(inner)
        }
        _ => false,
    }
}

/// `([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]`
fn is_qualified_name(s: &str) -> bool {
    bracketed(s, |c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Dot-separated lowercase RFC 1123 labels
fn is_dns1123_subdomain(s: &str) -> bool {
    s.split('.').all(|label| {
        bracketed(label, |c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    })
}

/// A single validation failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Dotted field path, e.g. `spec.labels`
    pub path: String,
    /// Offending value
    pub value: String,
    /// What is wrong
    pub detail: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: Invalid value: {:?}: {}", self.path, self.value, self.detail)
    }
}

fn invalid(path: &str, value: &str, detail: impl Into<String>) -> FieldError {
    FieldError {
        path: path.to_string(),
        value: value.to_string(),
        detail: detail.into(),
    }
}

fn qualified_name_errors(path: &str, key: &str) -> Vec<FieldError> {
    let mut errs = Vec::new();
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) if !name.contains('/') => (Some(prefix), name),
        Some(_) => {
            errs.push(invalid(
                path,
                key,
                "a qualified name must consist of a name and an optional prefix separated by '/'",
            ));
            return errs;
        }
        None => (None, key),
    };

    if let Some(prefix) = prefix {
        if prefix.is_empty() {
            errs.push(invalid(path, key, "prefix part must be non-empty"));
        } else {
            if prefix.len() > DNS1123_SUBDOMAIN_MAX_LEN {
                errs.push(invalid(
                    path,
                    key,
                    format!("prefix part must be no more than {DNS1123_SUBDOMAIN_MAX_LEN} characters"),
                ));
            }
            if !is_dns1123_subdomain(prefix) {
                errs.push(invalid(
                    path,
                    key,
                    "prefix part must be a lowercase RFC 1123 subdomain",
                ));
            }
        }
    }

    if name.is_empty() {
        errs.push(invalid(path, key, "name part must be non-empty"));
    } else {
        if name.len() > QUALIFIED_NAME_MAX_LEN {
            errs.push(invalid(
                path,
                key,
                format!("name part must be no more than {QUALIFIED_NAME_MAX_LEN} characters"),
            ));
        }
        if !is_qualified_name(name) {
            errs.push(invalid(
                path,
                key,
                "name part must consist of alphanumeric characters, '-', '_' or '.', \
                 and must start and end with an alphanumeric character",
            ));
        }
    }
    errs
}

fn label_value_errors(path: &str, value: &str) -> Vec<FieldError> {
    let mut errs = Vec::new();
    if value.is_empty() {
        return errs;
    }
    if value.len() > LABEL_VALUE_MAX_LEN {
        errs.push(invalid(
            path,
            value,
            format!("must be no more than {LABEL_VALUE_MAX_LEN} characters"),
        ));
    }
    if !is_qualified_name(value) {
        errs.push(invalid(
            path,
            value,
            "a valid label must be an empty string or consist of alphanumeric characters, \
             '-', '_' or '.', and must start and end with an alphanumeric character",
        ));
    }
    errs
}

/// Validate label keys and values
#[must_use]
pub fn validate_labels(labels: &BTreeMap<String, String>, path: &str) -> Vec<FieldError> {
    labels
        .iter()
        .flat_map(|(k, v)| {
            let mut errs = qualified_name_errors(path, k);
            errs.extend(label_value_errors(path, v));
            errs
        })
        .collect()
}

/// Validate annotation keys and the total annotation size
#[must_use]
pub fn validate_annotations(annotations: &BTreeMap<String, String>, path: &str) -> Vec<FieldError> {
    let mut errs: Vec<FieldError> = annotations
        .keys()
        .flat_map(|k| qualified_name_errors(path, &k.to_lowercase()))
        .collect();
    let total: usize = annotations.iter().map(|(k, v)| k.len() + v.len()).sum();
    if total > TOTAL_ANNOTATION_SIZE_LIMIT {
        errs.push(invalid(
            path,
            "",
            format!("annotations size {total} is larger than limit {TOTAL_ANNOTATION_SIZE_LIMIT}"),
        ));
    }
    errs
}
