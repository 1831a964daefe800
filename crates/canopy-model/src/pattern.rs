//! Shell-style key patterns
//!
//! Allowlists and exclude lists are written as globs with `path.Match`
//! semantics:
//! - `*` matches any run of non-`/` characters
//! - `?` matches a single non-`/` character
//! - `[abc]`, `[a-z]`, `[^a-z]` match character classes
//! - `\` escapes the next character
//!
//! Patterns are compiled once into anchored regexes.

use crate::error::ModelError;
use regex::Regex;

/// A compiled glob
#[derive(Debug, Clone)]
pub struct KeyPattern {
    source: String,
    regex: Regex,
}

impl KeyPattern {
    /// Compile a glob
    ///
    /// # Errors
    /// Returns [`ModelError::MalformedPattern`] for unterminated classes,
    /// empty classes, inverted ranges, or a trailing escape.
    pub fn new(glob: &str) -> Result<Self, ModelError> {
        let translated = translate(glob).map_err(|reason| ModelError::MalformedPattern {
            pattern: glob.to_string(),
            reason: reason.to_string(),
        })?;
        let regex = Regex::new(&translated).map_err(|e| ModelError::MalformedPattern {
            pattern: glob.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: glob.to_string(),
            regex,
        })
    }

    /// Original glob text
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Test a key
    #[inline]
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }
}

/// An ordered set of globs; a key matches if any glob does
#[derive(Debug, Clone, Default)]
pub struct KeyPatternSet {
    patterns: Vec<KeyPattern>,
}

impl KeyPatternSet {
    /// Compile every glob
    ///
    /// # Errors
    /// Returns the first compile failure.
    pub fn compile<S: AsRef<str>>(globs: &[S]) -> Result<Self, ModelError> {
        let patterns = globs
            .iter()
            .map(|g| KeyPattern::new(g.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Check whether any pattern matches
    #[must_use]
    pub fn matches_any(&self, key: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(key))
    }

    /// Number of patterns
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Check if empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

fn push_literal(out: &mut String, c: char) {
    let mut buf = [0u8; 4];
    out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
}

fn push_class_char(out: &mut String, c: char) {
    if c.is_ascii_punctuation() {
        out.push('\\');
    }
    out.push(c);
}

fn translate(glob: &str) -> Result<String, &'static str> {
    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');
    let mut chars = glob.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '\\' => {
                let escaped = chars.next().ok_or("trailing escape")?;
                push_literal(&mut out, escaped);
            }
            '[' => {
                out.push('[');
                if chars.peek() == Some(&'^') {
                    chars.next();
                    out.push('^');
                }
                let mut ranges = 0usize;
                loop {
                    let lo = match chars.next() {
                        None => return Err("unterminated character class"),
                        Some(']') if ranges > 0 => break,
                        Some(']') => return Err("empty character class"),
                        Some('\\') => chars.next().ok_or("trailing escape")?,
                        Some(other) => other,
                    };
                    push_class_char(&mut out, lo);
                    if chars.peek() == Some(&'-') {
                        chars.next();
                        let hi = match chars.next() {
                            None | Some(']') => return Err("incomplete range"),
                            Some('\\') => chars.next().ok_or("trailing escape")?,
                            Some(other) => other,
                        };
                        if hi < lo {
                            return Err("inverted range");
                        }
                        out.push('-');
                        push_class_char(&mut out, hi);
                    }
                    ranges += 1;
                }
                out.push(']');
            }
            other => push_literal(&mut out, other),
        }
    }

    out.push('$');
    Ok(out)
}
