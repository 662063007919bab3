//! # Subject Matching
//!
//! Validation and wildcard matching for dot-delimited keys and subjects.

use crate::errors::BusError;

/// Matches exactly one token.
pub const SINGLE_WILDCARD: &str = "*";

/// Matches one or more trailing tokens. Only valid as the last token.
pub const TAIL_WILDCARD: &str = ">";

/// Validate a concrete subject (no wildcards).
pub fn validate_subject(subject: &str) -> Result<(), BusError> {
    let invalid = |reason| BusError::InvalidKey {
        key: subject.to_string(),
        reason,
    };
    if subject.is_empty() {
        return Err(invalid("empty"));
    }
    if subject.split('.').any(str::is_empty) {
        return Err(invalid("empty token"));
    }
    if subject.contains(['*', '>']) {
        return Err(invalid("wildcards are not allowed"));
    }
    if subject.chars().any(char::is_whitespace) {
        return Err(invalid("contains whitespace"));
    }
    Ok(())
}

/// Validate a store key: a subject that is also safe as a file name.
pub fn validate_key(key: &str) -> Result<(), BusError> {
    validate_subject(key)?;
    if key.contains(['/', '\\']) {
        return Err(BusError::InvalidKey {
            key: key.to_string(),
            reason: "contains a path separator",
        });
    }
    Ok(())
}

/// Validate a watch/subscribe pattern.
pub fn validate_pattern(pattern: &str) -> Result<(), BusError> {
    let invalid = |reason| BusError::InvalidPattern {
        pattern: pattern.to_string(),
        reason,
    };
    if pattern.is_empty() {
        return Err(invalid("empty"));
    }
    let tokens: Vec<&str> = pattern.split('.').collect();
    let last = tokens.len() - 1;
    for (i, token) in tokens.iter().enumerate() {
        if token.is_empty() {
            return Err(invalid("empty token"));
        }
        if *token == TAIL_WILDCARD && i != last {
            return Err(invalid("'>' must be the last token"));
        }
        if *token != SINGLE_WILDCARD
            && *token != TAIL_WILDCARD
            && token.contains(['*', '>'])
        {
            return Err(invalid("wildcards must occupy a whole token"));
        }
        if token.chars().any(char::is_whitespace) {
            return Err(invalid("contains whitespace"));
        }
    }
    Ok(())
}

/// Whether `subject` is matched by `pattern`.
#[must_use]
pub fn matches(pattern: &str, subject: &str) -> bool {
    let mut subject_tokens = subject.split('.');
    for token in pattern.split('.') {
        if token == TAIL_WILDCARD {
            return subject_tokens.next().is_some();
        }
        match subject_tokens.next() {
            Some(s) if token == SINGLE_WILDCARD || token == s => {}
            _ => return false,
        }
    }
    subject_tokens.next().is_none()
}

/// Whether every subject matched by `pattern` is also matched by `allow`.
#[must_use]
pub fn covers(allow: &str, pattern: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    for token in allow.split('.') {
        if token == TAIL_WILDCARD {
            return pattern_tokens.next().is_some();
        }
        match pattern_tokens.next() {
            Some(TAIL_WILDCARD) | None => return false,
            Some(p) if token == SINGLE_WILDCARD || token == p => {}
            Some(_) => return false,
        }
    }
    pattern_tokens.next().is_none()
}
