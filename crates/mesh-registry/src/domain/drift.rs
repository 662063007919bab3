//! # Drift Classification
//!
//! Compares two descriptor sets keyed by environment key, the externally
//! observable contract.
//!
//! ## Rules
//!
//! - in `current` only: `Removed`
//! - in `candidate` only: `Added`
//! - in both: one `Modified` per differing attribute (`default`, `required`,
//!   `secret`)
//!
//! Breaking: added required, removed required, optional that became required.
//!
//! Entries are ordered: `current` declaration order (removed/modified), then
//! `candidate` declaration order (added).

use mesh_types::FieldDescriptor;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftKind {
    Added,
    Removed,
    Modified,
}

impl fmt::Display for DriftKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Modified => "modified",
        })
    }
}

/// Attribute that changed in a `Modified` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftAttribute {
    Default,
    Required,
    Secret,
}

/// One structural difference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftEntry {
    pub kind: DriftKind,
    /// Environment key of the field.
    pub field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<DriftAttribute>,
    pub detail: String,
    pub breaking: bool,
}

impl fmt::Display for DriftEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = match self.kind {
            DriftKind::Added => '+',
            DriftKind::Removed => '-',
            DriftKind::Modified => '~',
        };
        write!(f, "{marker} {}: {}", self.field, self.detail)?;
        if self.breaking {
            f.write_str(" [BREAKING]")?;
        }
        Ok(())
    }
}

fn summary(field: &FieldDescriptor) -> String {
    let mut parts = vec![field.type_name.clone()];
    if field.required {
        parts.push("required".to_string());
    }
    if field.secret {
        parts.push("secret".to_string());
    }
    if !field.default.is_empty() {
        parts.push(format!("default {:?}", field.default));
    }
    if let Some(dep) = &field.dependency {
        parts.push(format!("depends on {dep}"));
    }
    parts.join(", ")
}

fn flag_change(now: bool, name: &str) -> String {
    if now {
        format!("now {name}")
    } else {
        format!("no longer {name}")
    }
}

fn by_env_key(fields: &[FieldDescriptor]) -> HashMap<&str, &FieldDescriptor> {
    let mut map = HashMap::with_capacity(fields.len());
    for field in fields {
        map.entry(field.env_key.as_str()).or_insert(field);
    }
    map
}

/// Classify the drift from `current` to `candidate`.
#[must_use]
pub fn diff(current: &[FieldDescriptor], candidate: &[FieldDescriptor]) -> Vec<DriftEntry> {
    let current_map = by_env_key(current);
    let candidate_map = by_env_key(candidate);
    let mut entries = Vec::new();

    for (env_key, old) in current.iter().map(|f| (f.env_key.as_str(), f)) {
        if !std::ptr::eq(current_map[env_key], old) {
            continue;
        }
        let Some(new) = candidate_map.get(env_key) else {
            entries.push(DriftEntry {
                kind: DriftKind::Removed,
                field: env_key.to_string(),
                attribute: None,
                detail: format!("removed ({})", summary(old)),
                breaking: old.required,
            });
            continue;
        };

        let modified = |attribute, detail, breaking| DriftEntry {
            kind: DriftKind::Modified,
            field: env_key.to_string(),
            attribute: Some(attribute),
            detail,
            breaking,
        };
        if old.default != new.default {
            entries.push(modified(
                DriftAttribute::Default,
                format!("default: {:?} -> {:?}", old.default, new.default),
                false,
            ));
        }
        if old.required != new.required {
            entries.push(modified(
                DriftAttribute::Required,
                flag_change(new.required, "required"),
                new.required,
            ));
        }
        if old.secret != new.secret {
            entries.push(modified(
                DriftAttribute::Secret,
                flag_change(new.secret, "secret"),
                false,
            ));
        }
    }

    for (env_key, new) in candidate.iter().map(|f| (f.env_key.as_str(), f)) {
        if !std::ptr::eq(candidate_map[env_key], new) || current_map.contains_key(env_key) {
            continue;
        }
        entries.push(DriftEntry {
            kind: DriftKind::Added,
            field: env_key.to_string(),
            attribute: None,
            detail: format!("added ({})", summary(new)),
            breaking: new.required,
        });
    }

    entries
}

/// Whether any entry is breaking.
#[must_use]
pub fn has_breaking(entries: &[DriftEntry]) -> bool {
    entries.iter().any(|e| e.breaking)
}
