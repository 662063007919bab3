//! # Configuration Sources
//!
//! An explicit key/value view of the process environment. Values written as
//! `ref+<scheme>://<location>[#<fragment>]` are secret references and are
//! replaced by the secret preprocessor before the configuration is consumed.

use super::errors::SecretError;
use mesh_types::FieldDescriptor;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Marker prefix for secret references.
pub const REFERENCE_PREFIX: &str = "ref+";

const SCHEME_SEPARATOR: &str = "://";

/// Whether `value` looks like a secret reference.
#[must_use]
pub fn is_reference(value: &str) -> bool {
    value.starts_with(REFERENCE_PREFIX)
}

/// Environment-style configuration values keyed by variable name.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConfigSource {
    values: BTreeMap<String, String>,
}

impl ConfigSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current process environment.
    ///
    /// Variables whose name or value is not valid UTF-8 are skipped.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_os_vars(std::env::vars_os())
    }

    /// Collect platform-encoded pairs, skipping any that are not UTF-8.
    #[must_use]
    pub fn from_os_vars(vars: impl IntoIterator<Item = (OsString, OsString)>) -> Self {
        vars.into_iter()
            .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
                (Ok(key), Ok(value)) => Some((key, value)),
                (Ok(key), Err(_)) => {
                    warn!(key = %key, "Skipping environment variable with non-UTF-8 value");
                    None
                }
                (Err(key), _) => {
                    warn!(key = ?key, "Skipping environment variable with non-UTF-8 name");
                    None
                }
            })
            .collect()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Insert or replace a value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.values.insert(key.into(), value.into())
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether any value is a secret reference.
    #[must_use]
    pub fn has_references(&self) -> bool {
        self.values.values().any(|v| is_reference(v))
    }

    /// Keys whose value is a secret reference, in key order.
    #[must_use]
    pub fn reference_keys(&self) -> Vec<&str> {
        self.values
            .iter()
            .filter(|(_, v)| is_reference(v))
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// Fill unset keys from field defaults. Returns how many were filled.
    pub fn apply_defaults(&mut self, fields: &[FieldDescriptor]) -> usize {
        let mut filled = 0;
        for field in fields {
            if field.default.is_empty() || self.values.contains_key(&field.env_key) {
                continue;
            }
            self.values
                .insert(field.env_key.clone(), field.default.clone());
            filled += 1;
        }
        filled
    }

    /// Environment keys of required fields with no (or an empty) value.
    #[must_use]
    pub fn missing_required<'a>(&self, fields: &'a [FieldDescriptor]) -> Vec<&'a str> {
        fields
            .iter()
            .filter(|f| f.required)
            .filter(|f| self.get(&f.env_key).map_or(true, str::is_empty))
            .map(|f| f.env_key.as_str())
            .collect()
    }
}

impl fmt::Debug for ConfigSource {
    // Values may be secrets.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ConfigSource {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A parsed `ref+<scheme>://<location>[#<fragment>]` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretReference {
    pub scheme: String,
    pub location: String,
    pub fragment: Option<String>,
}

impl FromStr for SecretReference {
    type Err = SecretError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| SecretError::InvalidReference {
            reference: s.to_string(),
            reason,
        };
        let rest = s
            .strip_prefix(REFERENCE_PREFIX)
            .ok_or_else(|| invalid("missing ref+ prefix"))?;
        let (scheme, target) = rest
            .split_once(SCHEME_SEPARATOR)
            .ok_or_else(|| invalid("missing ://"))?;
        if scheme.is_empty() {
            return Err(invalid("empty scheme"));
        }
        if !scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(invalid("scheme must be alphanumeric"));
        }
        let (location, fragment) = match target.rsplit_once('#') {
            Some((location, fragment)) => (location, Some(fragment.to_string())),
            None => (target, None),
        };
        if location.is_empty() {
            return Err(invalid("empty location"));
        }
        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            location: location.to_string(),
            fragment: fragment.filter(|f| !f.is_empty()),
        })
    }
}

impl fmt::Display for SecretReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{REFERENCE_PREFIX}{}{SCHEME_SEPARATOR}{}",
            self.scheme, self.location
        )?;
        if let Some(fragment) = &self.fragment {
            write!(f, "#{fragment}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reference() {
        let r: SecretReference = "ref+vault://secret/db#password".parse().unwrap();
        assert_eq!(r.scheme, "vault");
        assert_eq!(r.location, "secret/db");
        assert_eq!(r.fragment.as_deref(), Some("password"));
        assert_eq!(r.to_string(), "ref+vault://secret/db#password");

        let r: SecretReference = "ref+file:///run/secrets/token".parse().unwrap();
        assert_eq!(r.scheme, "file");
        assert_eq!(r.location, "/run/secrets/token");
        assert_eq!(r.fragment, None);
    }

    #[test]
    fn test_fragment_splits_on_last_hash() {
        let r: SecretReference = "ref+echo://a#b#c".parse().unwrap();
        assert_eq!(r.location, "a#b");
        assert_eq!(r.fragment.as_deref(), Some("c"));
    }

    #[test]
    fn test_malformed_references() {
        for bad in ["vault://x", "ref+vault:x", "ref+://x", "ref+va ult://x", "ref+echo://"] {
            assert!(
                matches!(
                    bad.parse::<SecretReference>(),
                    Err(SecretError::InvalidReference { .. })
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_reference_keys() {
        let source: ConfigSource = [
            ("APP_DB_PASSWORD", "ref+echo://hunter2"),
            ("APP_HOST", "localhost"),
            ("APP_API_KEY", "ref+file://key"),
        ]
        .into_iter()
        .collect();
        assert!(source.has_references());
        assert_eq!(source.reference_keys(), vec!["APP_API_KEY", "APP_DB_PASSWORD"]);
    }

    #[test]
    fn test_debug_hides_values() {
        let source: ConfigSource = [("APP_DB_PASSWORD", "hunter2")].into_iter().collect();
        let debug = format!("{source:?}");
        assert!(debug.contains("APP_DB_PASSWORD"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_defaults_and_missing_required() {
        let mut host = FieldDescriptor::new("Host", "string", "APP_HOST");
        host.default = "localhost".to_string();
        let mut password = FieldDescriptor::new("Password", "string", "APP_PASSWORD");
        password.required = true;
        let mut token = FieldDescriptor::new("Token", "string", "APP_TOKEN");
        token.required = true;
        let fields = vec![host, password, token];

        let mut source: ConfigSource = [("APP_TOKEN", "")].into_iter().collect();
        assert_eq!(source.apply_defaults(&fields), 1);
        assert_eq!(source.get("APP_HOST"), Some("localhost"));
        assert_eq!(source.missing_required(&fields), vec!["APP_PASSWORD", "APP_TOKEN"]);

        source.insert("APP_HOST", "db.internal");
        assert_eq!(source.apply_defaults(&fields), 0);
        assert_eq!(source.get("APP_HOST"), Some("db.internal"));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_environment_entries_skipped() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let binary = OsStr::from_bytes(&[0x66, 0xff, 0x6f]).to_os_string();
        let source = ConfigSource::from_os_vars([
            (OsString::from("APP_HOST"), OsString::from("db")),
            (OsString::from("APP_BINARY"), binary.clone()),
            (binary, OsString::from("value")),
        ]);
        assert_eq!(source.len(), 1);
        assert_eq!(source.get("APP_HOST"), Some("db"));

        let raw = OsStr::from_bytes(&[0x66, 0xff, 0x6f]);
        std::env::set_var("MESH_REGISTRY_TEST_BINARY_VALUE", raw);
        std::env::set_var("MESH_REGISTRY_TEST_PLAIN_VALUE", "plain");
        let snapshot = ConfigSource::from_env();
        assert!(!snapshot.contains_key("MESH_REGISTRY_TEST_BINARY_VALUE"));
        assert_eq!(snapshot.get("MESH_REGISTRY_TEST_PLAIN_VALUE"), Some("plain"));
        std::env::remove_var("MESH_REGISTRY_TEST_BINARY_VALUE");
        std::env::remove_var("MESH_REGISTRY_TEST_PLAIN_VALUE");
    }
}
