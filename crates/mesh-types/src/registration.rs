//! # Registration Records
//!
//! The registry value written by every running instance.
//!
//! ## Wire Format
//!
//! ```text
//! {
//!   "github":   { "org", "repo", "commit"?, "tag"?, "branch"? },
//!   "instance": { "id", "host", "started" },
//!   "fields":   [ { "path", "type", "env_key", "default"?, "required"?,
//!                   "is_secret"?, "dependency"? } ]
//! }
//! ```
//!
//! Key format: `{org}.{repo}.{instance_id}`

use crate::errors::WireError;
use crate::identity::{optional_name, ServiceIdentity, VersionInfo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Length of the generated instance identifier.
const INSTANCE_ID_LEN: usize = 8;

/// Identity plus build coordinates, serialized as the `github` object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    #[serde(flatten)]
    pub identity: ServiceIdentity,
    #[serde(flatten)]
    pub version: VersionInfo,
}

impl SourceInfo {
    /// Create from an identity without build coordinates.
    #[must_use]
    pub fn new(identity: ServiceIdentity) -> Self {
        Self {
            identity,
            version: VersionInfo::default(),
        }
    }

    /// Attach build coordinates.
    #[must_use]
    pub fn with_version(mut self, version: VersionInfo) -> Self {
        self.version = version;
        self
    }

    /// Used by [`crate::build_info!`]. Invalid or missing coordinates fall
    /// back to `unknown/<package>`.
    #[doc(hidden)]
    #[must_use]
    pub fn from_build(
        org: Option<&str>,
        repo: Option<&str>,
        package: &str,
        version: VersionInfo,
    ) -> Self {
        let identity = ServiceIdentity::new(org.unwrap_or("unknown"), repo.unwrap_or(package))
            .or_else(|_| ServiceIdentity::new("unknown", package))
            .unwrap_or_else(|_| ServiceIdentity::unknown());
        Self { identity, version }
    }
}

/// One running process of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    /// Unique per process.
    pub id: String,
    /// Host (or host:port) the instance is reachable on. May be empty.
    pub host: String,
    /// Process start time.
    pub started: DateTime<Utc>,
}

impl InstanceInfo {
    /// Create a fresh instance record with a random identifier.
    #[must_use]
    pub fn generate(host: impl Into<String>) -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(INSTANCE_ID_LEN);
        Self {
            id,
            host: host.into(),
            started: Utc::now(),
        }
    }
}

/// Description of one leaf configuration field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Dotted field path, e.g. `DB.Password`.
    pub path: String,
    /// Semantic type name, e.g. `string`, `int`, `duration`.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Environment variable carrying the value.
    pub env_key: String,
    /// Default value; empty when there is none.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    /// Masked in any output.
    #[serde(rename = "is_secret", default, skip_serializing_if = "is_false")]
    pub secret: bool,
    /// Service this field points at, if the field is a dependency.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "optional_name"
    )]
    pub dependency: Option<ServiceIdentity>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl FieldDescriptor {
    /// A plain optional field with no default.
    #[must_use]
    pub fn new(
        path: impl Into<String>,
        type_name: impl Into<String>,
        env_key: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            type_name: type_name.into(),
            env_key: env_key.into(),
            default: String::new(),
            required: false,
            secret: false,
            dependency: None,
        }
    }
}

/// The complete record stored under a [`RegistryKey`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    #[serde(rename = "github")]
    pub source: SourceInfo,
    pub instance: InstanceInfo,
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
}

impl ServiceRegistration {
    #[must_use]
    pub fn new(source: SourceInfo, instance: InstanceInfo, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            source,
            instance,
            fields,
        }
    }

    /// Identity of the service this instance belongs to.
    #[must_use]
    pub fn identity(&self) -> &ServiceIdentity {
        &self.source.identity
    }

    /// Registry key of this instance.
    #[must_use]
    pub fn key(&self) -> RegistryKey {
        RegistryKey::new(&self.source.identity, &self.instance.id)
    }

    /// Whether any field declares a dependency on `identity`.
    #[must_use]
    pub fn depends_on(&self, identity: &ServiceIdentity) -> bool {
        self.fields
            .iter()
            .any(|f| f.dependency.as_ref() == Some(identity))
    }

    /// Encode as the registry value.
    pub fn to_json(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(WireError::Encode)
    }

    /// Encode as indented JSON (schema dumps).
    pub fn to_json_pretty(&self) -> Result<String, WireError> {
        serde_json::to_string_pretty(self).map_err(WireError::Encode)
    }

    /// Decode a registry value.
    pub fn from_json(bytes: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(bytes).map_err(WireError::Decode)
    }
}

/// `{org}.{repo}.{instance_id}`: unique and stable per running instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistryKey(String);

impl RegistryKey {
    #[must_use]
    pub fn new(identity: &ServiceIdentity, instance_id: &str) -> Self {
        Self(format!("{}{}", identity.key_prefix(), instance_id))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this key belongs to an instance of `identity`.
    #[must_use]
    pub fn belongs_to(&self, identity: &ServiceIdentity) -> bool {
        self.0.starts_with(&identity.key_prefix())
    }
}

impl fmt::Display for RegistryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RegistryKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn sample() -> ServiceRegistration {
        let identity = ServiceIdentity::new("acme", "billing").unwrap();
        let mut password = FieldDescriptor::new("DB.Password", "string", "APP_DB_PASSWORD");
        password.required = true;
        password.secret = true;
        let mut host = FieldDescriptor::new("DB.Host", "string", "APP_DB_HOST");
        host.default = "localhost".to_string();
        let mut ledger = FieldDescriptor::new("Ledger.URL", "string", "APP_LEDGER_URL");
        ledger.dependency = Some(ServiceIdentity::new("acme", "ledger").unwrap());

        ServiceRegistration::new(
            SourceInfo::new(identity).with_version(VersionInfo {
                commit: Some("abc123".to_string()),
                tag: None,
                branch: Some("main".to_string()),
            }),
            InstanceInfo {
                id: "deadbeef".to_string(),
                host: "10.0.0.1:8080".to_string(),
                started: DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
                    .unwrap()
                    .with_timezone(&Utc),
            },
            vec![password, host, ledger],
        )
    }

    #[test]
    fn test_wire_format_keys() {
        let json: Value = serde_json::from_slice(&sample().to_json().unwrap()).unwrap();

        assert_eq!(json["github"]["org"], "acme");
        assert_eq!(json["github"]["repo"], "billing");
        assert_eq!(json["github"]["commit"], "abc123");
        assert!(json["github"].get("tag").is_none());
        assert_eq!(json["instance"]["id"], "deadbeef");
        assert_eq!(json["instance"]["started"], "2026-01-02T03:04:05Z");

        let fields = json["fields"].as_array().unwrap();
        assert_eq!(fields[0]["env_key"], "APP_DB_PASSWORD");
        assert_eq!(fields[0]["type"], "string");
        assert_eq!(fields[0]["is_secret"], true);
        assert_eq!(fields[0]["required"], true);
        assert!(fields[0].get("default").is_none());
        assert_eq!(fields[1]["default"], "localhost");
        assert!(fields[1].get("required").is_none());
        assert_eq!(fields[2]["dependency"], "acme/ledger");
    }

    #[test]
    fn test_decode_external_record() {
        let raw = br#"{
            "github": {"org": "acme", "repo": "api"},
            "instance": {"id": "1234abcd", "host": "", "started": "2026-03-01T00:00:00Z"},
            "fields": [
                {"path": "Port", "type": "int", "env_key": "API_PORT", "default": "8080"},
                {"path": "Auth", "type": "string", "env_key": "API_AUTH", "dependency": ""}
            ]
        }"#;
        let reg = ServiceRegistration::from_json(raw).unwrap();
        assert_eq!(reg.key().as_str(), "acme.api.1234abcd");
        assert_eq!(reg.fields[0].default, "8080");
        assert!(!reg.fields[0].required);
        assert_eq!(reg.fields[1].dependency, None);
        assert_eq!(reg.source.version, VersionInfo::default());
    }

    #[test]
    fn test_malformed_payload_is_decode_error() {
        assert!(matches!(
            ServiceRegistration::from_json(b"{not json"),
            Err(WireError::Decode(_))
        ));
        let bad_identity = br#"{"github":{"org":"a.b","repo":"c"},"instance":{"id":"x","host":"","started":"2026-03-01T00:00:00Z"}}"#;
        assert!(ServiceRegistration::from_json(bad_identity).is_err());
    }

    #[test]
    fn test_key_and_dependency_helpers() {
        let reg = sample();
        let key = reg.key();
        assert_eq!(key.to_string(), "acme.billing.deadbeef");
        assert!(key.belongs_to(&ServiceIdentity::new("acme", "billing").unwrap()));
        assert!(!key.belongs_to(&ServiceIdentity::new("acme", "bill").unwrap()));
        assert!(reg.depends_on(&ServiceIdentity::new("acme", "ledger").unwrap()));
        assert!(!reg.depends_on(&ServiceIdentity::new("acme", "billing").unwrap()));
    }

    #[test]
    fn test_generated_instance_ids_are_short_and_distinct() {
        let a = InstanceInfo::generate("");
        let b = InstanceInfo::generate("");
        assert_eq!(a.id.len(), INSTANCE_ID_LEN);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_from_build_fallback() {
        let info = SourceInfo::from_build(Some("bad.org"), None, "my-svc", VersionInfo::default());
        assert_eq!(info.identity.name(), "unknown/my-svc");
        let info = SourceInfo::from_build(Some("acme"), Some("api"), "ignored", VersionInfo::default());
        assert_eq!(info.identity.name(), "acme/api");
    }
}
