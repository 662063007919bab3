//! # Service Identity
//!
//! The stable `org/repo` pair naming a service, plus the optional build
//! coordinates that travel with it in the registry record.

use crate::errors::IdentityError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Characters that would break the dot-delimited key namespace or its
/// wildcard patterns.
const RESERVED: [char; 4] = ['.', '*', '>', '/'];

/// The organization + repository pair naming a service (not an instance).
///
/// Both segments become key segments, so they are validated on construction
/// and on deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawIdentity")]
pub struct ServiceIdentity {
    org: String,
    repo: String,
}

#[derive(Deserialize)]
struct RawIdentity {
    org: String,
    repo: String,
}

impl TryFrom<RawIdentity> for ServiceIdentity {
    type Error = IdentityError;

    fn try_from(raw: RawIdentity) -> Result<Self, Self::Error> {
        Self::new(raw.org, raw.repo)
    }
}

impl ServiceIdentity {
    /// Build an identity, rejecting empty segments and reserved characters.
    pub fn new(org: impl Into<String>, repo: impl Into<String>) -> Result<Self, IdentityError> {
        let org = org.into();
        let repo = repo.into();
        validate_segment("org", &org)?;
        validate_segment("repo", &repo)?;
        Ok(Self { org, repo })
    }

    /// `unknown/unknown`, valid by construction.
    pub(crate) fn unknown() -> Self {
        Self {
            org: "unknown".to_string(),
            repo: "unknown".to_string(),
        }
    }

    /// Organization segment.
    #[must_use]
    pub fn org(&self) -> &str {
        &self.org
    }

    /// Repository segment.
    #[must_use]
    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// The `org/repo` display name.
    #[must_use]
    pub fn name(&self) -> String {
        format!("{}/{}", self.org, self.repo)
    }

    /// Key prefix shared by every instance of this service: `org.repo.`
    #[must_use]
    pub fn key_prefix(&self) -> String {
        format!("{}.{}.", self.org, self.repo)
    }

    /// Watch pattern matching every instance key of this service.
    #[must_use]
    pub fn watch_pattern(&self) -> String {
        format!("{}.{}.*", self.org, self.repo)
    }
}

fn validate_segment(segment: &'static str, value: &str) -> Result<(), IdentityError> {
    if value.is_empty() {
        return Err(IdentityError::EmptySegment { segment });
    }
    if let Some(found) = value
        .chars()
        .find(|c| RESERVED.contains(c) || c.is_whitespace())
    {
        return Err(IdentityError::ReservedCharacter {
            segment,
            value: value.to_string(),
            found,
        });
    }
    Ok(())
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org, self.repo)
    }
}

impl FromStr for ServiceIdentity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (org, repo) = s
            .split_once('/')
            .ok_or_else(|| IdentityError::InvalidName(s.to_string()))?;
        Self::new(org, repo)
    }
}

/// Build coordinates of the running binary. All optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Git commit hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    /// Git tag / release version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Git branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// Serde adapter storing an optional identity as an `org/repo` string.
///
/// An empty string decodes as `None`.
pub mod optional_name {
    use super::ServiceIdentity;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<ServiceIdentity>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(identity) => serializer.serialize_str(&identity.name()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<ServiceIdentity>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) if raw.is_empty() => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(D::Error::custom),
        }
    }
}
