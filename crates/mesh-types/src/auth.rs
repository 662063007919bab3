//! # Auth Lifecycle Types
//!
//! Credential and policy shapes shared by the configurator (which loads them
//! from local persisted state) and the substrate (which enforces them on
//! connect).
//!
//! ```text
//! Dev/Local    none         no auth
//! Test/CI      token        shared token
//! Staging      keypair      ed25519 public/private keypair
//! Production   certificate  operator-signed account + user credential chain
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// The single authentication posture of a process. Fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AuthMode {
    #[default]
    None,
    Token,
    KeyPair,
    Certificate,
}

impl AuthMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Token => "token",
            Self::KeyPair => "keypair",
            Self::Certificate => "certificate",
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized auth mode name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown auth mode: {0} (use: none, token, keypair, certificate)")]
pub struct UnknownAuthMode(pub String);

impl FromStr for AuthMode {
    type Err = UnknownAuthMode;

    /// Accepts `nkey` and `jwt` as aliases for `keypair` and `certificate`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "token" => Ok(Self::Token),
            "keypair" | "nkey" => Ok(Self::KeyPair),
            "certificate" | "jwt" => Ok(Self::Certificate),
            other => Err(UnknownAuthMode(other.to_string())),
        }
    }
}

/// A string whose `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Redacted(String);

impl Redacted {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Redacted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Redacted(..)")
    }
}

/// Signs a server-issued nonce with the client's private key.
pub trait NonceSigner: Send + Sync {
    /// Hex-encoded public key matching the signing key.
    fn public_key(&self) -> &str;

    /// Signature over `nonce`.
    fn sign(&self, nonce: &[u8]) -> Vec<u8>;
}

/// Credentials a client presents when connecting to the substrate.
#[derive(Clone, Default)]
pub enum ClientCredentials {
    #[default]
    None,
    Token(Redacted),
    KeyPair(Arc<dyn NonceSigner>),
    /// Path to a credentials file holding the user certificate (JWT).
    Certificate { credentials_file: PathBuf },
}

impl ClientCredentials {
    #[must_use]
    pub fn mode(&self) -> AuthMode {
        match self {
            Self::None => AuthMode::None,
            Self::Token(_) => AuthMode::Token,
            Self::KeyPair(_) => AuthMode::KeyPair,
            Self::Certificate { .. } => AuthMode::Certificate,
        }
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Token(token) => f.debug_tuple("Token").field(token).finish(),
            Self::KeyPair(signer) => f
                .debug_struct("KeyPair")
                .field("public_key", &signer.public_key())
                .finish(),
            Self::Certificate { credentials_file } => f
                .debug_struct("Certificate")
                .field("credentials_file", credentials_file)
                .finish(),
        }
    }
}

/// Publish/subscribe subject patterns a user may use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectPermissions {
    pub publish: Vec<String>,
    pub subscribe: Vec<String>,
}

impl SubjectPermissions {
    /// Full access (`>` on both directions).
    #[must_use]
    pub fn allow_all() -> Self {
        Self {
            publish: vec![">".to_string()],
            subscribe: vec![">".to_string()],
        }
    }
}

/// A keypair user accepted by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPairUser {
    /// Hex-encoded ed25519 public key.
    pub public_key: String,
    pub permissions: SubjectPermissions,
}

/// Decoded operator certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorClaims {
    /// Operator public key (`sub`).
    pub subject: String,
    pub name: String,
    pub system_account: Option<String>,
}

/// Decoded account certificate, preloaded into the server's resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountClaims {
    /// Account public key (`sub`).
    pub subject: String,
    pub name: String,
    /// Issuing operator (`iss`).
    pub issuer: String,
    /// The raw certificate.
    pub jwt: String,
}

/// Server-side validation settings for the active mode.
#[derive(Debug, Clone, Default)]
pub enum ServerAuthPolicy {
    #[default]
    Open,
    Token(Redacted),
    KeyPair { users: Vec<KeyPairUser> },
    Certificate {
        operator: OperatorClaims,
        /// Account public key -> claims.
        accounts: BTreeMap<String, AccountClaims>,
        system_account: Option<String>,
    },
}

impl ServerAuthPolicy {
    #[must_use]
    pub fn mode(&self) -> AuthMode {
        match self {
            Self::Open => AuthMode::None,
            Self::Token(_) => AuthMode::Token,
            Self::KeyPair { .. } => AuthMode::KeyPair,
            Self::Certificate { .. } => AuthMode::Certificate,
        }
    }
}
