//! # Auth Lifecycle Configurator
//!
//! Selects the single auth mode of the process and builds both halves of it
//! from local persisted state: the server validation policy and the client
//! connection credentials.
//!
//! ## Material Layout
//!
//! ```text
//! <auth_dir>/mode               none | token | keypair | certificate (beats MESH_AUTH)
//! <auth_dir>/token              shared token (MESH_TOKEN wins)
//! <auth_dir>/user.pub           hex ed25519 public key
//! <auth_dir>/user.nk            hex ed25519 seed
//! <auth_dir>/creds/user.creds   user certificate (dir overridable by MESH_CREDS_DIR)
//!
//! <operator_store>/<operator>/<operator>.jwt                self-signed by the operator
//! <operator_store>/<operator>/accounts/<name>/<name>.jwt    signed by the operator
//! ```
//!
//! Missing or malformed material for a non-`none` mode is an error. The mode
//! never falls back to `none`.

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use mesh_bus::jwt;
use mesh_registry::ConfigSource;
use mesh_types::{
    AccountClaims, AuthMode, ClientCredentials, KeyPairUser, NonceSigner, OperatorClaims,
    Redacted, ServerAuthPolicy, SubjectPermissions, UnknownAuthMode,
};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const MODE_ENV: &str = "MESH_AUTH";
pub const TOKEN_ENV: &str = "MESH_TOKEN";
pub const CREDS_DIR_ENV: &str = "MESH_CREDS_DIR";
pub const OPERATOR_STORE_ENV: &str = "MESH_OPERATOR_STORE";
pub const OPERATOR_ENV: &str = "MESH_OPERATOR";

pub const DEFAULT_OPERATOR: &str = "wellknown";

const MODE_FILE: &str = "mode";
const TOKEN_FILE: &str = "token";
const PUBLIC_KEY_FILE: &str = "user.pub";
const SEED_FILE: &str = "user.nk";
const CREDS_DIR: &str = "creds";
const CREDS_FILE: &str = "user.creds";

/// Auth material errors. All are fatal at startup.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    UnknownMode(#[from] UnknownAuthMode),

    #[error("{mode} auth requires {what} at {path}")]
    Missing {
        mode: AuthMode,
        what: &'static str,
        path: PathBuf,
    },

    #[error("token auth requires MESH_TOKEN or a non-empty {path}")]
    MissingToken { path: PathBuf },

    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {what} in {path}: {reason}")]
    Malformed {
        what: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("certificate auth requires MESH_OPERATOR_STORE (no home directory to derive it from)")]
    NoOperatorStore,
}

// =============================================================================
// NONCE SIGNER
// =============================================================================

/// ed25519 signer for the keypair challenge.
pub struct Ed25519Signer {
    key: SigningKey,
    public_key: String,
}

impl Ed25519Signer {
    #[must_use]
    pub fn new(key: SigningKey) -> Self {
        let public_key = hex::encode(key.verifying_key().as_bytes());
        Self { key, public_key }
    }

    /// Parse a hex-encoded 32-byte seed.
    pub fn from_seed_hex(seed: &str) -> Result<Self, String> {
        let bytes: [u8; 32] = hex::decode(seed.trim())
            .map_err(|e| format!("not hex: {e}"))?
            .try_into()
            .map_err(|_| "seed must be 32 bytes".to_string())?;
        Ok(Self::new(SigningKey::from_bytes(&bytes)))
    }
}

impl NonceSigner for Ed25519Signer {
    fn public_key(&self) -> &str {
        &self.public_key
    }

    fn sign(&self, nonce: &[u8]) -> Vec<u8> {
        self.key.sign(nonce).to_bytes().to_vec()
    }
}

impl fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// CONFIGURATOR
// =============================================================================

/// The process's auth mode and where its material lives.
#[derive(Debug, Clone)]
pub struct AuthConfigurator {
    mode: AuthMode,
    auth_dir: PathBuf,
    env_token: Option<Redacted>,
    creds_dir: PathBuf,
    operator_store: Option<PathBuf>,
    operator: String,
}

impl AuthConfigurator {
    /// Determine the mode: `<auth_dir>/mode`, else `MESH_AUTH`, else `none`.
    pub fn from_source(auth_dir: impl Into<PathBuf>, source: &ConfigSource) -> Result<Self, AuthError> {
        let auth_dir = auth_dir.into();
        let mode_path = auth_dir.join(MODE_FILE);
        let mode = match read_optional(&mode_path)? {
            Some(persisted) if !persisted.trim().is_empty() => {
                debug!(path = %mode_path.display(), "Auth mode from local state");
                persisted.parse()?
            }
            _ => match non_empty(source, MODE_ENV) {
                Some(mode) => mode.parse()?,
                None => AuthMode::None,
            },
        };

        let creds_dir = non_empty(source, CREDS_DIR_ENV)
            .map_or_else(|| auth_dir.join(CREDS_DIR), PathBuf::from);
        let operator_store = non_empty(source, OPERATOR_STORE_ENV)
            .map(PathBuf::from)
            .or_else(|| {
                non_empty(source, "HOME")
                    .map(|home| Path::new(home).join(".local/share/mesh/operators"))
            });

        info!(mode = %mode, auth_dir = %auth_dir.display(), "Auth mode selected");
        Ok(Self {
            mode,
            env_token: non_empty(source, TOKEN_ENV).map(Redacted::new),
            creds_dir,
            operator_store,
            operator: non_empty(source, OPERATOR_ENV)
                .unwrap_or(DEFAULT_OPERATOR)
                .to_string(),
            auth_dir,
        })
    }

    #[must_use]
    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    #[must_use]
    pub fn auth_dir(&self) -> &Path {
        &self.auth_dir
    }

    /// Server-side validation settings for the active mode.
    pub fn server_policy(&self) -> Result<ServerAuthPolicy, AuthError> {
        let policy = match self.mode {
            AuthMode::None => ServerAuthPolicy::Open,
            AuthMode::Token => ServerAuthPolicy::Token(self.token()?),
            AuthMode::KeyPair => {
                let public_key = self.public_key()?;
                self.require(SEED_FILE, "a private key seed")?;
                ServerAuthPolicy::KeyPair {
                    users: vec![KeyPairUser {
                        public_key,
                        permissions: SubjectPermissions::allow_all(),
                    }],
                }
            }
            AuthMode::Certificate => self.certificate_policy()?,
        };
        debug!(mode = %self.mode, "Server auth policy built");
        Ok(policy)
    }

    /// Connection credentials for the active mode.
    pub fn client_credentials(&self) -> Result<ClientCredentials, AuthError> {
        let credentials = match self.mode {
            AuthMode::None => ClientCredentials::None,
            AuthMode::Token => ClientCredentials::Token(self.token()?),
            AuthMode::KeyPair => {
                let seed_path = self.require(SEED_FILE, "a private key seed")?;
                let seed = read(&seed_path)?;
                let signer =
                    Ed25519Signer::from_seed_hex(&seed).map_err(|reason| AuthError::Malformed {
                        what: "seed",
                        path: seed_path.clone(),
                        reason,
                    })?;
                let public_key = self.public_key()?;
                if !signer.public_key().eq_ignore_ascii_case(&public_key) {
                    return Err(AuthError::Malformed {
                        what: "seed",
                        path: seed_path,
                        reason: format!("does not match {PUBLIC_KEY_FILE}"),
                    });
                }
                ClientCredentials::KeyPair(Arc::new(signer))
            }
            AuthMode::Certificate => {
                let credentials_file = self.creds_dir.join(CREDS_FILE);
                if !credentials_file.is_file() {
                    return Err(AuthError::Missing {
                        mode: self.mode,
                        what: "a user credentials file",
                        path: credentials_file,
                    });
                }
                ClientCredentials::Certificate { credentials_file }
            }
        };
        Ok(credentials)
    }

    fn require(&self, file: &str, what: &'static str) -> Result<PathBuf, AuthError> {
        let path = self.auth_dir.join(file);
        if path.is_file() {
            Ok(path)
        } else {
            Err(AuthError::Missing {
                mode: self.mode,
                what,
                path,
            })
        }
    }

    fn token(&self) -> Result<Redacted, AuthError> {
        if let Some(token) = &self.env_token {
            return Ok(token.clone());
        }
        let path = self.auth_dir.join(TOKEN_FILE);
        match read_optional(&path)? {
            Some(token) if !token.trim().is_empty() => Ok(Redacted::new(token.trim())),
            _ => Err(AuthError::MissingToken { path }),
        }
    }

    fn public_key(&self) -> Result<String, AuthError> {
        let path = self.require(PUBLIC_KEY_FILE, "a public key")?;
        let contents = read(&path)?;
        let public_key = contents.trim().to_ascii_lowercase();
        let malformed = |reason: String| AuthError::Malformed {
            what: "public key",
            path: path.clone(),
            reason,
        };
        let bytes: [u8; 32] = hex::decode(&public_key)
            .map_err(|e| malformed(format!("not hex: {e}")))?
            .try_into()
            .map_err(|_| malformed("must be 32 bytes".to_string()))?;
        VerifyingKey::from_bytes(&bytes).map_err(|e| malformed(e.to_string()))?;
        Ok(public_key)
    }

    fn certificate_policy(&self) -> Result<ServerAuthPolicy, AuthError> {
        let store = self
            .operator_store
            .as_ref()
            .ok_or(AuthError::NoOperatorStore)?
            .join(&self.operator);
        let operator_path = store.join(format!("{}.jwt", self.operator));
        if !operator_path.is_file() {
            return Err(AuthError::Missing {
                mode: self.mode,
                what: "an operator certificate",
                path: operator_path,
            });
        }
        let (_, claims) = verify(&operator_path, "operator certificate", None)?;
        let operator = OperatorClaims {
            subject: claims.sub,
            name: if claims.name.is_empty() {
                self.operator.clone()
            } else {
                claims.name
            },
            system_account: claims.scope.system_account,
        };

        let accounts = load_accounts(&store.join("accounts"), &operator.subject)?;
        info!(
            operator = %operator.name,
            accounts = accounts.len(),
            "Operator store loaded"
        );
        Ok(ServerAuthPolicy::Certificate {
            system_account: operator.system_account.clone(),
            operator,
            accounts,
        })
    }
}

/// Every `<dir>/<name>/<name>.jwt` signed by `operator`, keyed by account
/// public key.
fn load_accounts(
    dir: &Path,
    operator: &str,
) -> Result<BTreeMap<String, AccountClaims>, AuthError> {
    let mut accounts = BTreeMap::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(accounts),
        Err(source) => {
            return Err(AuthError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    for entry in entries {
        let entry = entry.map_err(|source| AuthError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path().join(format!("{name}.jwt"));
        if !path.is_file() {
            warn!(account = %name, path = %path.display(), "Account has no certificate, skipping");
            continue;
        }
        let (raw, claims) = verify(&path, "account certificate", Some(operator))?;
        debug!(account = %claims.sub, "Account certificate verified");
        accounts.insert(
            claims.sub.clone(),
            AccountClaims {
                subject: claims.sub,
                name: if claims.name.is_empty() { name } else { claims.name },
                issuer: claims.iss,
                jwt: raw,
            },
        );
    }
    Ok(accounts)
}

/// Read a certificate and check it was issued and signed by `issuer`, or by
/// its own subject when `issuer` is `None`.
fn verify(
    path: &Path,
    what: &'static str,
    issuer: Option<&str>,
) -> Result<(String, jwt::CertificateClaims), AuthError> {
    let malformed = |reason: String| AuthError::Malformed {
        what,
        path: path.to_path_buf(),
        reason,
    };
    let raw = read(path)?.trim().to_string();
    let claims = jwt::decode_claims(&raw).map_err(|e| malformed(e.to_string()))?;
    let expected = issuer.unwrap_or(&claims.sub).to_string();
    if claims.iss != expected {
        return Err(malformed(format!(
            "issued by {:?}, expected {expected}",
            claims.iss
        )));
    }
    let claims = jwt::verify_signed(&raw, &expected).map_err(|e| malformed(e.to_string()))?;
    Ok((raw, claims))
}

fn read(path: &Path) -> Result<String, AuthError> {
    std::fs::read_to_string(path).map_err(|source| AuthError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_optional(path: &Path) -> Result<Option<String>, AuthError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(AuthError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn non_empty<'a>(source: &'a ConfigSource, key: &str) -> Option<&'a str> {
    source.get(key).map(str::trim).filter(|v| !v.is_empty())
}
