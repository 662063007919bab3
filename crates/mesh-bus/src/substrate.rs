//! # Embedded Substrate
//!
//! An in-process key-value store + pub/sub pair guarded by a
//! [`ServerAuthPolicy`]. Every component reaches the substrate through a
//! [`Connection`] obtained from [`EmbeddedSubstrate::connect`].
//!
//! ## Connect Checks
//!
//! | Policy        | Accepted credentials                                      |
//! |---------------|-----------------------------------------------------------|
//! | `Open`        | anything                                                  |
//! | `Token`       | the same token                                            |
//! | `KeyPair`     | a listed public key that signs a fresh random nonce       |
//! | `Certificate` | a user certificate signed by a preloaded account          |

use crate::errors::BusError;
use crate::jwt;
use crate::memory::InMemoryKvStore;
use crate::ports::{KeyValueStore, MessageStream, PubSub};
use crate::pubsub::InMemoryPubSub;
use crate::subject;
use async_trait::async_trait;
use ed25519_dalek::{Signature, Verifier};
use mesh_types::{
    AccountClaims, ClientCredentials, KeyPairUser, NonceSigner, ServerAuthPolicy,
    SubjectPermissions,
};
use rand::RngCore;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

const NONCE_LEN: usize = 32;

struct Principal {
    name: String,
    permissions: Option<SubjectPermissions>,
}

/// Substrate hosted inside the current process.
pub struct EmbeddedSubstrate {
    policy: ServerAuthPolicy,
    kv: Arc<dyn KeyValueStore>,
    bus: Arc<dyn PubSub>,
}

impl EmbeddedSubstrate {
    /// Start with an in-memory key-value store.
    #[must_use]
    pub fn start(policy: ServerAuthPolicy) -> Self {
        Self::with_store(policy, Arc::new(InMemoryKvStore::new()))
    }

    /// Start on top of an existing key-value store.
    #[must_use]
    pub fn with_store(policy: ServerAuthPolicy, kv: Arc<dyn KeyValueStore>) -> Self {
        info!(mode = %policy.mode(), "Embedded substrate started");
        Self {
            policy,
            kv,
            bus: Arc::new(InMemoryPubSub::new()),
        }
    }

    #[must_use]
    pub fn policy(&self) -> &ServerAuthPolicy {
        &self.policy
    }

    /// Authenticate `credentials` against the policy and open a connection.
    pub async fn connect(&self, credentials: &ClientCredentials) -> Result<Connection, BusError> {
        let principal = match self.authenticate(credentials).await {
            Ok(principal) => principal,
            Err(e) => {
                warn!(mode = %self.policy.mode(), error = %e, "Connection rejected");
                return Err(e);
            }
        };
        info!(mode = %self.policy.mode(), principal = %principal.name, "Client connected");

        let bus = match principal.permissions {
            Some(permissions) => Arc::new(PermissionedBus {
                inner: self.bus.clone(),
                permissions,
            }) as Arc<dyn PubSub>,
            None => self.bus.clone(),
        };
        Ok(Connection {
            kv: self.kv.clone(),
            bus,
            principal: principal.name,
        })
    }

    async fn authenticate(&self, credentials: &ClientCredentials) -> Result<Principal, BusError> {
        match (&self.policy, credentials) {
            (ServerAuthPolicy::Open, _) => Ok(Principal {
                name: "anonymous".to_string(),
                permissions: None,
            }),
            (ServerAuthPolicy::Token(expected), ClientCredentials::Token(offered)) => {
                if constant_time_eq(expected.expose().as_bytes(), offered.expose().as_bytes()) {
                    Ok(Principal {
                        name: "token".to_string(),
                        permissions: None,
                    })
                } else {
                    Err(BusError::Unauthorized("token mismatch".to_string()))
                }
            }
            (ServerAuthPolicy::KeyPair { users }, ClientCredentials::KeyPair(signer)) => {
                verify_keypair(users, signer.as_ref())
            }
            (
                ServerAuthPolicy::Certificate { accounts, .. },
                ClientCredentials::Certificate { credentials_file },
            ) => verify_certificate(accounts, credentials_file).await,
            (policy, offered) => Err(BusError::Unauthorized(format!(
                "server requires {} credentials, client offered {}",
                policy.mode(),
                offered.mode()
            ))),
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn verify_keypair(users: &[KeyPairUser], signer: &dyn NonceSigner) -> Result<Principal, BusError> {
    let offered = signer.public_key();
    let user = users
        .iter()
        .find(|u| u.public_key.eq_ignore_ascii_case(offered))
        .ok_or_else(|| BusError::Unauthorized(format!("unknown public key {offered}")))?;

    let verifying_key = jwt::public_key(&user.public_key)?;

    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let signature = Signature::from_slice(&signer.sign(&nonce))
        .map_err(|_| BusError::Unauthorized("malformed nonce signature".to_string()))?;
    verifying_key
        .verify(&nonce, &signature)
        .map_err(|_| BusError::Unauthorized("nonce signature mismatch".to_string()))?;

    Ok(Principal {
        name: user.public_key.clone(),
        permissions: Some(user.permissions.clone()),
    })
}

async fn verify_certificate(
    accounts: &BTreeMap<String, AccountClaims>,
    credentials_file: &Path,
) -> Result<Principal, BusError> {
    let contents = tokio::fs::read_to_string(credentials_file)
        .await
        .map_err(|e| BusError::io(credentials_file, e))?;
    let token = jwt::user_certificate_from_creds(&contents)?;
    let claims = jwt::decode_claims(token)?;
    if claims.scope.kind.as_deref().is_some_and(|kind| kind != "user") {
        return Err(BusError::Unauthorized(format!(
            "{} is not a user certificate",
            claims.sub
        )));
    }

    let issuer = claims.issuing_account();
    let account = accounts.get(issuer).ok_or_else(|| {
        BusError::Unauthorized(format!(
            "user {} issued by unknown account {issuer}",
            claims.sub
        ))
    })?;
    // Only the issuing account's key can vouch for the claims read above.
    let claims = jwt::verify_signed(token, &account.subject)?;

    let user = if claims.name.is_empty() {
        &claims.sub
    } else {
        &claims.name
    };
    Ok(Principal {
        name: format!("{user}@{}", account.name),
        permissions: None,
    })
}

/// Pub/sub view restricted to a set of subject permissions.
struct PermissionedBus {
    inner: Arc<dyn PubSub>,
    permissions: SubjectPermissions,
}

fn allowed(allow: &[String], pattern: &str) -> bool {
    allow.iter().any(|a| subject::covers(a, pattern))
}

#[async_trait]
impl PubSub for PermissionedBus {
    async fn publish(&self, subject_name: &str, payload: Vec<u8>) -> Result<usize, BusError> {
        if !allowed(&self.permissions.publish, subject_name) {
            return Err(BusError::PermissionDenied {
                action: "publish",
                subject: subject_name.to_string(),
            });
        }
        self.inner.publish(subject_name, payload).await
    }

    async fn subscribe(&self, pattern: &str) -> Result<Box<dyn MessageStream>, BusError> {
        if !allowed(&self.permissions.subscribe, pattern) {
            return Err(BusError::PermissionDenied {
                action: "subscribe",
                subject: pattern.to_string(),
            });
        }
        self.inner.subscribe(pattern).await
    }
}

/// An authenticated handle on the substrate, shared by every component.
#[derive(Clone)]
pub struct Connection {
    kv: Arc<dyn KeyValueStore>,
    bus: Arc<dyn PubSub>,
    principal: String,
}

impl Connection {
    #[must_use]
    pub fn kv(&self) -> Arc<dyn KeyValueStore> {
        self.kv.clone()
    }

    #[must_use]
    pub fn bus(&self) -> Arc<dyn PubSub> {
        self.bus.clone()
    }

    /// Name the substrate authenticated this connection as.
    #[must_use]
    pub fn principal(&self) -> &str {
        &self.principal
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("principal", &self.principal)
            .finish_non_exhaustive()
    }
}
