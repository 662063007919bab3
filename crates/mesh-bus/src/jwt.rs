//! # Certificate Claims
//!
//! Signing and verification of operator, account and user certificates in
//! the `header.claims.signature` JWT layout (base64url segments), plus
//! extraction of the user certificate from a credentials file.
//!
//! Subjects and issuers are hex-encoded Ed25519 public keys. The signature
//! covers the ASCII bytes of `header.claims` and must come from the issuer:
//!
//! ```text
//! operator ──signs──▶ operator (self-signed)
//! operator ──signs──▶ account
//! account  ──signs──▶ user
//! ```
//!
//! ## Credentials File
//!
//! ```text
//! -----BEGIN USER JWT-----
//! eyJ0eXAiOiJKV1QiLCJhbGciOiJlZDI1NTE5In0.eyJzdWIiOi...
//! ------END USER JWT------
//! ```

use crate::errors::BusError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

const HEADER: &str = r#"{"typ":"JWT","alg":"ed25519"}"#;

/// Claims common to operator, account and user certificates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateClaims {
    /// Subject public key.
    pub sub: String,
    /// Issuer public key.
    #[serde(default)]
    pub iss: String,
    #[serde(default)]
    pub name: String,
    /// Substrate-specific section, named as the certificate tooling writes it.
    #[serde(rename = "nats", default)]
    pub scope: ScopeClaims,
}

/// Substrate-specific claims.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeClaims {
    /// `operator`, `account` or `user`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Operator certificates: the system account public key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_account: Option<String>,
    /// User certificates signed by an account signing key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_account: Option<String>,
}

impl CertificateClaims {
    /// Account that issued a user certificate.
    #[must_use]
    pub fn issuing_account(&self) -> &str {
        self.scope.issuer_account.as_deref().unwrap_or(&self.iss)
    }
}

/// Decode the claims segment of a certificate without checking its
/// signature. Use [`verify_signed`] before trusting the result.
pub fn decode_claims(token: &str) -> Result<CertificateClaims, BusError> {
    let [_, claims, _] = split(token)?;
    let raw = URL_SAFE_NO_PAD
        .decode(claims.trim_end_matches('='))
        .map_err(|e| BusError::Credential(format!("claims are not base64url: {e}")))?;
    serde_json::from_slice(&raw)
        .map_err(|e| BusError::Credential(format!("claims are not valid JSON: {e}")))
}

/// Check that `token` was signed by `issuer_public_key` and decode its claims.
///
/// A missing, malformed or foreign signature is `Unauthorized`.
pub fn verify_signed(token: &str, issuer_public_key: &str) -> Result<CertificateClaims, BusError> {
    let [header, claims, signature] = split(token)?;
    let key = public_key(issuer_public_key)?;
    if signature.is_empty() {
        return Err(BusError::Unauthorized("certificate is not signed".to_string()));
    }
    let signature = URL_SAFE_NO_PAD
        .decode(signature.trim_end_matches('='))
        .ok()
        .and_then(|bytes| Signature::from_slice(&bytes).ok())
        .ok_or_else(|| BusError::Unauthorized("malformed certificate signature".to_string()))?;
    key.verify(format!("{header}.{claims}").as_bytes(), &signature)
        .map_err(|_| {
            BusError::Unauthorized(format!(
                "certificate signature does not match issuer {issuer_public_key}"
            ))
        })?;
    decode_claims(token)
}

/// Encode and sign claims with the issuer's key.
pub fn encode_signed(claims: &CertificateClaims, issuer: &SigningKey) -> Result<String, BusError> {
    let body = serde_json::to_vec(claims).map_err(|e| BusError::Credential(e.to_string()))?;
    let signed = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(HEADER),
        URL_SAFE_NO_PAD.encode(body)
    );
    let signature = issuer.sign(signed.as_bytes());
    Ok(format!(
        "{signed}.{}",
        URL_SAFE_NO_PAD.encode(signature.to_bytes())
    ))
}

/// Parse a hex-encoded Ed25519 public key.
pub fn public_key(hex_key: &str) -> Result<VerifyingKey, BusError> {
    let bytes: [u8; 32] = hex::decode(hex_key.trim())
        .map_err(|e| BusError::Credential(format!("public key is not hex: {e}")))?
        .try_into()
        .map_err(|_| BusError::Credential("public key must be 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| BusError::Credential(format!("invalid public key: {e}")))
}

fn split(token: &str) -> Result<[&str; 3], BusError> {
    let segments: Vec<&str> = token.trim().split('.').collect();
    <[&str; 3]>::try_from(segments.as_slice()).map_err(|_| {
        BusError::Credential(format!(
            "expected 3 certificate segments, found {}",
            segments.len()
        ))
    })
}

/// The user certificate inside a credentials file.
pub fn user_certificate_from_creds(contents: &str) -> Result<&str, BusError> {
    let mut lines = contents.lines().map(str::trim);
    lines
        .by_ref()
        .find(|line| line.starts_with("-----BEGIN") && line.contains("JWT"))
        .ok_or_else(|| BusError::Credential("credentials file has no user JWT block".into()))?;
    lines
        .find(|line| !line.is_empty())
        .filter(|line| !line.starts_with('-'))
        .ok_or_else(|| BusError::Credential("user JWT block is empty".into()))
}

/// Render a credentials file around a user certificate.
#[must_use]
pub fn format_creds(user_certificate: &str) -> String {
    format!("-----BEGIN USER JWT-----\n{user_certificate}\n------END USER JWT------\n")
}
