//! Outbound Ports (Driven Ports)
//!
//! Secret backends consulted by the preprocessor. One resolver per scheme.

use async_trait::async_trait;

use crate::domain::{SecretError, SecretReference};

/// Secret backend (Driven Port)
///
/// Implementations must not log resolved values.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    /// Scheme handled, e.g. `file` for `ref+file://...`.
    fn scheme(&self) -> &str;

    /// Fetch the plaintext value.
    async fn resolve(&self, reference: &SecretReference) -> Result<String, SecretError>;
}
