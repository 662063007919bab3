//! # Mesh Types Crate
//!
//! Domain records shared by the registry core, the substrate adapters and the
//! node runtime.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: the registry wire format is the serde shape of
//!   [`ServiceRegistration`]; every crate reads and writes through it.
//! - **Immutable Identity**: [`ServiceIdentity`] and [`InstanceInfo`] are built
//!   once per process and never mutated afterwards.
//! - **Key Safety**: identity segments are validated so that a
//!   [`RegistryKey`] always has exactly three dot-separated segments.

pub mod auth;
pub mod errors;
pub mod identity;
pub mod registration;

pub use auth::{
    AccountClaims, AuthMode, ClientCredentials, KeyPairUser, NonceSigner, OperatorClaims,
    Redacted, ServerAuthPolicy, SubjectPermissions, UnknownAuthMode,
};
pub use errors::{IdentityError, WireError};
pub use identity::{ServiceIdentity, VersionInfo};
pub use registration::{
    FieldDescriptor, InstanceInfo, RegistryKey, ServiceRegistration, SourceInfo,
};

/// Capture the build-time identity of the calling crate.
///
/// Reads `MESH_GIT_ORG`, `MESH_GIT_REPO`, `MESH_GIT_COMMIT`, `MESH_GIT_TAG`
/// and `MESH_GIT_BRANCH` from the compile environment of the crate that
/// expands the macro. Missing org/repo fall back to `unknown` and the
/// package name.
#[macro_export]
macro_rules! build_info {
    () => {
        $crate::SourceInfo::from_build(
            option_env!("MESH_GIT_ORG"),
            option_env!("MESH_GIT_REPO"),
            env!("CARGO_PKG_NAME"),
            $crate::VersionInfo {
                commit: option_env!("MESH_GIT_COMMIT").map(str::to_string),
                tag: option_env!("MESH_GIT_TAG").map(str::to_string),
                branch: option_env!("MESH_GIT_BRANCH").map(str::to_string),
            },
        )
    };
}
