//! Cross-crate integration scenarios.

pub mod discovery;
pub mod drift;
pub mod expiry;
pub mod lifecycle;
