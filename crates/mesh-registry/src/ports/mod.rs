//! Ports Layer
//!
//! - Driving Ports (inbound): read-only registry queries
//! - Driven Ports (outbound): secret backends

pub mod inbound;
pub mod outbound;

pub use inbound::RegistryQuery;
pub use outbound::SecretResolver;
