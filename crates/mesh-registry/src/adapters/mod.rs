//! Adapters Layer (Driven Adapters)
//!
//! ## Adapters
//!
//! - `EchoResolver` - returns the reference location itself (tests, demos)
//! - `FileResolver` - reads mounted secret files, optionally a JSON member

pub mod resolvers;

pub use resolvers::{EchoResolver, FileResolver};
