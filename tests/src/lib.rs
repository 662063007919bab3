//! # Wellknown Mesh Test Suite
//!
//! Cross-crate scenarios. Unit tests live next to the code in each crate.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs          # shared configuration types and auth material
//! └── integration/
//!     ├── lifecycle.rs     # auth → connect → parse → register → close
//!     ├── discovery.rs     # several services watching each other
//!     ├── expiry.rs        # TTL liveness and expiry on a paused clock
//!     └── drift.rs         # schema evolution and the CI checks
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p mesh-tests
//! cargo test -p mesh-tests integration::drift::
//! ```

#![allow(dead_code)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

#[cfg(test)]
pub mod fixtures;
pub mod integration;
