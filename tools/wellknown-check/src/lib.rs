//! # wellknown-check
//!
//! CI checks over service configuration schemas.
//!
//! ```text
//! wellknown-check --schema-dump --repo org/api          # print the live schema
//! wellknown-check --self --schema cur.json --pr-schema pr.json
//! wellknown-check --check-deps --repo org/api           # dependencies live?
//! wellknown-check --check-consumers --repo org/api      # who depends on me?
//! ```
//!
//! Every requested action runs; the exit code is non-zero if any failed.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod checks;
pub mod cli;

pub use checks::{load_fields, load_registration, CheckError, Checker};
pub use cli::{parse_duration, Args};
