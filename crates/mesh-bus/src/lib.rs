//! # Mesh Bus - Substrate Boundary
//!
//! The key-value store and publish/subscribe primitives every registry
//! component talks to, plus an embedded in-process substrate that enforces
//! the configured auth posture on connect.
//!
//! ```text
//! ┌──────────────┐   put/get/delete/keys   ┌──────────────────┐
//! │  Registrar   │ ──────────────────────▶ │  KeyValueStore   │
//! └──────────────┘                         │  (TTL per key)   │
//! ┌──────────────┐       watch(pattern)    │                  │
//! │  Discovery   │ ◀────────────────────── │                  │
//! └──────────────┘                         └──────────────────┘
//! ┌──────────────┐   publish/subscribe     ┌──────────────────┐
//! │  Rotation    │ ◀─────────────────────▶ │      PubSub      │
//! └──────────────┘                         └──────────────────┘
//! ```
//!
//! ## Subjects
//!
//! Keys and subjects are dot-delimited tokens. Patterns accept `*` (exactly
//! one token) and a trailing `>` (one or more tokens).

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod errors;
pub mod file_store;
pub mod jwt;
pub mod memory;
pub mod ports;
pub mod pubsub;
pub mod subject;
pub mod substrate;

pub use errors::BusError;
pub use file_store::FileKvStore;
pub use memory::InMemoryKvStore;
pub use ports::{KeyValueStore, KeyWatch, KvEntry, KvOperation, Message, MessageStream, PubSub};
pub use pubsub::InMemoryPubSub;
pub use substrate::{Connection, EmbeddedSubstrate};

/// Events buffered per watcher/subscriber before it starts lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
