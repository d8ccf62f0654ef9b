//! Persistence: SQLite relay.db behind a scoped key-value interface.
//!
//! CHANGELOG:
//! - 10/19/2026 - Swapped Messages.db access for the relay store

pub mod connection;
pub mod queries;
pub mod store;

pub use store::{KvStore, MemoryStore, SqliteStore};
