//! Relay configuration model and its durable store.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial module structure

pub mod model;
pub mod store;

pub use model::{parse_list, Config, ConfigUpdate, FilterMode};
pub use store::ConfigStore;
