//! Daemon mode: persistent relay process reachable over a UNIX socket.
//!
//! CHANGELOG:
//! - 10/19/2026 - Hosts the forwarding service
//! - 01/10/2026 - Initial module structure (Phase 4C)

pub mod protocol;
pub mod server;
pub mod service;

pub use server::DaemonServer;
pub use service::{DaemonError, DaemonOptions, DaemonService};
