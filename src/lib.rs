//! wolfies-sms-relay library
//!
//! Core of the SMS to Telegram relay: configuration, filtering, forwarding
//! with retry, stats and history. Used by the daemon and CLI binaries.
//!
//! CHANGELOG:
//! - 10/19/2026 - Relay core replaces the iMessage modules

pub mod client;
pub mod clock;
pub mod config;
pub mod daemon;
pub mod db;
pub mod error;
pub mod filter;
pub mod forwarding;
pub mod output;
pub mod permission;
pub mod relay;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
