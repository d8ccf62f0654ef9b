//! Message forwarding: records, stats, retry policy and the service that ties them together.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial module structure

pub mod history;
pub mod message;
pub mod retry;
pub mod service;
pub mod stats;

pub use history::HistoryLog;
pub use message::{ForwardRecord, Message, Outcome};
pub use retry::RetryPolicy;
pub use service::{
    Capability, Dispatch, ForwardNotice, ForwardingService, Inbox, ServiceState, ServiceStatus,
};
pub use stats::{Stats, StatsTracker};
