//! Incoming messages and the durable record kept for each forwarded one.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// One SMS as delivered by the platform bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

impl Message {
    pub fn new(sender: impl Into<String>, body: impl Into<String>, received_at: DateTime<Utc>) -> Self {
        Self {
            sender: sender.into(),
            body: body.into(),
            received_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Forwarded,
    Failed,
}

/// History entry for a message the filter accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardRecord {
    pub id: String,
    pub sender: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
    pub outcome: Outcome,
    /// Delivery attempts made so far, including the first.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<RelayError>,
}

impl ForwardRecord {
    /// Record the first delivery attempt for `message`.
    pub fn first_attempt(message: &Message, result: Result<(), RelayError>) -> Self {
        let (outcome, last_error) = match result {
            Ok(()) => (Outcome::Forwarded, None),
            Err(e) => (Outcome::Failed, Some(e)),
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender: message.sender.clone(),
            body: message.body.clone(),
            received_at: message.received_at,
            outcome,
            attempts: 1,
            last_error,
        }
    }

    pub fn message(&self) -> Message {
        Message::new(self.sender.clone(), self.body.clone(), self.received_at)
    }

    pub fn is_forwarded(&self) -> bool {
        self.outcome == Outcome::Forwarded
    }
}
