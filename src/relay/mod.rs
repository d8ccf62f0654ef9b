//! Boundary to the chat endpoint that receives forwarded messages.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial module structure

pub mod telegram;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::RelayError;
use crate::forwarding::message::Message;

pub use telegram::TelegramRelay;

/// Credentials needed to reach the relay endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayCredentials {
    pub token: String,
    pub destination_id: String,
}

impl From<&Config> for RelayCredentials {
    fn from(config: &Config) -> Self {
        Self {
            token: config.relay_token.clone(),
            destination_id: config.relay_destination_id.clone(),
        }
    }
}

#[async_trait]
pub trait RelayClient: Send + Sync {
    async fn send(&self, credentials: &RelayCredentials, message: &Message) -> Result<(), RelayError>;
}

/// Text posted to the chat for one SMS.
pub fn format_relay_text(message: &Message) -> String {
    format!(
        "SMS from {}\n{}\n\n{}",
        message.sender,
        message
            .received_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M"),
        message.body
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_format_relay_text() {
        let message = Message::new("+15551234", "Package delivered", Utc::now());
        let text = format_relay_text(&message);
        assert!(text.starts_with("SMS from +15551234\n"));
        assert!(text.ends_with("\n\nPackage delivered"));
    }

    #[test]
    fn test_credentials_from_config() {
        let config = Config {
            relay_token: "tok".to_string(),
            relay_destination_id: "42".to_string(),
            ..Default::default()
        };
        let creds = RelayCredentials::from(&config);
        assert_eq!(creds.token, "tok");
        assert_eq!(creds.destination_id, "42");
    }
}
