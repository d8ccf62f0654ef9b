//! Telegram Bot API relay (`sendMessage`).
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{format_relay_text, RelayClient, RelayCredentials};
use crate::error::RelayError;
use crate::forwarding::message::Message;

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
/// Per-request timeout for Bot API calls (seconds)
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramRelay {
    client: Client,
    api_base: String,
    timeout: Duration,
}

impl TelegramRelay {
    pub fn new() -> Self {
        Self::with_api_base(TELEGRAM_API_BASE)
    }

    /// Point at a different Bot API server (self-hosted or test double).
    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn api_url(&self, token: &str, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, token, method)
    }
}

impl Default for TelegramRelay {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a Bot API HTTP status to a relay failure.
pub fn classify_status(status: StatusCode) -> RelayError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND => RelayError::Unauthorized,
        StatusCode::TOO_MANY_REQUESTS => RelayError::RateLimited,
        StatusCode::BAD_REQUEST | StatusCode::FORBIDDEN => RelayError::InvalidDestination,
        _ => RelayError::NetworkError,
    }
}

#[async_trait]
impl RelayClient for TelegramRelay {
    async fn send(&self, credentials: &RelayCredentials, message: &Message) -> Result<(), RelayError> {
        let url = self.api_url(&credentials.token, "sendMessage");
        let params = serde_json::json!({
            "chat_id": credentials.destination_id,
            "text": format_relay_text(message),
            "disable_web_page_preview": true,
        });

        let response = self
            .client
            .post(&url)
            .json(&params)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "telegram request failed");
                RelayError::NetworkError
            })?;

        let status = response.status();
        if status.is_success() {
            let body: TelegramResponse = response.json().await.map_err(|e| {
                warn!(error = %e, "unreadable telegram response");
                RelayError::NetworkError
            })?;
            if body.ok {
                debug!(chat_id = %credentials.destination_id, "telegram accepted message");
                return Ok(());
            }
            warn!(description = ?body.description, "telegram returned ok=false");
            return Err(RelayError::InvalidDestination);
        }

        let description = response
            .json::<TelegramResponse>()
            .await
            .ok()
            .and_then(|b| b.description);
        let err = classify_status(status);
        warn!(%status, ?description, ?err, "telegram rejected message");
        Err(err)
    }
}
