//! Forward/suppress decision for one incoming message.
//!
//! Pure: depends only on the message text and the config, never on the clock.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use serde::{Deserialize, Serialize};

use crate::config::{Config, FilterMode};
use crate::forwarding::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Forward,
    Suppress,
}

/// Decide whether `message` should be relayed under `config`.
pub fn evaluate(message: &Message, config: &Config) -> Verdict {
    let any_match = number_match(&message.sender, config) || keyword_match(&message.body, config);

    let forward = match config.mode {
        FilterMode::Whitelist => any_match,
        FilterMode::Blacklist => !any_match,
    };

    if forward {
        Verdict::Forward
    } else {
        Verdict::Suppress
    }
}

/// Strip everything but ASCII digits.
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn number_match(sender: &str, config: &Config) -> bool {
    let sender = normalize_phone(sender);
    if sender.is_empty() {
        return false;
    }
    config
        .filter_numbers
        .iter()
        .map(|n| normalize_phone(n))
        .any(|n| n == sender)
}

fn keyword_match(body: &str, config: &Config) -> bool {
    let body = body.to_lowercase();
    config
        .filter_keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .any(|k| body.contains(&k))
}
