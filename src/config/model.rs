//! User configuration: relay credentials, filter rules, notification flag.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Whether matching rules suppress (blacklist) or are required (whitelist).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    #[default]
    Blacklist,
    Whitelist,
}

impl std::str::FromStr for FilterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "blacklist" | "block" => Ok(FilterMode::Blacklist),
            "whitelist" | "allow" => Ok(FilterMode::Whitelist),
            other => Err(format!("Unknown filter mode '{}'", other)),
        }
    }
}

/// Persisted configuration. Missing fields deserialize to defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub relay_token: String,
    pub relay_destination_id: String,
    pub filter_numbers: BTreeSet<String>,
    pub filter_keywords: BTreeSet<String>,
    pub mode: FilterMode,
    pub notify_on_forward: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay_token: String::new(),
            relay_destination_id: String::new(),
            filter_numbers: BTreeSet::new(),
            filter_keywords: BTreeSet::new(),
            mode: FilterMode::Blacklist,
            notify_on_forward: true,
        }
    }
}

impl Config {
    /// Both relay credentials are present.
    pub fn has_credentials(&self) -> bool {
        !self.relay_token.trim().is_empty() && !self.relay_destination_id.trim().is_empty()
    }

    /// Copy with the token masked, for display.
    pub fn redacted(&self) -> Self {
        let mut shown = self.clone();
        if !shown.relay_token.is_empty() {
            let tail: String = shown
                .relay_token
                .chars()
                .rev()
                .take(4)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            shown.relay_token = format!("****{}", tail);
        }
        shown
    }
}

/// Partial update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigUpdate {
    pub relay_token: Option<String>,
    pub relay_destination_id: Option<String>,
    pub filter_numbers: Option<BTreeSet<String>>,
    pub filter_keywords: Option<BTreeSet<String>>,
    pub mode: Option<FilterMode>,
    pub notify_on_forward: Option<bool>,
}

impl ConfigUpdate {
    pub fn is_empty(&self) -> bool {
        *self == ConfigUpdate::default()
    }

    /// Apply onto a copy of `base`.
    pub fn apply_to(&self, base: &Config) -> Config {
        let mut next = base.clone();
        if let Some(token) = &self.relay_token {
            next.relay_token = token.trim().to_string();
        }
        if let Some(dest) = &self.relay_destination_id {
            next.relay_destination_id = dest.trim().to_string();
        }
        if let Some(numbers) = &self.filter_numbers {
            next.filter_numbers = clean_set(numbers.iter().map(String::as_str));
        }
        if let Some(keywords) = &self.filter_keywords {
            next.filter_keywords = clean_set(keywords.iter().map(String::as_str));
        }
        if let Some(mode) = self.mode {
            next.mode = mode;
        }
        if let Some(notify) = self.notify_on_forward {
            next.notify_on_forward = notify;
        }
        next
    }
}

/// Parse comma/newline separated filter text into a set.
///
/// Entries are trimmed; empty entries are dropped.
pub fn parse_list(text: &str) -> BTreeSet<String> {
    clean_set(text.split([',', '\n', ';']))
}

fn clean_set<'a>(items: impl Iterator<Item = &'a str>) -> BTreeSet<String> {
    items
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
