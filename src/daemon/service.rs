//! Daemon service - dispatches requests to the forwarding core.
//!
//! Holds the hot resources (store, relay client, forwarding service, message
//! pump) for the lifetime of the daemon process.
//!
//! CHANGELOG:
//! - 10/19/2026 - Relay methods replace the iMessage handlers
//! - 01/10/2026 - Initial implementation (Phase 4C)

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigStore, ConfigUpdate};
use crate::daemon::protocol::codes;
use crate::db::{KvStore, SqliteStore};
use crate::error::{CoreError, StorageError};
use crate::forwarding::{
    ForwardNotice, ForwardingService, HistoryLog, Inbox, Message, StatsTracker,
};
use crate::permission::BridgeGate;
use crate::relay::telegram::{TelegramRelay, DEFAULT_TIMEOUT_SECS, TELEGRAM_API_BASE};

/// Incoming messages buffered ahead of the pump.
const INBOX_CAPACITY: usize = 256;
/// Notices kept for `status`.
const RECENT_NOTICES: usize = 10;
/// How long `request_permission` waits for the bridge.
pub const DEFAULT_PERMISSION_TIMEOUT_SECS: u64 = 120;

/// Request failure, mapped onto a protocol error code.
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Message queue is closed")]
    QueueClosed,
}

impl DaemonError {
    pub fn code(&self) -> &'static str {
        match self {
            DaemonError::Core(e) => e.code(),
            DaemonError::Storage(_) => codes::STORAGE_ERROR,
            DaemonError::InvalidParams(_) => codes::INVALID_PARAMS,
            DaemonError::UnknownMethod(_) => codes::UNKNOWN_METHOD,
            DaemonError::NotFound(_) => codes::NOT_FOUND,
            DaemonError::QueueClosed => codes::INTERNAL,
        }
    }
}

/// Startup settings for [`DaemonService::open`].
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub db_path: PathBuf,
    pub api_base: String,
    pub relay_timeout: Duration,
    pub permission_timeout: Duration,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            db_path: crate::db::connection::default_db_path(),
            api_base: TELEGRAM_API_BASE.to_string(),
            relay_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            permission_timeout: Duration::from_secs(DEFAULT_PERMISSION_TIMEOUT_SECS),
        }
    }
}

type Params = HashMap<String, Value>;

/// Daemon service with hot resources.
pub struct DaemonService {
    forwarding: Arc<ForwardingService>,
    gate: Arc<BridgeGate>,
    inbox: Inbox,
    notices: Arc<Mutex<VecDeque<ForwardNotice>>>,
    tasks: Vec<JoinHandle<()>>,
    started_at: String,
}

impl DaemonService {
    /// Open the relay database and wire up the Telegram relay.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn open(options: &DaemonOptions) -> Result<Self> {
        let store: Arc<dyn KvStore> = Arc::new(
            SqliteStore::open(&options.db_path)
                .with_context(|| format!("Failed to open {}", options.db_path.display()))?,
        );
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let config = Arc::new(ConfigStore::load(store.clone()));
        let stats = Arc::new(StatsTracker::load(store.clone(), clock));
        let history = Arc::new(HistoryLog::new(store));
        let relay = Arc::new(
            TelegramRelay::with_api_base(options.api_base.as_str())
                .with_timeout(options.relay_timeout),
        );
        let gate = Arc::new(BridgeGate::new(options.permission_timeout));

        let forwarding = Arc::new(ForwardingService::new(
            config,
            stats,
            history,
            relay,
            gate.clone(),
        ));

        info!(db = %options.db_path.display(), "relay store opened");
        Ok(Self::from_parts(forwarding, gate))
    }

    /// Start the pump and background watchers around an existing service.
    pub fn from_parts(forwarding: Arc<ForwardingService>, gate: Arc<BridgeGate>) -> Self {
        let (inbox, pump) = forwarding.spawn_pump(INBOX_CAPACITY);
        let watcher = forwarding.spawn_config_watcher();
        let notices = Arc::new(Mutex::new(VecDeque::with_capacity(RECENT_NOTICES)));
        let logger = spawn_notice_logger(forwarding.subscribe_notices(), notices.clone());

        Self {
            forwarding,
            gate,
            inbox,
            notices,
            tasks: vec![pump, watcher, logger],
            started_at: Utc::now().to_rfc3339(),
        }
    }

    /// Dispatch request to appropriate handler.
    pub async fn dispatch(&self, method: &str, params: Params) -> Result<Value, DaemonError> {
        match method {
            "health" => Ok(self.health()),
            "status" => Ok(self.status()),
            "activate" => self.activate(),
            "deactivate" => Ok(self.deactivate()),
            "message" => self.message(params).await,
            "config" => Ok(self.config()),
            "update_config" => self.update_config(params),
            "stats" => Ok(self.stats()),
            "history" => self.history(params),
            "delete_record" => self.delete_record(params),
            "clear_all" => self.clear_all(),
            "permission" => self.permission(params),
            "request_permission" => self.request_permission().await,
            _ => Err(DaemonError::UnknownMethod(method.to_string())),
        }
    }

    /// Deactivate and stop background tasks.
    pub fn shutdown(&self) {
        self.forwarding.deactivate();
        for task in &self.tasks {
            task.abort();
        }
    }

    // ========================================================================
    // Health / Status
    // ========================================================================

    fn health(&self) -> Value {
        json!({
            "pid": std::process::id(),
            "started_at": self.started_at,
            "version": env!("CARGO_PKG_VERSION"),
            "protocol_v": crate::daemon::protocol::PROTOCOL_VERSION,
        })
    }

    fn status(&self) -> Value {
        let status = self.forwarding.status();
        let stats = self.forwarding.current_stats();
        let notices: Vec<ForwardNotice> = self
            .notices
            .lock()
            .map(|n| n.iter().cloned().collect())
            .unwrap_or_default();

        json!({
            "state": status.state,
            "capability": status.capability,
            "permission": self.gate.state(),
            "last_error": status.last_error,
            "pending_retries": status.pending_retries,
            "credentials_configured": status.credentials_configured,
            "total_forwarded": stats.total_forwarded,
            "today_forwarded": stats.today_forwarded,
            "last_forwarded": stats.last_forwarded_label(),
            "recent_notices": notices,
        })
    }

    // ========================================================================
    // State transitions
    // ========================================================================

    fn activate(&self) -> Result<Value, DaemonError> {
        self.forwarding.activate()?;
        Ok(json!({ "state": self.forwarding.service_state() }))
    }

    fn deactivate(&self) -> Value {
        self.forwarding.deactivate();
        json!({ "state": self.forwarding.service_state() })
    }

    /// Params: sender, body, received_at (RFC 3339, default now)
    async fn message(&self, params: Params) -> Result<Value, DaemonError> {
        let sender = required_str(&params, "sender")?;
        let body = required_str(&params, "body")?;
        let received_at = match params.get("received_at").and_then(Value::as_str) {
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map_err(|e| DaemonError::InvalidParams(format!("received_at: {}", e)))?
                .with_timezone(&Utc),
            None => Utc::now(),
        };

        self.inbox
            .push(Message::new(sender, body, received_at))
            .await
            .map_err(|_| DaemonError::QueueClosed)?;

        Ok(json!({
            "queued": true,
            "state": self.forwarding.service_state(),
        }))
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    fn config(&self) -> Value {
        json!(self.forwarding.config().redacted())
    }

    /// Params: any subset of the `Config` fields.
    fn update_config(&self, params: Params) -> Result<Value, DaemonError> {
        let update: ConfigUpdate = serde_json::from_value(Value::Object(params.into_iter().collect()))
            .map_err(|e| DaemonError::InvalidParams(e.to_string()))?;
        if update.is_empty() {
            return Err(DaemonError::InvalidParams("no config fields given".to_string()));
        }
        let committed = self.forwarding.update_config(&update)?;
        Ok(json!({
            "config": committed.redacted(),
            "state": self.forwarding.service_state(),
        }))
    }

    // ========================================================================
    // Stats / History
    // ========================================================================

    fn stats(&self) -> Value {
        let stats = self.forwarding.current_stats();
        json!({
            "total_forwarded": stats.total_forwarded,
            "today_forwarded": stats.today_forwarded,
            "last_forwarded": stats.last_forwarded_label(),
            "last_forwarded_at": stats.last_forwarded,
        })
    }

    /// Params: limit (optional)
    fn history(&self, params: Params) -> Result<Value, DaemonError> {
        let mut records = self.forwarding.history()?;
        if let Some(limit) = params.get("limit").and_then(Value::as_u64) {
            records.truncate(limit as usize);
        }
        Ok(json!({
            "count": records.len(),
            "records": records,
        }))
    }

    /// Params: id
    fn delete_record(&self, params: Params) -> Result<Value, DaemonError> {
        let id = required_str(&params, "id")?;
        if !self.forwarding.delete_record(&id)? {
            return Err(DaemonError::NotFound(format!("history record {}", id)));
        }
        Ok(json!({ "deleted": id }))
    }

    fn clear_all(&self) -> Result<Value, DaemonError> {
        self.forwarding.clear_all()?;
        Ok(json!({
            "cleared": true,
            "state": self.forwarding.service_state(),
        }))
    }

    // ========================================================================
    // Permission bridge
    // ========================================================================

    /// Params: granted (bool), supported (bool, default true)
    fn permission(&self, params: Params) -> Result<Value, DaemonError> {
        let supported = params.get("supported").and_then(Value::as_bool).unwrap_or(true);
        let granted = params.get("granted").and_then(Value::as_bool);

        if !supported {
            self.gate.mark_unsupported();
            self.forwarding.mark_platform_unsupported();
        } else {
            let granted = granted.ok_or_else(|| {
                DaemonError::InvalidParams("granted is required".to_string())
            })?;
            self.gate.report(granted);
            self.forwarding.revalidate();
        }

        Ok(json!({
            "permission": self.gate.state(),
            "capability": self.forwarding.capability(),
            "state": self.forwarding.service_state(),
        }))
    }

    async fn request_permission(&self) -> Result<Value, DaemonError> {
        let granted = self.forwarding.request_permission().await?;
        Ok(json!({ "granted": granted }))
    }
}

fn required_str(params: &Params, key: &str) -> Result<String, DaemonError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DaemonError::InvalidParams(format!("{} is required", key)))
}

fn spawn_notice_logger(
    mut rx: broadcast::Receiver<ForwardNotice>,
    recent: Arc<Mutex<VecDeque<ForwardNotice>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(notice) => {
                    info!(
                        id = %notice.record_id,
                        sender = %notice.sender,
                        attempts = notice.attempts,
                        "forwarded SMS"
                    );
                    if let Ok(mut recent) = recent.lock() {
                        if recent.len() == RECENT_NOTICES {
                            recent.pop_front();
                        }
                        recent.push_back(notice);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notice logger fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
