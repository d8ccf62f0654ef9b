//! Forwarding service: activity state, filter dispatch, relay delivery, retry.
//!
//! Each failed delivery gets its own retry task. Retry tasks belong to the
//! activation scope they were spawned in; deactivating cancels that scope, so
//! a cancelled record stays FAILED and is never picked up again. Messages
//! waiting in the pump are stamped with the same scope when they are queued.
//!
//! Outcomes are committed under the clear generation: a send that was in
//! flight when `clear_all` ran writes nothing, and a retry whose record was
//! deleted stops without recreating it.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::history::HistoryLog;
use super::message::{ForwardRecord, Message, Outcome};
use super::retry::RetryPolicy;
use super::stats::{Stats, StatsTracker};
use crate::config::{Config, ConfigStore, ConfigUpdate};
use crate::error::{CoreError, ErrorKind, RelayError, StorageError};
use crate::filter::{self, Verdict};
use crate::permission::PermissionGate;
use crate::relay::{RelayClient, RelayCredentials};

/// Upper bound on a single relay call.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);
const NOTICE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Inactive,
    Active,
}

/// Whether the service could observe messages at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Granted,
    Missing,
    Unsupported,
}

/// What happened to one incoming message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "record", rename_all = "snake_case")]
pub enum Dispatch {
    /// Service inactive; message dropped.
    Inactive,
    /// Filter said no; nothing recorded.
    Suppressed,
    Delivered(ForwardRecord),
    /// First send failed; a retry task owns the record now.
    RetryScheduled(ForwardRecord),
    /// Failed with no retry budget left.
    Failed(ForwardRecord),
    /// Relay data was cleared while the send was in flight; nothing recorded.
    Discarded,
}

/// Published after each successful delivery when notifications are on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardNotice {
    pub record_id: String,
    pub sender: String,
    pub received_at: DateTime<Utc>,
    pub forwarded_at: DateTime<Utc>,
    pub attempts: u32,
}

/// Read-only view for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub state: ServiceState,
    pub capability: Capability,
    pub last_error: Option<ErrorKind>,
    pub pending_retries: usize,
    pub credentials_configured: bool,
}

struct Inner {
    state: ServiceState,
    last_error: Option<ErrorKind>,
    unsupported: bool,
    /// Live while ACTIVE, cancelled otherwise.
    scope: CancellationToken,
}

/// A message waiting in the pump, tied to the activation it arrived in.
struct Queued {
    message: Message,
    scope: CancellationToken,
}

/// Sending half of the message pump.
#[derive(Clone)]
pub struct Inbox {
    tx: mpsc::Sender<Queued>,
    service: Arc<ForwardingService>,
}

impl Inbox {
    /// Queue a message behind the ones already waiting.
    ///
    /// A deactivation before the pump reaches it drops the message, even if
    /// the service is active again by then.
    pub async fn push(&self, message: Message) -> Result<(), mpsc::error::SendError<Message>> {
        let scope = self.service.lock().scope.clone();
        self.tx
            .send(Queued { message, scope })
            .await
            .map_err(|e| mpsc::error::SendError(e.0.message))
    }
}

pub struct ForwardingService {
    config: Arc<ConfigStore>,
    stats: Arc<StatsTracker>,
    history: Arc<HistoryLog>,
    relay: Arc<dyn RelayClient>,
    gate: Arc<dyn PermissionGate>,
    policy: RetryPolicy,
    send_timeout: Duration,
    inner: Mutex<Inner>,
    /// Bumped by `clear_all`.
    generation: Mutex<u64>,
    pending_retries: AtomicUsize,
    notices: broadcast::Sender<ForwardNotice>,
}

impl ForwardingService {
    pub fn new(
        config: Arc<ConfigStore>,
        stats: Arc<StatsTracker>,
        history: Arc<HistoryLog>,
        relay: Arc<dyn RelayClient>,
        gate: Arc<dyn PermissionGate>,
    ) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let scope = CancellationToken::new();
        scope.cancel();
        Self {
            config,
            stats,
            history,
            relay,
            gate,
            policy: RetryPolicy::default(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
            inner: Mutex::new(Inner {
                state: ServiceState::Inactive,
                last_error: None,
                unsupported: false,
                scope,
            }),
            generation: Mutex::new(0),
            pending_retries: AtomicUsize::new(0),
            notices,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    // ========================================================================
    // State machine
    // ========================================================================

    /// INACTIVE -> ACTIVE. Idempotent when already active.
    ///
    /// A failed check leaves the service INACTIVE, even if it was active.
    pub fn activate(&self) -> Result<(), CoreError> {
        let mut inner = self.lock();
        let check = if inner.unsupported {
            Err(CoreError::PlatformUnsupported)
        } else if !self.gate.has_capability() {
            Err(CoreError::PermissionDenied)
        } else if !self.config.current().has_credentials() {
            Err(CoreError::ConfigIncomplete)
        } else {
            Ok(())
        };
        if let Err(e) = check {
            if inner.state == ServiceState::Active {
                warn!(error = %e, "activation check failed while active");
                Self::deactivate_locked(&mut inner);
                inner.last_error = Some(ErrorKind::from(&e));
            }
            return Err(e);
        }
        if inner.state == ServiceState::Active {
            return Ok(());
        }

        inner.state = ServiceState::Active;
        inner.scope = CancellationToken::new();
        inner.last_error = None;
        info!("forwarding service activated");
        Ok(())
    }

    /// ANY -> INACTIVE. Cancels pending retries.
    pub fn deactivate(&self) {
        let mut inner = self.lock();
        Self::deactivate_locked(&mut inner);
    }

    fn deactivate_because(&self, reason: ErrorKind) {
        let mut inner = self.lock();
        if inner.state == ServiceState::Active {
            warn!(?reason, "forcing forwarding service inactive");
        }
        Self::deactivate_locked(&mut inner);
        inner.last_error = Some(reason);
    }

    fn deactivate_locked(inner: &mut Inner) {
        if inner.state == ServiceState::Inactive {
            return;
        }
        inner.state = ServiceState::Inactive;
        inner.scope.cancel();
        info!("forwarding service deactivated");
    }

    /// Force INACTIVE if the capability or the credentials have gone away.
    ///
    /// Returns whether the service is still active.
    pub fn revalidate(&self) -> bool {
        if self.service_state() == ServiceState::Inactive {
            return false;
        }
        if !self.gate.has_capability() {
            self.deactivate_because(ErrorKind::PermissionDenied);
            return false;
        }
        if !self.config.current().has_credentials() {
            self.deactivate_because(ErrorKind::ConfigIncomplete);
            return false;
        }
        true
    }

    pub fn service_state(&self) -> ServiceState {
        self.lock().state
    }

    pub fn last_error(&self) -> Option<ErrorKind> {
        self.lock().last_error
    }

    pub fn capability(&self) -> Capability {
        if self.lock().unsupported {
            Capability::Unsupported
        } else if self.gate.has_capability() {
            Capability::Granted
        } else {
            Capability::Missing
        }
    }

    /// Ask the platform for the capability.
    ///
    /// `PlatformUnsupported` is remembered for the rest of the session.
    pub async fn request_permission(&self) -> Result<bool, CoreError> {
        match self.gate.request_capability().await {
            Ok(granted) => {
                info!(granted, "permission request resolved");
                Ok(granted)
            }
            Err(CoreError::PlatformUnsupported) => {
                let mut inner = self.lock();
                inner.unsupported = true;
                inner.last_error = Some(ErrorKind::PlatformUnsupported);
                Self::deactivate_locked(&mut inner);
                Err(CoreError::PlatformUnsupported)
            }
            Err(e) => Err(e),
        }
    }

    /// Record that the platform can never grant the capability.
    pub fn mark_platform_unsupported(&self) {
        let mut inner = self.lock();
        inner.unsupported = true;
        inner.last_error = Some(ErrorKind::PlatformUnsupported);
        Self::deactivate_locked(&mut inner);
    }

    pub fn status(&self) -> ServiceStatus {
        let (state, last_error) = {
            let inner = self.lock();
            (inner.state, inner.last_error)
        };
        ServiceStatus {
            state,
            capability: self.capability(),
            last_error,
            pending_retries: self.pending_retries(),
            credentials_configured: self.config.current().has_credentials(),
        }
    }

    pub fn pending_retries(&self) -> usize {
        self.pending_retries.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Message handling
    // ========================================================================

    /// Handle one incoming message.
    ///
    /// Returns once the outcome is recorded; retries continue in the
    /// background.
    pub async fn on_message(self: &Arc<Self>, message: Message) -> Result<Dispatch, StorageError> {
        let scope = self.lock().scope.clone();
        self.handle(message, scope).await
    }

    /// Handle a message on behalf of the activation `scope` it belongs to.
    async fn handle(
        self: &Arc<Self>,
        message: Message,
        scope: CancellationToken,
    ) -> Result<Dispatch, StorageError> {
        if scope.is_cancelled() || self.service_state() == ServiceState::Inactive {
            debug!("service inactive, dropping message");
            return Ok(Dispatch::Inactive);
        }
        let generation = *self.lock_generation();

        if !self.gate.has_capability() {
            self.deactivate_because(ErrorKind::PermissionDenied);
            return Ok(Dispatch::Inactive);
        }

        let config = self.config.current();
        if !config.has_credentials() {
            self.deactivate_because(ErrorKind::ConfigIncomplete);
            return Ok(Dispatch::Inactive);
        }

        let verdict = filter::evaluate(&message, &config);
        debug!(sender = %message.sender, ?verdict, "filter verdict");
        if verdict == Verdict::Suppress {
            return Ok(Dispatch::Suppressed);
        }

        let result = self.send_once(&config, &message).await;
        let record = ForwardRecord::first_attempt(&message, result);

        let committed = self.lock_generation();
        if *committed != generation {
            info!(id = %record.id, "relay data cleared during send, discarding outcome");
            return Ok(Dispatch::Discarded);
        }
        let appended = self.history.append(&record);

        match result {
            Ok(()) => {
                info!(id = %record.id, sender = %record.sender, "message forwarded");
                let counted = self.stats.record_success(&record);
                drop(committed);
                let forwarded_at = match &counted {
                    Ok(at) => *at,
                    Err(_) => self.stats.now(),
                };
                self.publish_notice(&record, &config, forwarded_at);
                appended?;
                counted?;
                Ok(Dispatch::Delivered(record))
            }
            Err(err) => {
                drop(committed);
                warn!(id = %record.id, ?err, "relay send failed");
                appended?;
                if self.policy.should_retry(record.attempts) && !scope.is_cancelled() {
                    self.spawn_retry(record.clone(), scope);
                    Ok(Dispatch::RetryScheduled(record))
                } else {
                    self.lock().last_error = Some(ErrorKind::Relay(err));
                    Ok(Dispatch::Failed(record))
                }
            }
        }
    }

    async fn send_once(&self, config: &Config, message: &Message) -> Result<(), RelayError> {
        let credentials = RelayCredentials::from(config);
        match tokio::time::timeout(self.send_timeout, self.relay.send(&credentials, message)).await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout = ?self.send_timeout, "relay send timed out");
                Err(RelayError::NetworkError)
            }
        }
    }

    fn spawn_retry(self: &Arc<Self>, record: ForwardRecord, scope: CancellationToken) {
        self.pending_retries.fetch_add(1, Ordering::SeqCst);
        let service = Arc::clone(self);
        tokio::spawn(async move {
            service.retry_loop(record, scope).await;
            service.pending_retries.fetch_sub(1, Ordering::SeqCst);
        });
    }

    async fn retry_loop(&self, mut record: ForwardRecord, scope: CancellationToken) {
        while self.policy.should_retry(record.attempts) {
            let delay = self.policy.delay_for(record.attempts);
            debug!(id = %record.id, ?delay, attempt = record.attempts + 1, "retry scheduled");

            tokio::select! {
                _ = scope.cancelled() => {
                    info!(id = %record.id, "retry cancelled by deactivation");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            if scope.is_cancelled() || self.service_state() != ServiceState::Active {
                return;
            }
            let config = self.config.current();
            if !config.has_credentials() {
                return;
            }
            match self.history.get(&record.id) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    info!(id = %record.id, "record deleted, retry dropped");
                    return;
                }
                Err(e) => {
                    error!(id = %record.id, error = %e, "failed to read history record");
                    return;
                }
            }

            let result = self.send_once(&config, &record.message()).await;
            record.attempts += 1;
            match result {
                Ok(()) => {
                    record.outcome = Outcome::Forwarded;
                    record.last_error = None;
                    info!(id = %record.id, attempts = record.attempts, "retry delivered message");
                    let forwarded_at = {
                        let _committed = self.lock_generation();
                        match self.history.update(&record) {
                            Ok(false) => {
                                info!(id = %record.id, "record deleted during retry, not counted");
                                return;
                            }
                            Ok(true) => {}
                            Err(e) => {
                                error!(id = %record.id, error = %e, "failed to update history record");
                            }
                        }
                        match self.stats.record_success(&record) {
                            Ok(at) => at,
                            Err(e) => {
                                error!(id = %record.id, error = %e, "failed to count retried delivery");
                                self.stats.now()
                            }
                        }
                    };
                    self.publish_notice(&record, &config, forwarded_at);
                    return;
                }
                Err(err) => {
                    warn!(id = %record.id, attempts = record.attempts, ?err, "retry failed");
                    record.last_error = Some(err);
                    match self.history.update(&record) {
                        Ok(true) => {}
                        Ok(false) => {
                            info!(id = %record.id, "record deleted during retry, retry dropped");
                            return;
                        }
                        Err(e) => {
                            error!(id = %record.id, error = %e, "failed to update history record");
                        }
                    }
                }
            }
        }

        if let Some(err) = record.last_error {
            warn!(id = %record.id, ?err, "retries exhausted, message stays failed");
            self.lock().last_error = Some(ErrorKind::Relay(err));
        }
    }

    fn publish_notice(&self, record: &ForwardRecord, config: &Config, forwarded_at: DateTime<Utc>) {
        if !config.notify_on_forward {
            return;
        }
        let notice = ForwardNotice {
            record_id: record.id.clone(),
            sender: record.sender.clone(),
            received_at: record.received_at,
            forwarded_at,
            attempts: record.attempts,
        };
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<ForwardNotice> {
        self.notices.subscribe()
    }

    // ========================================================================
    // Background wiring
    // ========================================================================

    /// Feed messages through `on_message` one at a time, in arrival order.
    ///
    /// The pump stops once every [`Inbox`] clone is dropped.
    pub fn spawn_pump(self: &Arc<Self>, capacity: usize) -> (Inbox, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Queued>(capacity);
        let service = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(queued) = rx.recv().await {
                if let Err(e) = service.handle(queued.message, queued.scope).await {
                    error!(error = %e, "failed to record message outcome");
                }
            }
            debug!("message pump closed");
        });
        let inbox = Inbox {
            tx,
            service: Arc::clone(self),
        };
        (inbox, handle)
    }

    /// Deactivate whenever the committed config loses its credentials.
    pub fn spawn_config_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.config.subscribe();
        let service: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let has_credentials = rx.borrow_and_update().has_credentials();
                let Some(service) = service.upgrade() else {
                    break;
                };
                if !has_credentials && service.service_state() == ServiceState::Active {
                    service.deactivate_because(ErrorKind::ConfigIncomplete);
                }
            }
        })
    }

    // ========================================================================
    // Presentation commands
    // ========================================================================

    pub fn current_stats(&self) -> Stats {
        self.stats.current_stats()
    }

    pub fn history(&self) -> Result<Vec<ForwardRecord>, StorageError> {
        self.history.list()
    }

    pub fn config(&self) -> Config {
        self.config.current()
    }

    pub fn update_config(&self, update: &ConfigUpdate) -> Result<Config, CoreError> {
        let committed = self.config.update(update)?;
        if !committed.has_credentials() && self.service_state() == ServiceState::Active {
            self.deactivate_because(ErrorKind::ConfigIncomplete);
        }
        Ok(committed)
    }

    pub fn delete_record(&self, id: &str) -> Result<bool, StorageError> {
        self.history.delete(id)
    }

    /// Deactivate, then wipe config, history and stats.
    ///
    /// Sends still in flight are not waited for; their outcomes are dropped.
    pub fn clear_all(&self) -> Result<(), CoreError> {
        self.deactivate();
        self.config.clear()?;
        let removed = {
            let mut generation = self.lock_generation();
            *generation += 1;
            let removed = self.history.clear()?;
            self.stats.reset()?;
            removed
        };
        self.lock().last_error = None;
        info!(removed, "all relay data cleared");
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_generation(&self) -> std::sync::MutexGuard<'_, u64> {
        self.generation.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::FilterMode;
    use crate::db::store::{KvStore, MemoryStore};
    use crate::permission::StaticGate;
    use crate::testing::ScriptedRelay;
    use chrono::Local;
    use std::collections::BTreeSet;

    struct Harness {
        service: Arc<ForwardingService>,
        relay: Arc<ScriptedRelay>,
        gate: Arc<StaticGate>,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
    }

    fn harness(relay: ScriptedRelay, gate: StaticGate) -> Harness {
        harness_with_policy(relay, gate, RetryPolicy::default())
    }

    fn harness_with_policy(relay: ScriptedRelay, gate: StaticGate, policy: RetryPolicy) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let kv: Arc<dyn KvStore> = store.clone();
        let clock = Arc::new(ManualClock::new(Local::now()));
        let config = Arc::new(ConfigStore::load(kv.clone()));
        config
            .update(&ConfigUpdate {
                relay_token: Some("123:abc".to_string()),
                relay_destination_id: Some("42".to_string()),
                ..Default::default()
            })
            .unwrap();
        let stats = Arc::new(StatsTracker::load(kv.clone(), clock.clone()));
        let history = Arc::new(HistoryLog::new(kv));
        let relay = Arc::new(relay);
        let gate = Arc::new(gate);
        let service = Arc::new(ForwardingService::new(
            config,
            stats,
            history,
            relay.clone(),
            gate.clone(),
        )
        .with_retry_policy(policy));
        Harness {
            service,
            relay,
            gate,
            store,
            clock,
        }
    }

    fn msg(body: &str) -> Message {
        Message::new("+15550001", body, Utc::now())
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_secs(120)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactive_drops_messages() {
        let h = harness(ScriptedRelay::always_ok(), StaticGate::granted());
        let dispatch = h.service.on_message(msg("hello")).await.unwrap();
        assert_eq!(dispatch, Dispatch::Inactive);
        assert_eq!(h.relay.calls(), 0);
        assert!(h.service.history().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_activate_requires_permission() {
        let h = harness(ScriptedRelay::always_ok(), StaticGate::denied());
        assert!(matches!(h.service.activate(), Err(CoreError::PermissionDenied)));
        assert_eq!(h.service.service_state(), ServiceState::Inactive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activate_requires_credentials() {
        let h = harness(ScriptedRelay::always_ok(), StaticGate::granted());
        h.service
            .update_config(&ConfigUpdate {
                relay_token: Some(String::new()),
                ..Default::default()
            })
            .unwrap();
        assert!(matches!(h.service.activate(), Err(CoreError::ConfigIncomplete)));
        assert_eq!(h.service.service_state(), ServiceState::Inactive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activate_is_idempotent() {
        let h = harness(ScriptedRelay::always_ok(), StaticGate::granted());
        h.service.activate().unwrap();
        h.service.activate().unwrap();
        assert_eq!(h.service.service_state(), ServiceState::Active);
        h.service.deactivate();
        h.service.deactivate();
        assert_eq!(h.service.service_state(), ServiceState::Inactive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activate_while_active_rechecks_capability() {
        let h = harness(ScriptedRelay::always_ok(), StaticGate::granted());
        h.service.activate().unwrap();
        h.gate.set_granted(false);

        assert!(matches!(h.service.activate(), Err(CoreError::PermissionDenied)));
        assert_eq!(h.service.service_state(), ServiceState::Inactive);
        assert_eq!(h.service.last_error(), Some(ErrorKind::PermissionDenied));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_activate_keeps_pending_retries() {
        let h = harness(
            ScriptedRelay::scripted([Err(RelayError::NetworkError), Ok(())]),
            StaticGate::granted(),
        );
        h.service.activate().unwrap();
        h.service.on_message(msg("hello")).await.unwrap();
        h.service.activate().unwrap();
        settle().await;

        assert_eq!(h.relay.calls(), 2);
        assert_eq!(h.service.history().unwrap()[0].outcome, Outcome::Forwarded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suppressed_message_leaves_no_trace() {
        let h = harness(ScriptedRelay::always_ok(), StaticGate::granted());
        h.service
            .update_config(&ConfigUpdate {
                filter_keywords: Some(BTreeSet::from(["otp".to_string()])),
                mode: Some(FilterMode::Blacklist),
                ..Default::default()
            })
            .unwrap();
        h.service.activate().unwrap();

        let dispatch = h.service.on_message(msg("Your OTP is 5")).await.unwrap();
        assert_eq!(dispatch, Dispatch::Suppressed);
        assert_eq!(h.relay.calls(), 0);
        assert!(h.service.history().unwrap().is_empty());
        assert_eq!(h.service.current_stats().total_forwarded, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_records_and_counts() {
        let h = harness(ScriptedRelay::always_ok(), StaticGate::granted());
        let mut notices = h.service.subscribe_notices();
        h.service.activate().unwrap();

        let dispatch = h.service.on_message(msg("Hello there")).await.unwrap();
        let Dispatch::Delivered(record) = dispatch else {
            panic!("expected delivery, got {:?}", dispatch);
        };
        assert_eq!(record.outcome, Outcome::Forwarded);
        assert_eq!(h.service.current_stats().total_forwarded, 1);
        assert_eq!(h.service.history().unwrap(), vec![record.clone()]);
        assert_eq!(notices.try_recv().unwrap().record_id, record.id);
        assert_eq!(h.relay.sent()[0].body, "Hello there");
    }

    #[tokio::test(start_paused = true)]
    async fn test_notice_time_matches_last_forwarded() {
        let h = harness(
            ScriptedRelay::scripted([Err(RelayError::NetworkError), Ok(()), Ok(())]),
            StaticGate::granted(),
        );
        let mut notices = h.service.subscribe_notices();
        h.service.activate().unwrap();

        h.clock.advance(chrono::Duration::hours(3));
        h.service.on_message(msg("retried")).await.unwrap();
        settle().await;
        let retried = notices.try_recv().unwrap();
        assert_eq!(Some(retried.forwarded_at), h.service.current_stats().last_forwarded);

        h.clock.advance(chrono::Duration::minutes(7));
        h.service.on_message(msg("direct")).await.unwrap();
        let direct = notices.try_recv().unwrap();
        assert_eq!(Some(direct.forwarded_at), h.service.current_stats().last_forwarded);
        assert_eq!(
            direct.forwarded_at - retried.forwarded_at,
            chrono::Duration::minutes(7)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifications_can_be_disabled() {
        let h = harness(ScriptedRelay::always_ok(), StaticGate::granted());
        h.service
            .update_config(&ConfigUpdate {
                notify_on_forward: Some(false),
                ..Default::default()
            })
            .unwrap();
        let mut notices = h.service.subscribe_notices();
        h.service.activate().unwrap();
        h.service.on_message(msg("hi")).await.unwrap();
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhaust_to_failed() {
        let h = harness(
            ScriptedRelay::always_err(RelayError::NetworkError),
            StaticGate::granted(),
        );
        h.service.activate().unwrap();

        let dispatch = h.service.on_message(msg("hello")).await.unwrap();
        assert!(matches!(dispatch, Dispatch::RetryScheduled(_)));
        assert_eq!(h.service.pending_retries(), 1);
        settle().await;

        let history = h.service.history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].outcome, Outcome::Failed);
        assert_eq!(history[0].attempts, 3);
        assert_eq!(h.relay.calls(), 3);
        assert_eq!(h.service.current_stats().total_forwarded, 0);
        assert_eq!(
            h.service.last_error(),
            Some(ErrorKind::Relay(RelayError::NetworkError))
        );
        assert_eq!(h.service.pending_retries(), 0);
        assert_eq!(h.service.service_state(), ServiceState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_backoff_timing() {
        let h = harness(
            ScriptedRelay::always_err(RelayError::RateLimited),
            StaticGate::granted(),
        );
        h.service.activate().unwrap();
        h.service.on_message(msg("hello")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1_900)).await;
        assert_eq!(h.relay.calls(), 1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.relay.calls(), 2);
        tokio::time::sleep(Duration::from_millis(3_800)).await;
        assert_eq!(h.relay.calls(), 2);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(h.relay.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success_flips_record() {
        let h = harness(
            ScriptedRelay::scripted([Err(RelayError::RateLimited), Ok(())]),
            StaticGate::granted(),
        );
        h.service.activate().unwrap();
        h.service.on_message(msg("hello")).await.unwrap();
        assert_eq!(h.service.history().unwrap()[0].outcome, Outcome::Failed);

        settle().await;
        let record = &h.service.history().unwrap()[0];
        assert_eq!(record.outcome, Outcome::Forwarded);
        assert_eq!(record.attempts, 2);
        assert_eq!(record.last_error, None);
        assert_eq!(h.service.current_stats().total_forwarded, 1);
        assert_eq!(h.service.last_error(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivate_cancels_pending_retry() {
        let h = harness(
            ScriptedRelay::scripted([Err(RelayError::NetworkError), Ok(())]),
            StaticGate::granted(),
        );
        h.service.activate().unwrap();
        h.service.on_message(msg("hello")).await.unwrap();
        h.service.deactivate();

        h.service.activate().unwrap();
        settle().await;

        assert_eq!(h.relay.calls(), 1);
        assert_eq!(h.service.history().unwrap()[0].outcome, Outcome::Failed);
        assert_eq!(h.service.pending_retries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleted_record_is_not_retried() {
        let h = harness(
            ScriptedRelay::scripted([Err(RelayError::NetworkError), Ok(())]),
            StaticGate::granted(),
        );
        h.service.activate().unwrap();
        let Dispatch::RetryScheduled(record) = h.service.on_message(msg("hello")).await.unwrap()
        else {
            panic!("expected a scheduled retry");
        };

        assert!(h.service.delete_record(&record.id).unwrap());
        settle().await;

        assert!(h.service.history().unwrap().is_empty());
        assert_eq!(h.service.current_stats().total_forwarded, 0);
        assert_eq!(h.relay.calls(), 1);
        assert_eq!(h.service.pending_retries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_during_retry_send_is_not_counted() {
        let h = harness(
            ScriptedRelay::scripted([Err(RelayError::NetworkError), Ok(())])
                .with_delay(Duration::from_secs(1)),
            StaticGate::granted(),
        );
        h.service.activate().unwrap();
        let Dispatch::RetryScheduled(record) = h.service.on_message(msg("hello")).await.unwrap()
        else {
            panic!("expected a scheduled retry");
        };

        // Backoff is 2 s and the retry send takes 1 s.
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(h.relay.calls(), 2);
        assert!(h.service.delete_record(&record.id).unwrap());
        settle().await;

        assert!(h.service.history().unwrap().is_empty());
        assert_eq!(h.service.current_stats().total_forwarded, 0);
        assert_eq!(h.relay.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_all_discards_in_flight_send() {
        let h = harness(
            ScriptedRelay::always_ok().with_delay(Duration::from_secs(5)),
            StaticGate::granted(),
        );
        h.service.activate().unwrap();
        let sending = {
            let service = Arc::clone(&h.service);
            tokio::spawn(async move { service.on_message(msg("hello")).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        h.service.clear_all().unwrap();
        let dispatch = sending.await.unwrap().unwrap();
        settle().await;

        assert_eq!(dispatch, Dispatch::Discarded);
        assert!(h.service.history().unwrap().is_empty());
        assert_eq!(h.service.current_stats().total_forwarded, 0);
        assert_eq!(h.service.current_stats().last_forwarded, None);
        assert_eq!(h.relay.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_all_stops_pending_retry() {
        let h = harness(
            ScriptedRelay::scripted([Err(RelayError::NetworkError), Ok(())]),
            StaticGate::granted(),
        );
        h.service.activate().unwrap();
        h.service.on_message(msg("hello")).await.unwrap();

        h.service.clear_all().unwrap();
        settle().await;

        assert!(h.service.history().unwrap().is_empty());
        assert_eq!(h.service.current_stats().total_forwarded, 0);
        assert_eq!(h.relay.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_do_not_block_new_messages() {
        let h = harness(
            ScriptedRelay::scripted([Err(RelayError::NetworkError), Ok(()), Ok(())]),
            StaticGate::granted(),
        );
        h.service.activate().unwrap();
        h.service.on_message(msg("first")).await.unwrap();
        let second = h.service.on_message(msg("second")).await.unwrap();
        assert!(matches!(second, Dispatch::Delivered(_)));
        assert_eq!(h.service.pending_retries(), 1);

        settle().await;
        assert_eq!(h.service.current_stats().total_forwarded, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_relay_times_out() {
        let h = harness_with_policy(
            ScriptedRelay::always_ok().with_delay(Duration::from_secs(600)),
            StaticGate::granted(),
            RetryPolicy {
                max_attempts: 1,
                ..Default::default()
            },
        );
        let service = h.service;
        service.activate().unwrap();
        let dispatch = service.on_message(msg("hello")).await.unwrap();
        let Dispatch::Failed(record) = dispatch else {
            panic!("expected failure, got {:?}", dispatch);
        };
        assert_eq!(record.last_error, Some(RelayError::NetworkError));
        assert_eq!(
            service.last_error(),
            Some(ErrorKind::Relay(RelayError::NetworkError))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_revoked_permission_forces_inactive() {
        let h = harness(ScriptedRelay::always_ok(), StaticGate::granted());
        h.service.activate().unwrap();
        h.gate.set_granted(false);

        let dispatch = h.service.on_message(msg("hello")).await.unwrap();
        assert_eq!(dispatch, Dispatch::Inactive);
        assert_eq!(h.service.service_state(), ServiceState::Inactive);
        assert_eq!(h.service.last_error(), Some(ErrorKind::PermissionDenied));
        assert_eq!(h.relay.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_platform_is_distinct() {
        let h = harness(ScriptedRelay::always_ok(), StaticGate::unsupported());
        assert!(matches!(
            h.service.request_permission().await,
            Err(CoreError::PlatformUnsupported)
        ));
        assert_eq!(h.service.capability(), Capability::Unsupported);
        assert!(matches!(h.service.activate(), Err(CoreError::PlatformUnsupported)));

        let denied = harness(ScriptedRelay::always_ok(), StaticGate::denied());
        assert_eq!(denied.service.capability(), Capability::Missing);
        assert!(!denied.service.request_permission().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blanking_credentials_deactivates() {
        let h = harness(ScriptedRelay::always_ok(), StaticGate::granted());
        h.service.activate().unwrap();
        h.service
            .update_config(&ConfigUpdate {
                relay_destination_id: Some(" ".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(h.service.service_state(), ServiceState::Inactive);
        assert_eq!(h.service.last_error(), Some(ErrorKind::ConfigIncomplete));
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_watcher_reacts_to_clear() {
        let h = harness(ScriptedRelay::always_ok(), StaticGate::granted());
        let watcher = h.service.spawn_config_watcher();
        h.service.activate().unwrap();

        h.service.config.clear().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.service.service_state(), ServiceState::Inactive);
        watcher.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pump_processes_in_order() {
        let h = harness(ScriptedRelay::always_ok(), StaticGate::granted());
        h.service.activate().unwrap();
        let (inbox, pump) = h.service.spawn_pump(16);
        for body in ["a", "b", "c"] {
            inbox.push(msg(body)).await.unwrap();
        }
        drop(inbox);
        pump.await.unwrap();

        let bodies: Vec<String> = h.relay.sent().into_iter().map(|m| m.body).collect();
        assert_eq!(bodies, vec!["a", "b", "c"]);
        assert_eq!(h.service.current_stats().total_forwarded, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pump_drops_messages_queued_before_deactivate() {
        let h = harness(
            ScriptedRelay::always_ok().with_delay(Duration::from_secs(5)),
            StaticGate::granted(),
        );
        let (inbox, _pump) = h.service.spawn_pump(16);
        inbox.push(msg("before activation")).await.unwrap();

        h.service.activate().unwrap();
        inbox.push(msg("first")).await.unwrap();
        inbox.push(msg("queued")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        h.service.deactivate();
        h.service.activate().unwrap();
        inbox.push(msg("after")).await.unwrap();
        settle().await;

        let bodies: Vec<String> = h.relay.sent().into_iter().map(|m| m.body).collect();
        assert_eq!(bodies, vec!["first", "after"]);
        // The in-flight send still completes and is recorded.
        assert_eq!(h.service.current_stats().total_forwarded, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicates_are_independent() {
        let h = harness(ScriptedRelay::always_ok(), StaticGate::granted());
        h.service.activate().unwrap();
        let message = msg("same");
        h.service.on_message(message.clone()).await.unwrap();
        h.service.on_message(message).await.unwrap();
        assert_eq!(h.service.history().unwrap().len(), 2);
        assert_eq!(h.service.current_stats().total_forwarded, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_write_failure_surfaces() {
        let h = harness(ScriptedRelay::always_ok(), StaticGate::granted());
        h.service.activate().unwrap();
        h.store.set_fail_writes(true);
        assert!(h.service.on_message(msg("hello")).await.is_err());
        assert_eq!(h.service.service_state(), ServiceState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_all_resets_everything() {
        let h = harness(ScriptedRelay::always_ok(), StaticGate::granted());
        h.service.activate().unwrap();
        h.service.on_message(msg("hello")).await.unwrap();

        h.service.clear_all().unwrap();
        let stats = h.service.current_stats();
        assert_eq!(stats.total_forwarded, 0);
        assert_eq!(stats.today_forwarded, 0);
        assert_eq!(stats.last_forwarded_label(), "never");
        assert_eq!(h.service.service_state(), ServiceState::Inactive);
        assert!(h.service.history().unwrap().is_empty());
        assert!(!h.service.config().has_credentials());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_record() {
        let h = harness(ScriptedRelay::always_ok(), StaticGate::granted());
        h.service.activate().unwrap();
        let Dispatch::Delivered(record) = h.service.on_message(msg("hello")).await.unwrap() else {
            panic!("expected delivery");
        };
        assert!(h.service.delete_record(&record.id).unwrap());
        assert!(!h.service.delete_record(&record.id).unwrap());
        assert!(h.service.history().unwrap().is_empty());
        // Stats are not rolled back by deleting history.
        assert_eq!(h.service.current_stats().total_forwarded, 1);
    }
}
