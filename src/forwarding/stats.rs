//! Delivery counters with lazy local-day rollover.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::message::ForwardRecord;
use crate::clock::Clock;
use crate::db::store::{get_json, put_json, KvStore, SCOPE_STATS};
use crate::error::StorageError;

const STATS_KEY: &str = "current";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stats {
    pub total_forwarded: u64,
    pub today_forwarded: u64,
    pub last_forwarded: Option<DateTime<Utc>>,
    /// Local calendar day `today_forwarded` counts for.
    pub day: Option<NaiveDate>,
}

impl Stats {
    /// "never" or an RFC 3339 timestamp.
    pub fn last_forwarded_label(&self) -> String {
        match self.last_forwarded {
            Some(at) => at.with_timezone(&Local).to_rfc3339(),
            None => "never".to_string(),
        }
    }
}

pub struct StatsTracker {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    stats: Mutex<Stats>,
}

impl StatsTracker {
    /// Load persisted counters; unreadable or missing stats start at zero.
    pub fn load(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        let stats = match get_json::<Stats>(store.as_ref(), SCOPE_STATS, STATS_KEY) {
            Ok(stats) => stats.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "failed to read stats, starting from zero");
                Stats::default()
            }
        };
        Self {
            store,
            clock,
            stats: Mutex::new(stats),
        }
    }

    /// Snapshot, after applying any pending day rollover.
    pub fn current_stats(&self) -> Stats {
        let mut stats = self.lock();
        self.rollover_locked(&mut stats);
        stats.clone()
    }

    pub fn rollover_if_new_day(&self) {
        let mut stats = self.lock();
        self.rollover_locked(&mut stats);
    }

    /// Current time according to the tracker's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now().with_timezone(&Utc)
    }

    /// Count one successful delivery and return the `last_forwarded` it set.
    ///
    /// On a storage failure the in-memory counters are left unchanged.
    pub fn record_success(&self, record: &ForwardRecord) -> Result<DateTime<Utc>, StorageError> {
        let mut stats = self.lock();
        self.rollover_locked(&mut stats);

        let now = self.clock.now();
        let mut next = stats.clone();
        next.total_forwarded += 1;
        if record.received_at.with_timezone(&Local).date_naive() == now.date_naive() {
            next.today_forwarded += 1;
        }
        let at = now.with_timezone(&Utc);
        next.last_forwarded = Some(at);

        put_json(self.store.as_ref(), SCOPE_STATS, STATS_KEY, &next)?;
        *stats = next;
        Ok(at)
    }

    /// Zero every counter.
    pub fn reset(&self) -> Result<(), StorageError> {
        let mut stats = self.lock();
        let next = Stats {
            day: Some(self.clock.now().date_naive()),
            ..Stats::default()
        };
        put_json(self.store.as_ref(), SCOPE_STATS, STATS_KEY, &next)?;
        *stats = next;
        Ok(())
    }

    fn rollover_locked(&self, stats: &mut Stats) {
        let today = self.clock.now().date_naive();
        if stats.day == Some(today) {
            return;
        }

        debug!(from = ?stats.day, to = %today, "rolling over daily counter");
        stats.today_forwarded = 0;
        stats.day = Some(today);
        if let Err(e) = put_json(self.store.as_ref(), SCOPE_STATS, STATS_KEY, &*stats) {
            // A reload repeats the rollover, so memory may run ahead of disk.
            warn!(error = %e, "failed to persist stats rollover");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Stats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }
}
