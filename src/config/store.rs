//! Process-wide configuration holder.
//!
//! Reads go through an `RwLock` snapshot; updates and clears serialize on a
//! writer lock and persist before the new value becomes visible.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tracing::{info, warn};

use super::model::{Config, ConfigUpdate};
use crate::db::store::{get_json, put_json, KvStore, SCOPE_CONFIG};
use crate::error::StorageError;

const CONFIG_KEY: &str = "current";

pub struct ConfigStore {
    store: Arc<dyn KvStore>,
    current: RwLock<Config>,
    writer: Mutex<()>,
    changes: watch::Sender<Config>,
}

impl ConfigStore {
    /// Load the persisted config, falling back to defaults.
    ///
    /// Never fails: a missing value or a read error both yield defaults.
    pub fn load(store: Arc<dyn KvStore>) -> Self {
        let config = match get_json::<Config>(store.as_ref(), SCOPE_CONFIG, CONFIG_KEY) {
            Ok(Some(config)) => config,
            Ok(None) => Config::default(),
            Err(e) => {
                warn!(error = %e, "failed to read config, using defaults");
                Config::default()
            }
        };

        let (changes, _) = watch::channel(config.clone());
        Self {
            store,
            current: RwLock::new(config),
            writer: Mutex::new(()),
            changes,
        }
    }

    /// Last committed config.
    pub fn current(&self) -> Config {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Receiver notified after every committed change.
    pub fn subscribe(&self) -> watch::Receiver<Config> {
        self.changes.subscribe()
    }

    /// Apply a partial update and persist it. Returns the committed config.
    ///
    /// On a storage failure the previous config stays in effect.
    pub fn update(&self, update: &ConfigUpdate) -> Result<Config, StorageError> {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let next = update.apply_to(&self.current());
        self.commit(next)
    }

    /// Reset to defaults and persist.
    pub fn clear(&self) -> Result<(), StorageError> {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        self.commit(Config::default())?;
        info!("configuration reset to defaults");
        Ok(())
    }

    fn commit(&self, next: Config) -> Result<Config, StorageError> {
        put_json(self.store.as_ref(), SCOPE_CONFIG, CONFIG_KEY, &next)?;
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = next.clone();
        self.changes.send_replace(next.clone());
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::FilterMode;
    use crate::db::store::{MemoryStore, SqliteStore};

    #[test]
    fn test_load_defaults_when_empty() {
        let store = ConfigStore::load(Arc::new(MemoryStore::new()));
        assert_eq!(store.current(), Config::default());
    }

    #[test]
    fn test_load_defaults_on_corrupt_value() {
        let kv = Arc::new(MemoryStore::new());
        kv.put(SCOPE_CONFIG, CONFIG_KEY, "{broken").unwrap();
        let store = ConfigStore::load(kv);
        assert_eq!(store.current(), Config::default());
    }

    #[test]
    fn test_update_persists_and_returns_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.db");
        {
            let kv: Arc<dyn KvStore> = Arc::new(SqliteStore::open(&path).unwrap());
            let store = ConfigStore::load(kv);
            let committed = store
                .update(&ConfigUpdate {
                    relay_token: Some("tok".to_string()),
                    mode: Some(FilterMode::Whitelist),
                    ..Default::default()
                })
                .unwrap();
            assert_eq!(committed.relay_token, "tok");
            assert_eq!(committed, store.current());
        }

        let kv: Arc<dyn KvStore> = Arc::new(SqliteStore::open(&path).unwrap());
        let reloaded = ConfigStore::load(kv);
        assert_eq!(reloaded.current().relay_token, "tok");
        assert_eq!(reloaded.current().mode, FilterMode::Whitelist);
    }

    #[test]
    fn test_failed_write_keeps_previous_config() {
        let kv = Arc::new(MemoryStore::new());
        let store = ConfigStore::load(kv.clone());
        store
            .update(&ConfigUpdate {
                relay_token: Some("first".to_string()),
                ..Default::default()
            })
            .unwrap();

        kv.set_fail_writes(true);
        let result = store.update(&ConfigUpdate {
            relay_token: Some("second".to_string()),
            ..Default::default()
        });
        assert!(result.is_err());
        assert_eq!(store.current().relay_token, "first");
    }

    #[test]
    fn test_clear_resets_and_notifies() {
        let store = ConfigStore::load(Arc::new(MemoryStore::new()));
        store
            .update(&ConfigUpdate {
                relay_token: Some("tok".to_string()),
                relay_destination_id: Some("42".to_string()),
                ..Default::default()
            })
            .unwrap();
        let mut rx = store.subscribe();
        assert!(!rx.has_changed().unwrap());

        store.clear().unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(!rx.borrow_and_update().has_credentials());
        assert_eq!(store.current(), Config::default());
    }

    #[test]
    fn test_concurrent_updates_are_serialized() {
        let store = Arc::new(ConfigStore::load(Arc::new(MemoryStore::new())));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .update(&ConfigUpdate {
                            relay_destination_id: Some(format!("chat-{}", i)),
                            ..Default::default()
                        })
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            let snapshot = handle.join().unwrap();
            assert!(snapshot.relay_destination_id.starts_with("chat-"));
        }
        assert!(store.current().relay_destination_id.starts_with("chat-"));
    }
}
