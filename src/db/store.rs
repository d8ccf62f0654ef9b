//! Scoped key-value store used for config, stats and history.
//!
//! Both implementations keep entries of a scope in insertion order, and
//! replacing an existing key keeps its position.
//!
//! CHANGELOG:
//! - 10/19/2026 - KvStore trait, SQLite and in-memory backends

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{connection, queries};
use crate::error::StorageError;

pub const SCOPE_CONFIG: &str = "config";
pub const SCOPE_STATS: &str = "stats";
pub const SCOPE_HISTORY: &str = "history";

/// Durable key-value storage partitioned by scope.
pub trait KvStore: Send + Sync {
    fn get(&self, scope: &str, key: &str) -> Result<Option<String>, StorageError>;
    fn put(&self, scope: &str, key: &str, value: &str) -> Result<(), StorageError>;
    /// Overwrite an existing key only. Returns whether the key existed.
    fn replace(&self, scope: &str, key: &str, value: &str) -> Result<bool, StorageError>;
    /// Returns whether the key existed.
    fn delete(&self, scope: &str, key: &str) -> Result<bool, StorageError>;
    /// Entries of a scope, oldest first.
    fn list(&self, scope: &str) -> Result<Vec<(String, String)>, StorageError>;
    /// Returns the number of removed entries.
    fn clear_scope(&self, scope: &str) -> Result<usize, StorageError>;
}

/// Read and decode a JSON value.
pub fn get_json<T: DeserializeOwned>(
    store: &dyn KvStore,
    scope: &str,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.get(scope, key)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StorageError::Decode {
                scope: scope.to_string(),
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Encode and write a JSON value.
pub fn put_json<T: Serialize>(
    store: &dyn KvStore,
    scope: &str,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let raw = serde_json::to_string(value).map_err(|source| StorageError::Encode {
        scope: scope.to_string(),
        key: key.to_string(),
        source,
    })?;
    store.put(scope, key, &raw)
}

/// Encode and overwrite an existing JSON value. Returns whether it existed.
pub fn replace_json<T: Serialize>(
    store: &dyn KvStore,
    scope: &str,
    key: &str,
    value: &T,
) -> Result<bool, StorageError> {
    let raw = serde_json::to_string(value).map_err(|source| StorageError::Encode {
        scope: scope.to_string(),
        key: key.to_string(),
        source,
    })?;
    store.replace(scope, key, &raw)
}

// ============================================================================
// SQLite backend
// ============================================================================

/// KvStore backed by relay.db.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Ok(Self::from_connection(connection::open_db(path)?))
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        Ok(Self::from_connection(connection::open_in_memory()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StorageError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StorageError::Unavailable("connection lock poisoned".to_string()))?;
        Ok(f(&conn)?)
    }
}

impl KvStore for SqliteStore {
    fn get(&self, scope: &str, key: &str) -> Result<Option<String>, StorageError> {
        self.with_conn(|conn| {
            conn.query_row(queries::KV_GET, params![scope, key], |row| row.get(0))
                .optional()
        })
    }

    fn put(&self, scope: &str, key: &str, value: &str) -> Result<(), StorageError> {
        self.with_conn(|conn| conn.execute(queries::KV_PUT, params![scope, key, value]))?;
        Ok(())
    }

    fn replace(&self, scope: &str, key: &str, value: &str) -> Result<bool, StorageError> {
        let updated =
            self.with_conn(|conn| conn.execute(queries::KV_REPLACE, params![scope, key, value]))?;
        Ok(updated > 0)
    }

    fn delete(&self, scope: &str, key: &str) -> Result<bool, StorageError> {
        let removed = self.with_conn(|conn| conn.execute(queries::KV_DELETE, params![scope, key]))?;
        Ok(removed > 0)
    }

    fn list(&self, scope: &str) -> Result<Vec<(String, String)>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(queries::KV_LIST)?;
            let rows = stmt.query_map(params![scope], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect()
        })
    }

    fn clear_scope(&self, scope: &str) -> Result<usize, StorageError> {
        self.with_conn(|conn| conn.execute(queries::KV_CLEAR_SCOPE, params![scope]))
    }
}

// ============================================================================
// In-memory backend
// ============================================================================

/// Volatile KvStore. Writes can be made to fail to exercise error paths.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<Vec<(String, String, String)>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("writes disabled".to_string()))
        } else {
            Ok(())
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, Vec<(String, String, String)>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KvStore for MemoryStore {
    fn get(&self, scope: &str, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .entries()
            .iter()
            .find(|(s, k, _)| s == scope && k == key)
            .map(|(_, _, v)| v.clone()))
    }

    fn put(&self, scope: &str, key: &str, value: &str) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut entries = self.entries();
        match entries.iter_mut().find(|(s, k, _)| s == scope && k == key) {
            Some(entry) => entry.2 = value.to_string(),
            None => entries.push((scope.to_string(), key.to_string(), value.to_string())),
        }
        Ok(())
    }

    fn replace(&self, scope: &str, key: &str, value: &str) -> Result<bool, StorageError> {
        self.check_writable()?;
        match self
            .entries()
            .iter_mut()
            .find(|(s, k, _)| s == scope && k == key)
        {
            Some(entry) => {
                entry.2 = value.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(&self, scope: &str, key: &str) -> Result<bool, StorageError> {
        self.check_writable()?;
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|(s, k, _)| !(s == scope && k == key));
        Ok(entries.len() != before)
    }

    fn list(&self, scope: &str) -> Result<Vec<(String, String)>, StorageError> {
        Ok(self
            .entries()
            .iter()
            .filter(|(s, _, _)| s == scope)
            .map(|(_, k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn clear_scope(&self, scope: &str) -> Result<usize, StorageError> {
        self.check_writable()?;
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|(s, _, _)| s != scope);
        Ok(before - entries.len())
    }
}
