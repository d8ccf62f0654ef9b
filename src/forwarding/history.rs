//! Durable log of forwarded (or failed) messages.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use std::sync::Arc;
use tracing::warn;

use super::message::ForwardRecord;
use crate::db::store::{get_json, put_json, replace_json, KvStore, SCOPE_HISTORY};
use crate::error::StorageError;

pub struct HistoryLog {
    store: Arc<dyn KvStore>,
}

impl HistoryLog {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub fn append(&self, record: &ForwardRecord) -> Result<(), StorageError> {
        put_json(self.store.as_ref(), SCOPE_HISTORY, &record.id, record)
    }

    /// Overwrite an existing record in place (retry outcome changes).
    ///
    /// Returns false, writing nothing, if the record was deleted meanwhile.
    pub fn update(&self, record: &ForwardRecord) -> Result<bool, StorageError> {
        replace_json(self.store.as_ref(), SCOPE_HISTORY, &record.id, record)
    }

    pub fn get(&self, id: &str) -> Result<Option<ForwardRecord>, StorageError> {
        get_json(self.store.as_ref(), SCOPE_HISTORY, id)
    }

    /// All records, most recent first. Undecodable rows are skipped.
    pub fn list(&self) -> Result<Vec<ForwardRecord>, StorageError> {
        let rows = self.store.list(SCOPE_HISTORY)?;
        Ok(rows
            .into_iter()
            .rev()
            .filter_map(|(id, raw)| match serde_json::from_str::<ForwardRecord>(&raw) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(%id, error = %e, "skipping unreadable history record");
                    None
                }
            })
            .collect())
    }

    /// Returns whether a record with `id` existed.
    pub fn delete(&self, id: &str) -> Result<bool, StorageError> {
        self.store.delete(SCOPE_HISTORY, id)
    }

    pub fn clear(&self) -> Result<usize, StorageError> {
        self.store.clear_scope(SCOPE_HISTORY)
    }
}
