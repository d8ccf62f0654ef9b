//! SQLite connection management for the relay database.
//!
//! CHANGELOG:
//! - 10/19/2026 - Open read-write relay.db and apply schema

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

use super::queries;

/// Data directory for the relay.
///
/// Tries in order:
/// 1. WOLFIES_SMS_RELAY_HOME env var
/// 2. ~/.wolfies-sms-relay
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var("WOLFIES_SMS_RELAY_HOME") {
        return PathBuf::from(path);
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".wolfies-sms-relay")
}

/// Default relay.db path.
pub fn default_db_path() -> PathBuf {
    default_data_dir().join("relay.db")
}

/// Default daemon socket path.
pub fn default_socket_path() -> PathBuf {
    default_data_dir().join("daemon.sock")
}

/// Open (creating if needed) the relay database and apply the schema.
pub fn open_db(db_path: impl AsRef<Path>) -> Result<Connection> {
    let db_path = db_path.as_ref();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory {:?}", parent))?;
        }
    }

    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open relay database at {:?}", db_path))?;
    init_schema(&conn)?;
    Ok(conn)
}

/// In-memory database with the same schema (tests, dry runs).
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(queries::SCHEMA)
        .context("Failed to apply relay schema")
}
