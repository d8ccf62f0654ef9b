//! SQL for the scoped key-value table.
//!
//! CHANGELOG:
//! - 10/19/2026 - Replaced Messages.db queries with kv schema

/// Schema. `rowid` preserves insertion order within a scope; upserts keep it.
pub const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
CREATE TABLE IF NOT EXISTS kv (
    scope TEXT NOT NULL,
    key   TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (scope, key)
);
"#;

/// Read one value.
pub const KV_GET: &str = r#"
SELECT value FROM kv WHERE scope = ?1 AND key = ?2
"#;

/// Insert or replace one value in place.
pub const KV_PUT: &str = r#"
INSERT INTO kv (scope, key, value) VALUES (?1, ?2, ?3)
ON CONFLICT (scope, key) DO UPDATE SET value = excluded.value
"#;

/// Overwrite an existing value; touches nothing if the key is gone.
pub const KV_REPLACE: &str = r#"
UPDATE kv SET value = ?3 WHERE scope = ?1 AND key = ?2
"#;

/// Delete one value.
pub const KV_DELETE: &str = r#"
DELETE FROM kv WHERE scope = ?1 AND key = ?2
"#;

/// All entries of a scope, oldest first.
pub const KV_LIST: &str = r#"
SELECT key, value FROM kv WHERE scope = ?1 ORDER BY rowid ASC
"#;

/// Drop a whole scope.
pub const KV_CLEAR_SCOPE: &str = r#"
DELETE FROM kv WHERE scope = ?1
"#;
