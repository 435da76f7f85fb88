//! Schema management and migrations.

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{QmdError, Result};

/// Schema version. Increment when adding a migration.
const SCHEMA_VERSION: i64 = 1;

/// Apply all pending migrations.
///
/// # Errors
///
/// Returns `QmdError::Internal` if a migration fails to apply.
pub fn apply_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )?;

    let current = current_version(conn)?;
    debug!(current, target = SCHEMA_VERSION, "Checking migrations");

    if current < 1 {
        info!(from = current, to = SCHEMA_VERSION, "Applying schema migrations");
        conn.execute_batch(SCHEMA_V1)
            .map_err(|e| QmdError::Internal(format!("Failed to apply v1 schema: {e}")))?;
        conn.execute("INSERT INTO schema_migrations (version) VALUES (?1)", [1])?;
    }

    Ok(())
}

/// Current schema version, 0 for a fresh database.
///
/// # Errors
///
/// Returns an error if the migrations table cannot be read.
pub fn current_version(conn: &Connection) -> Result<i64> {
    let version: Option<i64> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get::<_, Option<i64>>(0)
        })
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}

/// Initial schema.
///
/// `entries.seq` is the stable rowid shared with `entries_fts`; it also
/// records insertion order for timeline ties and deduplication.
const SCHEMA_V1: &str = r"
CREATE TABLE IF NOT EXISTS entries (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    id         TEXT NOT NULL UNIQUE,
    content    TEXT NOT NULL,
    metadata   TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_entries_created ON entries (created_at DESC, seq DESC);

CREATE VIRTUAL TABLE IF NOT EXISTS entries_fts USING fts5(
    content,
    metadata,
    tokenize = 'unicode61'
);

CREATE TABLE IF NOT EXISTS tags (
    id    TEXT PRIMARY KEY NOT NULL,
    name  TEXT NOT NULL UNIQUE,
    color TEXT
);

CREATE TABLE IF NOT EXISTS entry_tags (
    entry_id TEXT NOT NULL REFERENCES entries (id) ON DELETE CASCADE,
    tag_id   TEXT NOT NULL REFERENCES tags (id) ON DELETE CASCADE,
    PRIMARY KEY (entry_id, tag_id)
);

CREATE INDEX IF NOT EXISTS idx_entry_tags_tag ON entry_tags (tag_id);

CREATE TABLE IF NOT EXISTS relations (
    seq           INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id     TEXT NOT NULL REFERENCES entries (id) ON DELETE CASCADE,
    target_id     TEXT NOT NULL REFERENCES entries (id) ON DELETE CASCADE,
    relation_type TEXT NOT NULL DEFAULT 'related',
    UNIQUE (source_id, target_id, relation_type)
);

CREATE INDEX IF NOT EXISTS idx_relations_target ON relations (target_id);

CREATE TABLE IF NOT EXISTS embeddings (
    entry_id   TEXT PRIMARY KEY NOT NULL REFERENCES entries (id) ON DELETE CASCADE,
    model      TEXT NOT NULL,
    dimensions INTEGER NOT NULL,
    vector     BLOB NOT NULL,
    updated_at INTEGER NOT NULL
);
";

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE name = ?1",
            [name],
            |row| row.get::<_, i64>(0),
        )
        .unwrap()
            > 0
    }

    #[test]
    fn migrations_create_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();

        for table in [
            "entries",
            "entries_fts",
            "tags",
            "entry_tags",
            "relations",
            "embeddings",
        ] {
            assert!(table_exists(&conn, table), "missing table {table}");
        }
        assert_eq!(current_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();
        apply_migrations(&conn).unwrap();

        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, 1);
    }
}
