//! Durable entry storage in a single SQLite file.
//!
//! The [`Store`] owns every entity. All mutations go through one
//! connection mutex and run inside an `IMMEDIATE` transaction, so the entry
//! row, its full-text index record and its cached fingerprint are always
//! committed (or rolled back) together.

pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};
use serde::Serialize;
use tracing::{debug, info};

use crate::entry::{Entry, Metadata, decode_metadata, encode_metadata, validate_id};
use crate::error::{QmdError, Result};
use crate::rank::{Fingerprinter, encode_vector};
use crate::search::{Candidate, fts};

/// Default number of entries returned by a timeline query.
pub const DEFAULT_TIMELINE_LIMIT: usize = 100;

/// Cap for bulk export paths.
pub const BULK_LIMIT: usize = 1000;

/// Milliseconds to wait on a lock held by another process.
const BUSY_TIMEOUT_MS: u32 = 5000;

/// Columns expected by [`row_to_entry`], in order.
const ENTRY_COLUMNS: &str = "id, content, metadata, created_at, updated_at";

/// Inclusive `created_at` bounds for timeline queries, in unix seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub from: Option<i64>,
    pub to: Option<i64>,
}

/// Outcome of a deduplication pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupeReport {
    /// Distinct contents that had more than one entry.
    #[serde(rename = "duplicates")]
    pub groups: usize,
    /// Entries deleted.
    pub removed: usize,
}

/// Handle to the entry store. Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
    fingerprinter: Option<Arc<dyn Fingerprinter>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field(
                "fingerprinter",
                &self.fingerprinter.as_ref().map(|fp| fp.model().to_string()),
            )
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open or create the store file at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or database cannot be created, or
    /// the schema cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        info!(path = %path.display(), "Opening store");
        let conn = Connection::open(path)?;
        Self::initialize(conn, Some(path.to_path_buf()))
    }

    /// Open a private in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self> {
        Self::initialize(Connection::open_in_memory()?, None)
    }

    fn initialize(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS};"))?;
        schema::apply_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
            fingerprinter: None,
        })
    }

    /// Cache a fingerprint for every entry written from now on.
    #[must_use]
    pub fn with_fingerprinter(mut self, fingerprinter: Arc<dyn Fingerprinter>) -> Self {
        self.fingerprinter = Some(fingerprinter);
        self
    }

    /// Location of the store file, `None` when in memory.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against the connection under the store lock.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` in a write transaction under the store lock. The transaction
    /// commits only if `f` succeeds.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Insert or fully replace an entry.
    ///
    /// Replacing keeps the original `created_at` and refreshes `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns `QmdError::InvalidArgument` if `id` or `content` is empty.
    pub fn upsert(&self, id: &str, content: &str, metadata: &Metadata) -> Result<Entry> {
        self.upsert_at(id, content, metadata, chrono::Utc::now().timestamp())
    }

    /// [`Store::upsert`] with an explicit timestamp, used by imports that know
    /// when a document was written.
    ///
    /// # Errors
    ///
    /// Returns `QmdError::InvalidArgument` if `id` or `content` is empty.
    pub fn upsert_at(
        &self,
        id: &str,
        content: &str,
        metadata: &Metadata,
        timestamp: i64,
    ) -> Result<Entry> {
        validate_id(id, "id")?;
        if content.is_empty() {
            return Err(QmdError::invalid("content cannot be empty"));
        }

        let metadata_json = encode_metadata(metadata)?;
        let fingerprint = self
            .fingerprinter
            .as_ref()
            .map(|fp| (fp.model().to_string(), fp.fingerprint(content)));

        let entry = self.write(|tx| {
            let (created_at, updated_at): (i64, i64) = tx.query_row(
                "INSERT INTO entries (id, content, metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT (id) DO UPDATE SET
                     content = excluded.content,
                     metadata = excluded.metadata,
                     updated_at = excluded.updated_at
                 RETURNING created_at, updated_at",
                params![id, content, metadata_json, timestamp],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            fts::reindex(tx, id, content, &metadata_json)?;

            if let Some((model, vector)) = &fingerprint {
                write_fingerprint(tx, id, model, vector, timestamp)?;
            }

            Ok(Entry {
                id: id.to_string(),
                content: content.to_string(),
                metadata: metadata.clone(),
                created_at,
                updated_at,
            })
        })?;

        debug!(id, "Upserted entry");
        Ok(entry)
    }

    /// Fetch one entry.
    ///
    /// # Errors
    ///
    /// Returns `QmdError::NotFound` if no entry has this id.
    pub fn get(&self, id: &str) -> Result<Entry> {
        self.read(|conn| find_entry(conn, id))?
            .ok_or_else(|| QmdError::not_found(format!("entry '{id}'")))
    }

    /// Delete an entry and everything hanging off it: tag links, relations
    /// in either direction, its index record and its cached fingerprint.
    ///
    /// Idempotent; returns whether an entry was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let removed = self.write(|tx| delete_entry(tx, id))?;
        if removed {
            debug!(id, "Deleted entry");
        }
        Ok(removed)
    }

    /// Entries newest first by `created_at`, within inclusive bounds.
    ///
    /// Entries created in the same second are ordered by insertion, newest
    /// first. There is no cursor: narrow the range to page.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_by_time(&self, range: TimeRange, limit: usize) -> Result<Vec<Entry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.read(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {ENTRY_COLUMNS} FROM entries
                 WHERE (?1 IS NULL OR created_at >= ?1)
                   AND (?2 IS NULL OR created_at <= ?2)
                 ORDER BY created_at DESC, seq DESC
                 LIMIT ?3"
            ))?;
            let rows = stmt.query_map(params![range.from, range.to, limit], row_to_entry)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Remove entries whose content exactly matches an earlier entry.
    ///
    /// The first-inserted entry of each group survives. The scan and the
    /// deletes share one transaction, so entries written concurrently are
    /// never considered.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub fn deduplicate(&self) -> Result<DedupeReport> {
        let report = self.write(|tx| {
            let groups: i64 = tx.query_row(
                "SELECT COUNT(*) FROM (
                     SELECT content FROM entries GROUP BY content HAVING COUNT(*) > 1
                 )",
                [],
                |row| row.get(0),
            )?;

            let redundant: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT e.id FROM entries e
                     JOIN (
                         SELECT content, MIN(seq) AS keep FROM entries
                         GROUP BY content HAVING COUNT(*) > 1
                     ) d ON d.content = e.content AND e.seq <> d.keep
                     ORDER BY e.seq",
                )?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };

            let mut removed = 0;
            for id in &redundant {
                if delete_entry(tx, id)? {
                    removed += 1;
                }
            }

            Ok(DedupeReport {
                groups: usize::try_from(groups).unwrap_or_default(),
                removed,
            })
        })?;

        info!(groups = report.groups, removed = report.removed, "Deduplicated entries");
        Ok(report)
    }

    /// Query the full-text index.
    ///
    /// When `model` is set, candidates carry their cached fingerprint for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn search(&self, query: &str, limit: usize, model: Option<&str>) -> Result<Vec<Candidate>> {
        self.read(|conn| fts::search(conn, query, limit, model))
    }

    /// Regenerate the full-text index from the entries table.
    ///
    /// # Errors
    ///
    /// Returns an error if the rebuild fails.
    pub fn rebuild_index(&self) -> Result<usize> {
        self.write(|tx| fts::rebuild(tx))
    }

    /// Confirm the index covers exactly the live entries.
    ///
    /// # Errors
    ///
    /// Returns `QmdError::Internal` if the index diverged.
    pub fn check_index(&self) -> Result<()> {
        self.read(fts::check)
    }

    /// Recompute and cache the fingerprint of one entry.
    ///
    /// Takes the store lock for this entry only, so bulk re-embedding never
    /// starves other writers. Returns `false` if the entry no longer exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub fn embed_one(&self, id: &str, fingerprinter: &dyn Fingerprinter) -> Result<bool> {
        let timestamp = chrono::Utc::now().timestamp();
        self.write(|tx| {
            let content: Option<String> = tx
                .query_row("SELECT content FROM entries WHERE id = ?1", [id], |row| {
                    row.get(0)
                })
                .optional()?;
            let Some(content) = content else {
                return Ok(false);
            };

            let vector = fingerprinter.fingerprint(&content);
            write_fingerprint(tx, id, fingerprinter.model(), &vector, timestamp)?;
            Ok(true)
        })
    }

    /// Cached fingerprint of an entry for `model`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub fn cached_fingerprint(&self, id: &str, model: &str) -> Result<Option<Vec<f32>>> {
        self.read(|conn| {
            let blob: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT vector FROM embeddings WHERE entry_id = ?1 AND model = ?2",
                    params![id, model],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(blob.as_deref().map(crate::rank::decode_vector))
        })
    }

    /// All entry ids in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn entry_ids(&self) -> Result<Vec<String>> {
        self.read(|conn| {
            let mut stmt = conn.prepare_cached("SELECT id FROM entries ORDER BY seq")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Number of live entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count(&self) -> Result<usize> {
        let count: i64 = self.read(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?)
        })?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

/// Map a row selected with [`ENTRY_COLUMNS`] (or the same leading columns)
/// to an [`Entry`].
pub(crate) fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<Entry> {
    let metadata_raw: Option<String> = row.get(2)?;
    let metadata = decode_metadata(metadata_raw.as_deref())
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;

    Ok(Entry {
        id: row.get(0)?,
        content: row.get(1)?,
        metadata,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

pub(crate) fn find_entry(conn: &Connection, id: &str) -> Result<Option<Entry>> {
    let mut stmt =
        conn.prepare_cached(&format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ?1"))?;
    Ok(stmt.query_row([id], row_to_entry).optional()?)
}

pub(crate) fn entry_exists(conn: &Connection, id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM entries WHERE id = ?1", [id], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

/// Delete inside an open transaction. Foreign keys cascade the tag links,
/// relations and fingerprint; the index record is removed explicitly.
fn delete_entry(conn: &Connection, id: &str) -> Result<bool> {
    let seq: Option<i64> = conn
        .query_row("SELECT seq FROM entries WHERE id = ?1", [id], |row| row.get(0))
        .optional()?;
    let Some(seq) = seq else {
        return Ok(false);
    };

    fts::remove(conn, seq)?;
    conn.execute("DELETE FROM entries WHERE seq = ?1", [seq])?;
    Ok(true)
}

fn write_fingerprint(
    conn: &Connection,
    id: &str,
    model: &str,
    vector: &[f32],
    timestamp: i64,
) -> Result<()> {
    let dimensions = i64::try_from(vector.len()).unwrap_or(i64::MAX);
    conn.execute(
        "INSERT INTO embeddings (entry_id, model, dimensions, vector, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (entry_id) DO UPDATE SET
             model = excluded.model,
             dimensions = excluded.dimensions,
             vector = excluded.vector,
             updated_at = excluded.updated_at",
        params![id, model, dimensions, encode_vector(vector), timestamp],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::MetaValue;
    use crate::rank::HashedTermFingerprinter;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    fn count_rows(store: &Store, sql: &str) -> i64 {
        store
            .read(|conn| Ok(conn.query_row(sql, [], |row| row.get(0))?))
            .unwrap()
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let store = store();
        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), MetaValue::from("notes.md"));

        let written = store.upsert("n1", "Hello  world\n", &metadata).unwrap();
        let read = store.get("n1").unwrap();

        assert_eq!(read.content, "Hello  world\n");
        assert_eq!(read.metadata, metadata);
        assert_eq!(read, written);
    }

    #[test]
    fn upsert_replaces_and_keeps_created_at() {
        let store = store();
        store.upsert_at("n1", "first", &Metadata::new(), 100).unwrap();
        let replaced = store.upsert_at("n1", "second", &Metadata::new(), 200).unwrap();

        assert_eq!(replaced.created_at, 100);
        assert_eq!(replaced.updated_at, 200);
        assert_eq!(store.get("n1").unwrap().content, "second");
        assert_eq!(store.count().unwrap(), 1);
        assert!(store.search("first", 10, None).unwrap().is_empty());
        assert_eq!(store.search("second", 10, None).unwrap().len(), 1);
    }

    #[test]
    fn upsert_rejects_empty_fields() {
        let store = store();
        assert!(matches!(
            store.upsert("", "content", &Metadata::new()),
            Err(QmdError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.upsert("id", "", &Metadata::new()),
            Err(QmdError::InvalidArgument(_))
        ));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn upsert_accepts_any_non_empty_id_and_content() {
        let store = store();
        let long_id = "x".repeat(201);
        store.upsert(&long_id, "long id", &Metadata::new()).unwrap();
        store.upsert(" ", "blank id", &Metadata::new()).unwrap();
        store.upsert("w", " ", &Metadata::new()).unwrap();

        assert_eq!(store.get(&long_id).unwrap().content, "long id");
        assert_eq!(store.get(" ").unwrap().content, "blank id");
        assert_eq!(store.get("w").unwrap().content, " ");
        store.check_index().unwrap();
    }

    #[test]
    fn get_missing_is_not_found() {
        assert!(matches!(store().get("nope"), Err(QmdError::NotFound(_))));
    }

    #[test]
    fn delete_is_idempotent_and_cascades() {
        let store = store().with_fingerprinter(Arc::new(HashedTermFingerprinter::new(8)));
        store.upsert("a", "alpha", &Metadata::new()).unwrap();
        store.upsert("b", "beta", &Metadata::new()).unwrap();
        store
            .write(|tx| {
                tx.execute("INSERT INTO tags (id, name) VALUES ('t1', 'x')", [])?;
                tx.execute("INSERT INTO entry_tags VALUES ('a', 't1')", [])?;
                tx.execute(
                    "INSERT INTO relations (source_id, target_id) VALUES ('a', 'b'), ('b', 'a')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());

        assert!(matches!(store.get("a"), Err(QmdError::NotFound(_))));
        assert_eq!(count_rows(&store, "SELECT COUNT(*) FROM entry_tags"), 0);
        assert_eq!(count_rows(&store, "SELECT COUNT(*) FROM relations"), 0);
        assert_eq!(count_rows(&store, "SELECT COUNT(*) FROM embeddings"), 1);
        assert_eq!(count_rows(&store, "SELECT COUNT(*) FROM entries_fts"), 1);
        assert!(store.search("alpha", 10, None).unwrap().is_empty());
        store.check_index().unwrap();
    }

    #[test]
    fn timeline_is_newest_first_with_insertion_ties() {
        let store = store();
        store.upsert_at("e1", "one", &Metadata::new(), 50).unwrap();
        store.upsert_at("e2", "two", &Metadata::new(), 50).unwrap();
        store.upsert_at("e3", "three", &Metadata::new(), 50).unwrap();

        let ids: Vec<_> = store
            .list_by_time(TimeRange::default(), 2)
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["e3", "e2"]);
    }

    #[test]
    fn timeline_bounds_are_inclusive() {
        let store = store();
        for (id, ts) in [("a", 10), ("b", 20), ("c", 30), ("d", 40)] {
            store.upsert_at(id, id, &Metadata::new(), ts).unwrap();
        }

        let range = TimeRange {
            from: Some(20),
            to: Some(30),
        };
        let ids: Vec<_> = store
            .list_by_time(range, DEFAULT_TIMELINE_LIMIT)
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["c", "b"]);

        let inverted = TimeRange {
            from: Some(40),
            to: Some(10),
        };
        assert!(store.list_by_time(inverted, 10).unwrap().is_empty());
    }

    #[test]
    fn deduplicate_keeps_first_of_each_group() {
        let store = store();
        store.upsert("1", "same", &Metadata::new()).unwrap();
        store.upsert("2", "same", &Metadata::new()).unwrap();
        store.upsert("3", "diff", &Metadata::new()).unwrap();
        store.upsert("4", "same", &Metadata::new()).unwrap();

        let report = store.deduplicate().unwrap();
        assert_eq!(report, DedupeReport { groups: 1, removed: 2 });
        assert_eq!(store.entry_ids().unwrap(), vec!["1", "3"]);
        store.check_index().unwrap();

        assert_eq!(store.deduplicate().unwrap(), DedupeReport::default());
    }

    #[test]
    fn fingerprint_cached_on_write_and_refreshed() {
        let fingerprinter = Arc::new(HashedTermFingerprinter::new(16));
        let store = store().with_fingerprinter(fingerprinter.clone());
        store.upsert("a", "rust memory", &Metadata::new()).unwrap();

        let cached = store.cached_fingerprint("a", fingerprinter.model()).unwrap();
        assert_eq!(cached, Some(fingerprinter.fingerprint("rust memory")));

        let other = HashedTermFingerprinter::new(4);
        assert!(store.embed_one("a", &other).unwrap());
        assert!(!store.embed_one("missing", &other).unwrap());
        assert_eq!(
            store.cached_fingerprint("a", other.model()).unwrap().map(|v| v.len()),
            Some(4)
        );
    }

    #[test]
    fn rebuild_index_restores_coverage() {
        let store = store();
        store.upsert("a", "alpha", &Metadata::new()).unwrap();
        store
            .write(|tx| Ok(tx.execute("DELETE FROM entries_fts", [])?))
            .unwrap();
        assert!(matches!(store.check_index(), Err(QmdError::Internal(_))));

        assert_eq!(store.rebuild_index().unwrap(), 1);
        store.check_index().unwrap();
        assert_eq!(store.search("alpha", 10, None).unwrap().len(), 1);
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("memory").join("qmd.db");

        let store = Store::open(&path).unwrap();
        store.upsert("a", "persisted", &Metadata::new()).unwrap();
        drop(store);

        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.get("a").unwrap().content, "persisted");
        assert_eq!(reopened.path(), Some(path.as_path()));
    }
}
