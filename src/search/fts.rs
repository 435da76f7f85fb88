//! SQLite FTS5 index over entry content and metadata.
//!
//! Index rows share their rowid with the owning entry's `seq`, so every
//! write here runs inside the caller's transaction and the index can never
//! be observed out of step with the entries table.

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::error::{QmdError, Result};
use crate::rank::decode_vector;
use crate::search::Candidate;
use crate::search::query::Query;
use crate::storage::row_to_entry;

/// Rebuild the searchable representation of one entry.
///
/// Only the store calls this, after it has written the entry row in the
/// same transaction.
///
/// # Errors
///
/// Returns `QmdError::NotFound` if no entry row exists for `id`.
pub fn reindex(conn: &Connection, id: &str, content: &str, metadata_json: &str) -> Result<()> {
    let seq: i64 = conn
        .query_row("SELECT seq FROM entries WHERE id = ?1", [id], |row| row.get(0))
        .optional()?
        .ok_or_else(|| QmdError::not_found(format!("entry '{id}' is not in the store")))?;

    conn.execute("DELETE FROM entries_fts WHERE rowid = ?1", [seq])?;
    conn.execute(
        "INSERT INTO entries_fts (rowid, content, metadata) VALUES (?1, ?2, ?3)",
        params![seq, content, metadata_json],
    )?;
    Ok(())
}

/// Remove the index record for an entry sequence number.
///
/// # Errors
///
/// Returns an error if the delete fails.
pub fn remove(conn: &Connection, seq: i64) -> Result<()> {
    conn.execute("DELETE FROM entries_fts WHERE rowid = ?1", [seq])?;
    Ok(())
}

/// Drop and regenerate every index record from the entries table.
///
/// # Errors
///
/// Returns an error if the rebuild fails.
pub fn rebuild(conn: &Connection) -> Result<usize> {
    conn.execute("DELETE FROM entries_fts", [])?;
    let count = conn.execute(
        "INSERT INTO entries_fts (rowid, content, metadata)
         SELECT seq, content, COALESCE(metadata, '{}') FROM entries",
        [],
    )?;
    debug!(count, "Rebuilt full-text index");
    Ok(count)
}

/// Verify index coverage matches the live entries exactly.
///
/// # Errors
///
/// Returns `QmdError::Internal` if the index and the store diverge.
pub fn check(conn: &Connection) -> Result<()> {
    let missing: i64 = conn.query_row(
        "SELECT COUNT(*) FROM entries e
         WHERE NOT EXISTS (SELECT 1 FROM entries_fts f WHERE f.rowid = e.seq)",
        [],
        |row| row.get(0),
    )?;
    let orphaned: i64 = conn.query_row(
        "SELECT COUNT(*) FROM entries_fts f
         WHERE NOT EXISTS (SELECT 1 FROM entries e WHERE e.seq = f.rowid)",
        [],
        |row| row.get(0),
    )?;

    if missing > 0 || orphaned > 0 {
        return Err(QmdError::Internal(format!(
            "full-text index diverged from store: {missing} missing, {orphaned} orphaned"
        )));
    }
    Ok(())
}

/// Run a query against the index, best match first.
///
/// Ties in relevance are broken by the most recent `created_at`. When
/// `model` is set, each candidate carries its cached fingerprint for that
/// model if one exists.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn search(
    conn: &Connection,
    query: &str,
    limit: usize,
    model: Option<&str>,
) -> Result<Vec<Candidate>> {
    let Some(expression) = Query::parse(query).to_fts5() else {
        return Ok(vec![]);
    };
    if limit == 0 {
        return Ok(vec![]);
    }

    debug!(%expression, limit, "Running full-text query");

    // Metadata counts half as much as content toward relevance.
    let mut stmt = conn.prepare_cached(
        "SELECT e.id, e.content, e.metadata, e.created_at, e.updated_at,
                bm25(entries_fts, 1.0, 0.5) AS relevance, emb.vector
         FROM entries_fts
         JOIN entries e ON e.seq = entries_fts.rowid
         LEFT JOIN embeddings emb ON emb.entry_id = e.id AND emb.model = ?2
         WHERE entries_fts MATCH ?1
         ORDER BY relevance, e.created_at DESC, e.seq DESC
         LIMIT ?3",
    )?;

    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = stmt.query_map(params![expression, model, limit], |row| {
        let entry = row_to_entry(row)?;
        let relevance: f64 = row.get(5)?;
        let vector: Option<Vec<u8>> = row.get(6)?;
        Ok((entry, relevance, vector))
    })?;

    let mut candidates = Vec::new();
    for row in rows {
        let (entry, relevance, vector) = row?;
        #[allow(clippy::cast_possible_truncation)]
        let score = (-relevance) as f32;
        candidates.push(Candidate {
            entry,
            score,
            fingerprint: vector.as_deref().map(decode_vector),
        });
    }

    Ok(candidates)
}
