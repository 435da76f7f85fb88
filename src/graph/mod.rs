//! Tags and typed relations between entries.
//!
//! Both are stored in the same database as the entries, so foreign keys
//! cascade cleanup when an entry is deleted.

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::entry::{Context, Entry, Tag, validate_id};
use crate::error::{QmdError, Result};
use crate::storage::{Store, entry_exists, find_entry, row_to_entry};

/// Relation type used when the caller supplies none.
pub const DEFAULT_RELATION_TYPE: &str = "related";

/// Default cap on related entries returned by a traversal.
pub const DEFAULT_RELATED_LIMIT: usize = 20;

/// Tag and relation operations over a [`Store`].
#[derive(Debug, Clone)]
pub struct Graph {
    store: Store,
}

impl Graph {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Attach `tag_name` to an entry, creating the tag if needed.
    ///
    /// Tagging twice is a no-op. Returns the tag.
    ///
    /// # Errors
    ///
    /// Returns `QmdError::NotFound` if the entry does not exist, or
    /// `QmdError::InvalidArgument` if the tag name is empty.
    pub fn tag(&self, entry_id: &str, tag_name: &str) -> Result<Tag> {
        self.tag_with_color(entry_id, tag_name, None)
    }

    /// [`Graph::tag`], giving the tag a color if it is created here or had
    /// none.
    ///
    /// # Errors
    ///
    /// Returns `QmdError::NotFound` if the entry does not exist, or
    /// `QmdError::InvalidArgument` if the tag name is empty.
    pub fn tag_with_color(
        &self,
        entry_id: &str,
        tag_name: &str,
        color: Option<&str>,
    ) -> Result<Tag> {
        validate_id(entry_id, "entry_id")?;
        let name = normalize_tag_name(tag_name)?;
        let tag = self.store.write(|tx| {
            if !entry_exists(tx, entry_id)? {
                return Err(QmdError::not_found(format!("entry '{entry_id}'")));
            }
            let tag = get_or_create_tag(tx, &name, color)?;
            tx.execute(
                "INSERT OR IGNORE INTO entry_tags (entry_id, tag_id) VALUES (?1, ?2)",
                params![entry_id, tag.id],
            )?;
            Ok(tag)
        })?;
        debug!(entry_id, tag = %tag.name, "Tagged entry");
        Ok(tag)
    }

    /// Create a tag without attaching it. An existing tag keeps its color
    /// unless it had none.
    ///
    /// # Errors
    ///
    /// Returns `QmdError::InvalidArgument` if the name is empty.
    pub fn ensure_tag(&self, tag_name: &str, color: Option<&str>) -> Result<Tag> {
        let name = normalize_tag_name(tag_name)?;
        self.store.write(|tx| get_or_create_tag(tx, &name, color))
    }

    /// Detach a tag from an entry. Returns whether a link was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn untag(&self, entry_id: &str, tag_name: &str) -> Result<bool> {
        let name = tag_name.trim();
        let removed = self.store.write(|tx| {
            Ok(tx.execute(
                "DELETE FROM entry_tags
                 WHERE entry_id = ?1
                   AND tag_id = (SELECT id FROM tags WHERE name = ?2)",
                params![entry_id, name],
            )?)
        })?;
        Ok(removed > 0)
    }

    /// Tags attached to an entry, by name. Empty if the entry is unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn tags_of(&self, entry_id: &str) -> Result<Vec<Tag>> {
        self.store.read(|conn| tags_of(conn, entry_id))
    }

    /// Every tag, by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_tags(&self) -> Result<Vec<Tag>> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare_cached("SELECT id, name, color FROM tags ORDER BY name")?;
            let rows = stmt.query_map([], row_to_tag)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Entries carrying `tag_name`, newest first. Empty for an unknown tag.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn entries_by_tag(&self, tag_name: &str, limit: usize) -> Result<Vec<Entry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.store.read(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT e.id, e.content, e.metadata, e.created_at, e.updated_at
                 FROM entries e
                 JOIN entry_tags et ON et.entry_id = e.id
                 JOIN tags t ON t.id = et.tag_id
                 WHERE t.name = ?1
                 ORDER BY e.created_at DESC, e.seq DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![tag_name.trim(), limit], row_to_entry)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Record a directed, typed edge. An empty type means
    /// [`DEFAULT_RELATION_TYPE`]. Relating the same triple twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `QmdError::NotFound` if either endpoint does not exist.
    pub fn relate(&self, source_id: &str, target_id: &str, relation_type: &str) -> Result<()> {
        validate_id(source_id, "source_id")?;
        validate_id(target_id, "target_id")?;
        let relation_type = match relation_type.trim() {
            "" => DEFAULT_RELATION_TYPE,
            other => other,
        };

        self.store.write(|tx| {
            for id in [source_id, target_id] {
                if !entry_exists(tx, id)? {
                    return Err(QmdError::not_found(format!("entry '{id}'")));
                }
            }
            tx.execute(
                "INSERT OR IGNORE INTO relations (source_id, target_id, relation_type)
                 VALUES (?1, ?2, ?3)",
                params![source_id, target_id, relation_type],
            )?;
            Ok(())
        })?;
        debug!(source_id, target_id, relation_type, "Related entries");
        Ok(())
    }

    /// Remove an edge. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn unrelate(&self, source_id: &str, target_id: &str, relation_type: &str) -> Result<bool> {
        let relation_type = match relation_type.trim() {
            "" => DEFAULT_RELATION_TYPE,
            other => other,
        };
        let removed = self.store.write(|tx| {
            Ok(tx.execute(
                "DELETE FROM relations
                 WHERE source_id = ?1 AND target_id = ?2 AND relation_type = ?3",
                params![source_id, target_id, relation_type],
            )?)
        })?;
        Ok(removed > 0)
    }

    /// Distinct targets of `entry_id`'s outgoing edges, optionally filtered
    /// by type, in the order the edges were first recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn related_to(
        &self,
        entry_id: &str,
        relation_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Entry>> {
        self.store
            .read(|conn| related_to(conn, entry_id, relation_type, limit))
    }

    /// An entry with its outgoing related entries and its tags.
    ///
    /// # Errors
    ///
    /// Returns `QmdError::NotFound` if the entry does not exist.
    pub fn context(&self, entry_id: &str) -> Result<Context> {
        self.store.read(|conn| {
            let entry = find_entry(conn, entry_id)?
                .ok_or_else(|| QmdError::not_found(format!("entry '{entry_id}'")))?;
            let related = related_to(conn, entry_id, None, DEFAULT_RELATED_LIMIT)?;
            let tags = tags_of(conn, entry_id)?;
            Ok(Context {
                entry,
                related,
                tags,
            })
        })
    }
}

fn normalize_tag_name(raw: &str) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(QmdError::invalid("tag name cannot be empty"));
    }
    Ok(name.to_string())
}

fn row_to_tag(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        name: row.get(1)?,
        color: row.get(2)?,
    })
}

fn get_or_create_tag(conn: &Connection, name: &str, color: Option<&str>) -> Result<Tag> {
    let existing = conn
        .query_row(
            "SELECT id, name, color FROM tags WHERE name = ?1",
            [name],
            row_to_tag,
        )
        .optional()?;

    if let Some(mut tag) = existing {
        if tag.color.is_none()
            && let Some(color) = color
        {
            conn.execute(
                "UPDATE tags SET color = ?1 WHERE id = ?2",
                params![color, tag.id],
            )?;
            tag.color = Some(color.to_string());
        }
        return Ok(tag);
    }

    let tag = Tag {
        id: format!("tag_{}", uuid::Uuid::new_v4().simple()),
        name: name.to_string(),
        color: color.map(str::to_string),
    };
    conn.execute(
        "INSERT INTO tags (id, name, color) VALUES (?1, ?2, ?3)",
        params![tag.id, tag.name, tag.color],
    )?;
    Ok(tag)
}

fn tags_of(conn: &Connection, entry_id: &str) -> Result<Vec<Tag>> {
    let mut stmt = conn.prepare_cached(
        "SELECT t.id, t.name, t.color FROM tags t
         JOIN entry_tags et ON et.tag_id = t.id
         WHERE et.entry_id = ?1
         ORDER BY t.name",
    )?;
    let rows = stmt.query_map([entry_id], row_to_tag)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn related_to(
    conn: &Connection,
    entry_id: &str,
    relation_type: Option<&str>,
    limit: usize,
) -> Result<Vec<Entry>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare_cached(
        "SELECT e.id, e.content, e.metadata, e.created_at, e.updated_at
         FROM relations r
         JOIN entries e ON e.id = r.target_id
         WHERE r.source_id = ?1
           AND (?2 IS NULL OR r.relation_type = ?2)
         GROUP BY e.id
         ORDER BY MIN(r.seq)
         LIMIT ?3",
    )?;
    let rows = stmt.query_map(params![entry_id, relation_type, limit], row_to_entry)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}
