//! Command implementations shared by the CLI, the HTTP server and MCP.
//!
//! [`Qmd`] bundles the store, the graph and the fingerprinter so every
//! gateway runs the same orchestration for search, bootstrap, dedupe and
//! reindex.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use chrono::{DateTime, NaiveDate};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{BootstrapConfig, Config, RankerConfig, resolve};
use crate::entry::{Context, Entry, MetaValue, Metadata, ScoredEntry, Tag};
use crate::error::{QmdError, Result};
use crate::graph::Graph;
use crate::rank::{FingerprintRanker, Fingerprinter, HashedTermFingerprinter, IndexOrder, Ranker};
use crate::search::SearchOptions;
use crate::storage::{BULK_LIMIT, DedupeReport, Store, TimeRange};

/// Prefix for ids of entries imported by [`Qmd::bootstrap`].
pub const BOOTSTRAP_ID_PREFIX: &str = "boot_";

/// Outcome of a bulk import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    pub imported: usize,
    /// Files that could not be read or were empty.
    pub skipped: usize,
}

/// Outcome of a reindex pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReindexReport {
    pub total: usize,
    pub embedded: usize,
}

/// Shared handle to an open qmd store. Cheap to clone.
#[derive(Clone)]
pub struct Qmd {
    store: Store,
    graph: Graph,
    fingerprinter: Arc<dyn Fingerprinter>,
    ranker: RankerConfig,
    bootstrap: BootstrapConfig,
    workspace: PathBuf,
}

impl std::fmt::Debug for Qmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Qmd")
            .field("store", &self.store)
            .field("workspace", &self.workspace)
            .finish_non_exhaustive()
    }
}

impl Qmd {
    /// Open the store configured for `workspace`, or `db` when given.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened.
    pub fn open(config: &Config, workspace: &Path, db: Option<&Path>) -> Result<Self> {
        let path = db.map_or_else(|| config.store_path(workspace), Path::to_path_buf);
        let store = Store::open(&path)?;
        Ok(Self::with_store(store, config, workspace))
    }

    /// Open a private in-memory store with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self> {
        let workspace = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Ok(Self::with_store(
            Store::open_in_memory()?,
            &Config::default(),
            &workspace,
        ))
    }

    /// Wrap an already open store.
    #[must_use]
    pub fn with_store(store: Store, config: &Config, workspace: &Path) -> Self {
        let fingerprinter: Arc<dyn Fingerprinter> =
            Arc::new(HashedTermFingerprinter::new(config.ranker.dimensions));
        let store = if config.ranker.embed_on_write {
            store.with_fingerprinter(Arc::clone(&fingerprinter))
        } else {
            store
        };

        Self {
            graph: Graph::new(store.clone()),
            store,
            fingerprinter,
            ranker: config.ranker.clone(),
            bootstrap: config.bootstrap.clone(),
            workspace: workspace.to_path_buf(),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    #[must_use]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Interval of the server's background re-embedding pass, if enabled.
    #[must_use]
    pub fn reembed_interval(&self) -> Option<Duration> {
        (self.ranker.reembed_interval_secs > 0)
            .then(|| Duration::from_secs(self.ranker.reembed_interval_secs))
    }

    /// Insert or replace an entry.
    ///
    /// # Errors
    ///
    /// Returns `QmdError::InvalidArgument` if `id` or `content` is empty.
    pub fn add(&self, id: &str, content: &str, metadata: &Metadata) -> Result<Entry> {
        self.store.upsert(id, content, metadata)
    }

    /// # Errors
    ///
    /// Returns `QmdError::NotFound` if no entry has this id.
    pub fn get(&self, id: &str) -> Result<Entry> {
        self.store.get(id)
    }

    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete(&self, id: &str) -> Result<bool> {
        self.store.delete(id)
    }

    /// Search the index, optionally re-ranking by fingerprint similarity.
    ///
    /// An empty query yields no results.
    ///
    /// # Errors
    ///
    /// Returns an error if the index query fails.
    pub fn search(&self, query: &str, options: SearchOptions) -> Result<Vec<ScoredEntry>> {
        if options.semantic {
            let ranker =
                FingerprintRanker::new(Arc::clone(&self.fingerprinter), self.ranker.pool_factor);
            self.ranked_search(&ranker, query, options.limit)
        } else {
            self.ranked_search(&IndexOrder, query, options.limit)
        }
    }

    /// Run `query` through the index and re-rank with `ranker`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index query fails.
    pub fn ranked_search(
        &self,
        ranker: &dyn Ranker,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ScoredEntry>> {
        let pool = ranker.pool_size(limit);
        let candidates = self.store.search(query, pool, ranker.model())?;
        debug!(query, pool, candidates = candidates.len(), "Re-ranking candidates");
        Ok(ranker.rerank(query, candidates, limit))
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn timeline(&self, range: TimeRange, limit: usize) -> Result<Vec<Entry>> {
        self.store.list_by_time(range, limit)
    }

    /// Every entry, newest first, up to the bulk cap.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn export(&self) -> Result<Vec<Entry>> {
        self.store.list_by_time(TimeRange::default(), BULK_LIMIT)
    }

    /// # Errors
    ///
    /// Returns `QmdError::NotFound` if the entry does not exist.
    pub fn tag(&self, entry_id: &str, tag_name: &str, color: Option<&str>) -> Result<Tag> {
        self.graph.tag_with_color(entry_id, tag_name, color)
    }

    /// # Errors
    ///
    /// Returns `QmdError::NotFound` if either entry does not exist.
    pub fn relate(&self, source_id: &str, target_id: &str, relation_type: &str) -> Result<()> {
        self.graph.relate(source_id, target_id, relation_type)
    }

    /// # Errors
    ///
    /// Returns `QmdError::NotFound` if the entry does not exist.
    pub fn context(&self, entry_id: &str) -> Result<Context> {
        self.graph.context(entry_id)
    }

    /// Import text files from `dir` (the configured bootstrap directory when
    /// `None`). Relative paths resolve against the workspace.
    ///
    /// Each file becomes entry `boot_<file stem>` with its modification time
    /// as `created_at`. Unreadable or empty files are logged and skipped.
    /// Subdirectories are not visited. Files are taken in name order, so
    /// when two files share a stem (`a.md`, `a.txt`) the first one wins and
    /// the rest are skipped.
    ///
    /// # Errors
    ///
    /// Returns `QmdError::NotFound` if the directory does not exist.
    pub fn bootstrap(&self, dir: Option<&str>) -> Result<BootstrapReport> {
        let dir = resolve(&self.workspace, dir.unwrap_or(&self.bootstrap.dir));
        if !dir.is_dir() {
            return Err(QmdError::not_found(format!(
                "bootstrap directory {}",
                dir.display()
            )));
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && self.is_importable(path))
            .collect();
        files.sort();

        let mut report = BootstrapReport::default();
        let mut seen = HashSet::new();
        for path in &files {
            let id = bootstrap_id(path);
            if !seen.insert(id.clone()) {
                warn!(path = %path.display(), id, "Skipping file with colliding id");
                report.skipped += 1;
                continue;
            }
            match self.import_file(path, &id) {
                Ok(true) => report.imported += 1,
                Ok(false) => {
                    debug!(path = %path.display(), "Skipping empty file");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping file");
                    report.skipped += 1;
                }
            }
        }

        info!(
            dir = %dir.display(),
            imported = report.imported,
            skipped = report.skipped,
            "Bootstrap complete"
        );
        Ok(report)
    }

    fn is_importable(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.bootstrap
                    .extensions
                    .iter()
                    .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
            })
    }

    /// Import one file. Returns `false` if it had no content.
    fn import_file(&self, path: &Path, id: &str) -> Result<bool> {
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(false);
        }

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), MetaValue::Text(file_name));
        metadata.insert("bootstrapped".to_string(), MetaValue::Bool(true));

        let timestamp = file_timestamp(path).unwrap_or_else(|| chrono::Utc::now().timestamp());
        self.store.upsert_at(id, &content, &metadata, timestamp)?;
        Ok(true)
    }

    /// Remove entries with duplicate content, keeping the first of each group.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub fn dedupe(&self) -> Result<DedupeReport> {
        self.store.deduplicate()
    }

    /// Rebuild the full-text index, then refresh every cached fingerprint.
    ///
    /// # Errors
    ///
    /// Returns an error if the index rebuild or an embedding write fails.
    pub fn reindex(&self) -> Result<ReindexReport> {
        let indexed = self.store.rebuild_index()?;
        let report = self.refresh_embeddings()?;
        info!(indexed, embedded = report.embedded, "Reindex complete");
        Ok(report)
    }

    /// Recompute the cached fingerprint of every entry, one entry per store
    /// lock acquisition.
    ///
    /// # Errors
    ///
    /// Returns an error if an embedding write fails.
    pub fn refresh_embeddings(&self) -> Result<ReindexReport> {
        let ids = self.store.entry_ids()?;
        let mut embedded = 0;
        for id in &ids {
            // Entries deleted since the id scan are simply not counted.
            if self.store.embed_one(id, &*self.fingerprinter)? {
                embedded += 1;
            }
        }
        Ok(ReindexReport {
            total: ids.len(),
            embedded,
        })
    }
}

fn bootstrap_id(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{BOOTSTRAP_ID_PREFIX}{stem}")
}

fn file_timestamp(path: &Path) -> Option<i64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let secs = modified.duration_since(UNIX_EPOCH).ok()?.as_secs();
    i64::try_from(secs).ok()
}

/// Parse a `key=value` metadata pair. Values are typed by
/// [`MetaValue::parse`].
///
/// # Errors
///
/// Returns `QmdError::InvalidArgument` if there is no `=` or the key is empty.
pub fn parse_meta_pair(raw: &str) -> Result<(String, MetaValue)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| QmdError::invalid(format!("metadata must be key=value, got '{raw}'")))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(QmdError::invalid(format!("metadata key is empty in '{raw}'")));
    }
    Ok((key.to_string(), MetaValue::parse(value.trim())))
}

/// Parse a timeline bound: unix seconds, `YYYY-MM-DD` or RFC 3339.
///
/// A bare date means the start of that day (UTC), or its last second when
/// `end_of_day` is set, so both bounds of a one-day range include the day.
///
/// # Errors
///
/// Returns `QmdError::InvalidArgument` if the value matches no format.
pub fn parse_time_bound(raw: &str, end_of_day: bool) -> Result<i64> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<i64>() {
        return Ok(secs);
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let time = if end_of_day {
            date.and_hms_opt(23, 59, 59)
        } else {
            date.and_hms_opt(0, 0, 0)
        };
        if let Some(time) = time {
            return Ok(time.and_utc().timestamp());
        }
    }

    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp())
        .map_err(|_| {
            QmdError::invalid(format!(
                "invalid time '{raw}': expected unix seconds, YYYY-MM-DD or RFC 3339"
            ))
        })
}

/// Parse optional timeline bounds into a [`TimeRange`].
///
/// # Errors
///
/// Returns `QmdError::InvalidArgument` if either bound is malformed.
pub fn parse_time_range(from: Option<&str>, to: Option<&str>) -> Result<TimeRange> {
    Ok(TimeRange {
        from: from.map(|raw| parse_time_bound(raw, false)).transpose()?,
        to: to.map(|raw| parse_time_bound(raw, true)).transpose()?,
    })
}
