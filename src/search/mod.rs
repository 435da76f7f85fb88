//! Full-text index and search result types.

pub mod fts;
pub mod query;

use crate::entry::{Entry, ScoredEntry};

/// Default number of search results to return.
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Options for a search request.
#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    pub limit: usize,
    /// Re-rank the index's candidates by fingerprint similarity.
    pub semantic: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_SEARCH_LIMIT,
            semantic: false,
        }
    }
}

/// A hit from the index, before any re-ranking.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub entry: Entry,
    /// Index relevance, higher is better.
    pub score: f32,
    /// Cached fingerprint for the requested model, if one exists.
    pub fingerprint: Option<Vec<f32>>,
}

impl From<Candidate> for ScoredEntry {
    fn from(candidate: Candidate) -> Self {
        Self {
            entry: candidate.entry,
            score: candidate.score,
        }
    }
}
