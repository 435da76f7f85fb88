//! Pluggable re-ranking of index candidates.
//!
//! The index returns candidates in BM25 order. A [`Ranker`] may ask for a
//! larger pool than the caller's limit and reorder it by its own score.

pub mod fingerprint;

use crate::entry::ScoredEntry;
use crate::search::Candidate;

pub use fingerprint::{FingerprintRanker, Fingerprinter, HashedTermFingerprinter};

/// Strategy for ordering search candidates.
pub trait Ranker: Send + Sync {
    /// How many index candidates to fetch for `limit` results.
    fn pool_size(&self, limit: usize) -> usize {
        limit
    }

    /// Fingerprint model whose cached vectors the candidates should carry.
    fn model(&self) -> Option<&str> {
        None
    }

    /// Order `candidates` best first and keep at most `limit`.
    fn rerank(&self, query: &str, candidates: Vec<Candidate>, limit: usize) -> Vec<ScoredEntry>;
}

/// Default ranker: keep the index's relevance order.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexOrder;

impl Ranker for IndexOrder {
    fn rerank(&self, _query: &str, candidates: Vec<Candidate>, limit: usize) -> Vec<ScoredEntry> {
        candidates
            .into_iter()
            .take(limit)
            .map(ScoredEntry::from)
            .collect()
    }
}

/// Cosine similarity of two vectors.
///
/// Defined as 0 when either vector has zero magnitude or the lengths differ.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Encode a vector as little-endian `f32` bytes for blob storage.
#[must_use]
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a blob written by [`encode_vector`]. Trailing partial values are
/// ignored.
#[must_use]
pub fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Entry, Metadata};

    pub(crate) fn candidate(id: &str, content: &str, score: f32) -> Candidate {
        Candidate {
            entry: Entry {
                id: id.to_string(),
                content: content.to_string(),
                metadata: Metadata::new(),
                created_at: 0,
                updated_at: 0,
            },
            score,
            fingerprint: None,
        }
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = [0.3, 0.4, 0.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_with_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn cosine_with_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn vector_blob_round_trip() {
        let v = vec![1.5_f32, -0.25, 0.0];
        assert_eq!(decode_vector(&encode_vector(&v)), v);
        assert!(decode_vector(&[1, 2, 3]).is_empty());
    }

    #[test]
    fn index_order_keeps_order_and_limit() {
        let ranked = IndexOrder.rerank(
            "q",
            vec![candidate("a", "x", 3.0), candidate("b", "y", 2.0), candidate("c", "z", 1.0)],
            2,
        );
        let ids: Vec<_> = ranked.iter().map(|hit| hit.entry.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(IndexOrder.pool_size(5), 5);
    }
}
