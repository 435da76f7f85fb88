//! Deterministic text fingerprints and the similarity ranker built on them.

use sha2::{Digest, Sha256};

use crate::entry::ScoredEntry;
use crate::rank::{Ranker, cosine_similarity};
use crate::search::Candidate;
use crate::search::query::tokenize;

/// Default fingerprint dimensionality.
pub const DEFAULT_DIMENSIONS: usize = 256;

/// Default candidate over-fetch factor for similarity re-ranking.
pub const DEFAULT_POOL_FACTOR: usize = 3;

/// Produces a fixed-length vector for a piece of text.
///
/// Implementations must be deterministic: the same text always yields the
/// same vector, so cached fingerprints stay valid and results reproducible.
pub trait Fingerprinter: Send + Sync {
    /// Identifier stored alongside cached vectors.
    fn model(&self) -> &str;

    fn dimensions(&self) -> usize;

    fn fingerprint(&self, text: &str) -> Vec<f32>;
}

/// Feature-hashing fingerprint: each token is hashed into a bucket with a
/// sign, and the result is L2-normalized.
#[derive(Debug, Clone)]
pub struct HashedTermFingerprinter {
    dimensions: usize,
    model: String,
}

impl HashedTermFingerprinter {
    /// Create a fingerprinter. A dimensionality of zero is raised to one.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            model: format!("hashed-terms-{dimensions}"),
        }
    }
}

impl Default for HashedTermFingerprinter {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

impl Fingerprinter for HashedTermFingerprinter {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn fingerprint(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimensions];

        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut head = [0_u8; 8];
            head.copy_from_slice(&digest[..8]);
            let hash = u64::from_le_bytes(head);

            #[allow(clippy::cast_possible_truncation)]
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 1 { -1.0 } else { 1.0 };
            vector[bucket] += sign;
        }

        let magnitude = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for v in &mut vector {
                *v /= magnitude;
            }
        }
        vector
    }
}

/// Re-ranks an over-fetched candidate pool by fingerprint cosine similarity.
#[derive(Debug, Clone)]
pub struct FingerprintRanker<F> {
    fingerprinter: F,
    pool_factor: usize,
}

impl<F: Fingerprinter> FingerprintRanker<F> {
    #[must_use]
    pub fn new(fingerprinter: F, pool_factor: usize) -> Self {
        Self {
            fingerprinter,
            pool_factor: pool_factor.max(1),
        }
    }

    /// Similarity of `entry_text` to `query`; higher is more relevant.
    #[must_use]
    pub fn score(&self, query: &str, entry_text: &str) -> f32 {
        cosine_similarity(
            &self.fingerprinter.fingerprint(query),
            &self.fingerprinter.fingerprint(entry_text),
        )
    }
}

impl<F: Fingerprinter> Ranker for FingerprintRanker<F> {
    fn pool_size(&self, limit: usize) -> usize {
        limit.saturating_mul(self.pool_factor)
    }

    fn model(&self) -> Option<&str> {
        Some(self.fingerprinter.model())
    }

    fn rerank(&self, query: &str, candidates: Vec<Candidate>, limit: usize) -> Vec<ScoredEntry> {
        let query_vector = self.fingerprinter.fingerprint(query);
        let dimensions = self.fingerprinter.dimensions();

        let mut scored: Vec<ScoredEntry> = candidates
            .into_iter()
            .map(|candidate| {
                let vector = match candidate.fingerprint {
                    Some(cached) if cached.len() == dimensions => cached,
                    _ => self.fingerprinter.fingerprint(&candidate.entry.content),
                };
                ScoredEntry {
                    score: cosine_similarity(&query_vector, &vector),
                    entry: candidate.entry,
                }
            })
            .collect();

        // Stable sort: equal scores keep index order.
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);
        scored
    }
}

impl<F: Fingerprinter + ?Sized> Fingerprinter for std::sync::Arc<F> {
    fn model(&self) -> &str {
        (**self).model()
    }

    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    fn fingerprint(&self, text: &str) -> Vec<f32> {
        (**self).fingerprint(text)
    }
}
