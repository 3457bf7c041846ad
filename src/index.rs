use crate::types::SimilarityHit;

/// How many hits a search keeps.
pub const DEFAULT_TOP_K: usize = 5;

/// Cosine similarity: dot product over the product of Euclidean norms.
/// Returns `None` for mismatched or empty inputs, zero-norm vectors, and
/// non-finite results, so degenerate vectors never reach a ranking.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }
    let mut dot = 0.0f32;
    let mut a_norm = 0.0f32;
    let mut b_norm = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        a_norm += x * x;
        b_norm += y * y;
    }
    let denom = a_norm.sqrt() * b_norm.sqrt();
    if denom == 0.0 {
        return None;
    }
    let score = dot / denom;
    score.is_finite().then_some(score)
}

/// Sort descending by score and keep at most `k`. The sort is stable, so
/// equal scores keep their input order.
pub fn top_k(mut hits: Vec<SimilarityHit>, k: usize) -> Vec<SimilarityHit> {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(k);
    hits
}

/// Corpus vectors precomputed for one runtime load.
#[derive(Debug, Clone, Default)]
pub struct CorpusIndex {
    entries: Vec<(String, Vec<f32>)>,
}

impl CorpusIndex {
    /// Build an index from `(id, embedding)` pairs.
    pub fn new(entries: Vec<(String, Vec<f32>)>) -> Self {
        Self { entries }
    }

    /// Rank every corpus entry against `query`, skipping degenerate pairs.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SimilarityHit> {
        let hits = self
            .entries
            .iter()
            .filter_map(|(id, vector)| {
                cosine_similarity(query, vector).map(|score| SimilarityHit {
                    id: id.clone(),
                    score,
                })
            })
            .collect();
        top_k(hits, k)
    }

    /// Number of indexed entries, including ones with degenerate vectors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
