//! Top-k retrieval with a relevance floor.

use super::index::{Result, VectorIndex};
use super::types::RetrievalResult;
use tracing::debug;

/// Returns up to `k` chunks scoring at least `min_score`, best first.
///
/// An empty result means nothing in the corpus is relevant enough; it is
/// not an error.
pub fn retrieve(
    index: &VectorIndex,
    query_vector: &[f32],
    k: usize,
    min_score: f32,
) -> Result<Vec<RetrievalResult>> {
    let candidates = index.search(query_vector, k)?;
    let total = candidates.len();

    let results: Vec<RetrievalResult> = candidates
        .into_iter()
        .filter(|r| r.score >= min_score)
        .collect();

    debug!(
        candidates = total,
        kept = results.len(),
        min_score,
        top_score = results.first().map(|r| r.score),
        "Retrieved chunks"
    );
    Ok(results)
}
