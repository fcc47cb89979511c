//! Deterministic local embedder based on feature hashing.
//!
//! Maps lower-cased word unigrams and character trigrams into a fixed number
//! of signed buckets and L2-normalises the result. There is no model to load
//! and no I/O, which makes it suitable for offline use and for tests that
//! need reproducible vectors. Lexical overlap drives similarity, so it is a
//! much weaker retriever than a trained model.

use super::types::{EmbeddingProvider, ProviderError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Weight of a whole-word feature relative to a trigram feature.
const WORD_WEIGHT: f32 = 2.0;

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    model: String,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            model: format!("hashing-{}", dimension),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Computes the vector synchronously.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return vector;
        }

        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            self.add_feature(&mut vector, "w", &word, WORD_WEIGHT);

            let padded: Vec<char> = format!(" {} ", word).chars().collect();
            for window in padded.windows(3) {
                let trigram: String = window.iter().collect();
                self.add_feature(&mut vector, "t", &trigram, 1.0);
            }
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }

    fn add_feature(&self, vector: &mut [f32], kind: &str, feature: &str, weight: f32) {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_bytes());
        hasher.update([0u8]);
        hasher.update(feature.as_bytes());
        let digest = hasher.finalize();

        let mut bucket_bytes = [0u8; 8];
        bucket_bytes.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };

        vector[bucket] += sign * weight;
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.dimension == 0 {
            return Err(ProviderError::Other(
                "Hashing embedder configured with zero dimension".to_string(),
            ));
        }
        Ok(self.embed_text(text))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
