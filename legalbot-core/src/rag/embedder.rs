//! Embedding generation through an injected [`EmbeddingProvider`].
//!
//! The embedder adds what the raw capability deliberately leaves out: a
//! per-request deadline, batching, bounded concurrency during index builds,
//! and consistency checks on what the backend returns.

use crate::provider::{EmbeddingProvider, ProviderError};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during embedding generation.
#[derive(Debug, Error)]
pub enum EmbedderError {
    /// The backend could not be reached or the model could not be loaded.
    #[error("Embedding unavailable: {0}")]
    Unavailable(#[from] ProviderError),

    /// The backend did not answer within the configured deadline.
    #[error("Embedding request timed out after {0:?}")]
    Timeout(Duration),

    /// The API response contained fewer or more vectors than requested.
    #[error("Expected {expected} embeddings, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    /// Vectors of one model must all have the same length.
    #[error("Inconsistent embedding dimension: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The backend returned an empty vector.
    #[error("No embeddings returned")]
    NoEmbeddings,
}

/// Result type for embedding operations.
pub type Result<T> = std::result::Result<T, EmbedderError>;

/// Generates vector embeddings for text using the configured provider.
///
/// Cheap to clone; clones share the provider.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    timeout: Duration,
    batch_size: usize,
    concurrency: usize,
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            batch_size: 32,
            concurrency: 1,
        }
    }

    /// Sets how many texts go into one provider call and how many calls may
    /// be in flight at once. Zero is treated as one.
    pub fn with_batching(mut self, batch_size: usize, concurrency: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Generates a vector embedding for the given text.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The backend is unreachable or the model is not available
    /// - No response arrives before the deadline
    /// - The backend returns an empty vector
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vector = tokio::time::timeout(self.timeout, self.provider.embed(text))
            .await
            .map_err(|_| EmbedderError::Timeout(self.timeout))??;

        if vector.is_empty() {
            return Err(EmbedderError::NoEmbeddings);
        }
        Ok(vector)
    }

    /// Embeds many texts, returning vectors in input order.
    ///
    /// Texts are split into batches; up to `concurrency` batches run at once
    /// and their results are re-joined in order, so the output never depends
    /// on scheduling.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let pending: Vec<_> = texts
            .chunks(self.batch_size)
            .map(|batch| self.embed_one_batch(batch))
            .collect();

        let batches: Vec<Vec<Vec<f32>>> = stream::iter(pending)
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let vectors: Vec<Vec<f32>> = batches.into_iter().flatten().collect();

        let expected = vectors[0].len();
        if expected == 0 {
            return Err(EmbedderError::NoEmbeddings);
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(EmbedderError::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }

        Ok(vectors)
    }

    async fn embed_one_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        debug!(size = batch.len(), "Embedding batch");
        let vectors = tokio::time::timeout(self.timeout, self.provider.embed_batch(batch))
            .await
            .map_err(|_| EmbedderError::Timeout(self.timeout))??;

        if vectors.len() != batch.len() {
            return Err(EmbedderError::CountMismatch {
                expected: batch.len(),
                actual: vectors.len(),
            });
        }
        Ok(vectors)
    }
}
