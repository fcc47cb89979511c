//! Model provider abstraction layer.
//!
//! The engine reaches models only through two narrow capabilities:
//! [`EmbeddingProvider`] for text vectors and [`GenerationProvider`] for
//! prompt completion. Backends are injected as trait objects, so the Ollama
//! client, the local hashing embedder and test doubles are interchangeable.

mod types;
pub mod hashing;
pub mod ollama;

// Re-export common types
pub use types::{
    EmbedInput,
    EmbedRequest,
    EmbedResponse,
    EmbeddingProvider,
    GenerateOptions,
    GenerateRequest,
    GenerateResponse,
    GenerationProvider,
    ProviderError,
    Result,
};

// Re-export provider implementations
pub use hashing::HashingEmbedder;
pub use ollama::OllamaProvider;

use crate::config::{Config, EmbeddingBackend};
use std::sync::Arc;

/// Builds the embedding backend selected in the config.
pub fn embedding_provider_from_config(config: &Config) -> Arc<dyn EmbeddingProvider> {
    match config.embedding.backend {
        EmbeddingBackend::Ollama => Arc::new(OllamaProvider::for_embedding(config)),
        EmbeddingBackend::Hashing => Arc::new(HashingEmbedder::new(config.embedding.dimension)),
    }
}

/// Builds the generation backend from the `llm` section.
pub fn generation_provider_from_config(config: &Config) -> Arc<dyn GenerationProvider> {
    Arc::new(OllamaProvider::for_generation(config))
}
