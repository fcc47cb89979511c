//! legalbot-core - Retrieval-augmented question answering over legal documents
//!
//! Provides the components behind LegalBOT:
//! - Corpus loading (PDF, text, Markdown) and character-based chunking
//! - Embedding and generation backends behind capability traits (Ollama, local hashing)
//! - A persisted vector index served as an atomically swapped snapshot
//! - The query pipeline: embed, retrieve, assemble context, generate
//! - Configuration management
//!
//! ## Primary API
//!
//! Users should interact with the engine via [`RagEngine`]: build or load
//! the index with [`RagEngine::build_index`], then call [`RagEngine::answer`].

// Public modules
pub mod config;
pub mod provider;
pub mod rag;

// Public exports
pub use config::{Config, ConfigError, EmbeddingBackend, Similarity};
pub use rag::{
    Answer, AnswerOutcome, BuildOutcome, BuildState, BuildSummary, ConversationTurn, ErrorKind,
    QueryStage, RagEngine, RagError, Role, SourceRef,
};

// Provider exports
pub use provider::{EmbeddingProvider, GenerationProvider, ProviderError};
