//! Retrieval Augmented Generation (RAG) over a legal document corpus.
//!
//! # Overview
//!
//! Answers are grounded in the corpus rather than in the model's own
//! knowledge:
//! 1. **Retrieval**: the question is embedded and the closest chunks are found
//! 2. **Augmentation**: those chunks, tagged with their source and page, form the context
//! 3. **Generation**: the model answers from that context only
//!
//! # Architecture
//!
//! - [`RagEngine`]: owns the live index and runs builds and queries
//! - [`loader`]: corpus discovery and text extraction
//! - [`chunker`]: overlapping, provenance-tagged chunks
//! - [`embedder`]: timeouts, batching and checks around an [`EmbeddingProvider`](crate::provider::EmbeddingProvider)
//! - [`index`]: vector index with atomic persistence
//! - [`retriever`], [`context`], [`generator`]: the query pipeline
//! - [`builder`]: the index build pipeline
//!
//! # How It Works
//!
//! 1. **Indexing Phase**:
//!    - Documents are split into chunks (default: 1000 characters with 200 overlap)
//!    - Each chunk is converted to a vector embedding
//!    - A new index is saved to disk, then swapped in as the live snapshot
//!
//! 2. **Query Phase**:
//!    - The question is embedded with the same model
//!    - The top-k chunks above `min_score` are retrieved
//!    - The context is assembled within a character budget
//!    - The model answers, with prior turns as conversation history

pub mod builder;
pub mod chunker;
pub mod context;
pub mod embedder;
mod engine;
pub mod generator;
pub mod index;
pub mod loader;
pub mod retriever;
mod types;

pub use builder::{BuildOutcome, BuildStage, BuildState, BuildSummary, DocumentFailure};
pub use context::{AssembledContext, NO_CONTEXT_MARKER};
pub use embedder::Embedder;
pub use engine::{IndexSnapshot, RagEngine};
pub use generator::Generator;
pub use index::{IndexEntry, Manifest, VectorIndex};
pub use types::{
    Answer, AnswerOutcome, Chunk, ChunkPayload, ConversationTurn, Document, PageSpan,
    RetrievalResult, Role, SourceRef,
};

use crate::config::ConfigError;
use chunker::ChunkError;
use embedder::EmbedderError;
use generator::GeneratorError;
use index::IndexError;
use loader::LoaderError;
use std::fmt;
use thiserror::Error;

/// Message shown to users when a model backend is down or slow.
pub const SERVICE_UNAVAILABLE_MESSAGE: &str = "The service is temporarily unavailable. Please try again shortly.";

#[derive(Debug, Error)]
pub enum RagError {
    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error("Embedder error: {0}")]
    Embedder(#[from] EmbedderError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Generator error: {0}")]
    Generator(#[from] GeneratorError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// A query failed at the given stage.
    #[error("Query failed at {stage} stage: {source}")]
    Query {
        stage: QueryStage,
        source: Box<RagError>,
    },

    #[error("Question is empty")]
    EmptyQuestion,

    #[error("No index is loaded; build the index first")]
    IndexNotReady,

    #[error("An index build is already in progress")]
    BuildInProgress,

    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, RagError>;

/// Step of the query pipeline that can fail. Context assembly is infallible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    Embed,
    Retrieve,
    Generate,
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryStage::Embed => "embed",
            QueryStage::Retrieve => "retrieve",
            QueryStage::Generate => "generate",
        };
        f.write_str(name)
    }
}

/// Coarse classification of a [`RagError`], for callers that decide what
/// to show or whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnreadableDocument,
    InvalidChunkConfig,
    EmbeddingUnavailable,
    GenerationUnavailable,
    GenerationTimeout,
    IndexCorrupt,
    Cancelled,
    InvalidInput,
    Io,
    Config,
    Other,
}

impl RagError {
    pub(crate) fn query(stage: QueryStage, source: impl Into<RagError>) -> Self {
        RagError::Query {
            stage,
            source: Box::new(source.into()),
        }
    }

    /// Pipeline stage of a query error.
    pub fn stage(&self) -> Option<QueryStage> {
        match self {
            RagError::Query { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RagError::Loader(LoaderError::UnreadableDocument { .. }) => ErrorKind::UnreadableDocument,
            RagError::Loader(LoaderError::Io(_)) => ErrorKind::Io,
            RagError::Chunk(_) => ErrorKind::InvalidChunkConfig,
            RagError::Embedder(_) => ErrorKind::EmbeddingUnavailable,
            RagError::Index(IndexError::Corrupt { .. }) => ErrorKind::IndexCorrupt,
            RagError::Index(IndexError::Io(_)) => ErrorKind::Io,
            RagError::Index(_) => ErrorKind::Other,
            RagError::Generator(GeneratorError::Timeout(_)) => ErrorKind::GenerationTimeout,
            RagError::Generator(_) => ErrorKind::GenerationUnavailable,
            RagError::Config(_) => ErrorKind::Config,
            RagError::Query { source, .. } => source.kind(),
            RagError::EmptyQuestion | RagError::IndexNotReady => ErrorKind::InvalidInput,
            RagError::BuildInProgress => ErrorKind::Other,
            RagError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Short text suitable for showing to an end user.
    pub fn user_message(&self) -> &'static str {
        match self.kind() {
            ErrorKind::EmbeddingUnavailable
            | ErrorKind::GenerationUnavailable
            | ErrorKind::GenerationTimeout => SERVICE_UNAVAILABLE_MESSAGE,
            ErrorKind::InvalidInput if matches!(self, RagError::IndexNotReady) => {
                "The document index is not ready yet. Please build it first."
            }
            ErrorKind::InvalidInput => "Please enter a question.",
            ErrorKind::IndexCorrupt => "The document index is damaged and must be rebuilt.",
            ErrorKind::InvalidChunkConfig | ErrorKind::Config => {
                "The assistant is misconfigured. Please contact the administrator."
            }
            ErrorKind::Cancelled => "The request was cancelled.",
            _ => "Something went wrong while answering. Please try again.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderError;
    use std::time::Duration;

    #[test]
    fn test_query_error_keeps_stage_and_kind() {
        let err = RagError::query(
            QueryStage::Generate,
            GeneratorError::Timeout(Duration::from_secs(1)),
        );
        assert_eq!(err.stage(), Some(QueryStage::Generate));
        assert_eq!(err.kind(), ErrorKind::GenerationTimeout);
        assert!(err.to_string().contains("generate"));
    }

    #[test]
    fn test_unavailable_user_message() {
        let err = RagError::query(
            QueryStage::Embed,
            EmbedderError::Unavailable(ProviderError::Api("model not found".to_string())),
        );
        assert_eq!(err.kind(), ErrorKind::EmbeddingUnavailable);
        assert_eq!(err.user_message(), SERVICE_UNAVAILABLE_MESSAGE);
    }

    #[test]
    fn test_input_errors() {
        assert_eq!(RagError::EmptyQuestion.kind(), ErrorKind::InvalidInput);
        assert_ne!(
            RagError::EmptyQuestion.user_message(),
            RagError::IndexNotReady.user_message()
        );
        assert_eq!(RagError::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_query_stage_names() {
        let names: Vec<String> = [QueryStage::Embed, QueryStage::Retrieve, QueryStage::Generate]
            .iter()
            .map(|stage| stage.to_string())
            .collect();
        assert_eq!(names, ["embed", "retrieve", "generate"]);
    }

    #[test]
    fn test_chunk_error_kind() {
        let err: RagError = chunker::validate(10, 10).unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::InvalidChunkConfig);
    }
}
