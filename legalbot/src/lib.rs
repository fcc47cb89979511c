//! legalbot - Ask questions about a corpus of legal documents
//!
//! This is the convenience wrapper crate that re-exports the engine from
//! `legalbot-core`.
//!
//! # Quick Start
//!
//! ```no_run
//! use legalbot::prelude::*;
//!
//! # async fn example() -> Result<(), RagError> {
//! let engine = RagEngine::from_config(Config::load_or_default())?;
//! engine.build_index().await?;
//! let answer = engine.answer("What are the grounds for divorce?", &[]).await?;
//! println!("{}", answer.text);
//! # Ok(())
//! # }
//! ```

// Re-export core
pub use legalbot_core::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use legalbot_core::provider::{HashingEmbedder, OllamaProvider};
    pub use legalbot_core::{
        Answer, AnswerOutcome, Config, ConversationTurn, EmbeddingProvider, GenerationProvider,
        RagEngine, RagError,
    };
}
