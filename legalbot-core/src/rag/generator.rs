//! Prompt construction and answer generation.

use super::context::AssembledContext;
use super::types::ConversationTurn;
use crate::provider::{GenerationProvider, ProviderError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("Generation unavailable: {0}")]
    Unavailable(#[from] ProviderError),

    #[error("Model returned an empty answer")]
    EmptyResponse,

    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, GeneratorError>;

const NO_CONTEXT_INSTRUCTION: &str = "No passage in the legal document corpus is relevant to this \
question. Tell the user that the available documents do not cover it. Do not answer from general \
knowledge and do not invent citations.";

/// Produces answers from a question, its context and prior turns.
#[derive(Clone)]
pub struct Generator {
    provider: Arc<dyn GenerationProvider>,
    system_prompt: String,
    max_history_turns: usize,
    timeout: Duration,
}

impl Generator {
    pub fn new(
        provider: Arc<dyn GenerationProvider>,
        system_prompt: impl Into<String>,
        max_history_turns: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            system_prompt: system_prompt.into(),
            max_history_turns,
            timeout,
        }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Builds the full prompt. Same inputs always give the same prompt.
    ///
    /// Only the last `max_history_turns` turns are included.
    pub fn build_prompt(&self, question: &str, context: &AssembledContext, history: &[ConversationTurn]) -> String {
        let mut prompt = String::new();
        prompt.push_str(self.system_prompt.trim());
        prompt.push_str("\n\n");

        let skip = history.len().saturating_sub(self.max_history_turns);
        let recent = &history[skip..];
        if !recent.is_empty() {
            prompt.push_str("Conversation so far:\n");
            for turn in recent {
                prompt.push_str(turn.role.label());
                prompt.push_str(": ");
                prompt.push_str(turn.text.trim());
                prompt.push('\n');
            }
            prompt.push('\n');
        }

        if context.has_context() {
            prompt.push_str("Excerpts from the legal document corpus:\n\n");
            prompt.push_str(&context.text);
            prompt.push_str("\n\nAnswer using only these excerpts and cite the sources you use.\n\n");
        } else {
            prompt.push_str(&context.text);
            prompt.push('\n');
            prompt.push_str(NO_CONTEXT_INSTRUCTION);
            prompt.push_str("\n\n");
        }

        prompt.push_str("Question: ");
        prompt.push_str(question.trim());
        prompt.push_str("\nAnswer:");
        prompt
    }

    /// Generates an answer within the configured deadline.
    ///
    /// # Errors
    ///
    /// - [`GeneratorError::Unavailable`] if the backend cannot be reached
    /// - [`GeneratorError::EmptyResponse`] if the model produced no text
    /// - [`GeneratorError::Timeout`] if no answer arrived in time
    pub async fn generate(
        &self,
        question: &str,
        context: &AssembledContext,
        history: &[ConversationTurn],
    ) -> Result<String> {
        let prompt = self.build_prompt(question, context, history);
        debug!(
            model = self.model_name(),
            prompt_chars = prompt.len(),
            grounded = context.has_context(),
            "Generating answer"
        );

        let text = tokio::time::timeout(self.timeout, self.provider.generate(&prompt))
            .await
            .map_err(|_| GeneratorError::Timeout(self.timeout))??;

        let text = text.trim();
        if text.is_empty() {
            return Err(GeneratorError::EmptyResponse);
        }
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::context::{assemble, NO_CONTEXT_MARKER};
    use crate::rag::types::{ChunkPayload, RetrievalResult};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Records the last prompt and replies with a fixed text.
    struct RecordingProvider {
        reply: String,
        last_prompt: Mutex<Option<String>>,
    }

    impl RecordingProvider {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                last_prompt: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl GenerationProvider for RecordingProvider {
        async fn generate(&self, prompt: &str) -> crate::provider::Result<String> {
            *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
            Ok(self.reply.clone())
        }

        fn model_name(&self) -> &str {
            "recording"
        }
    }

    struct HangingProvider;

    #[async_trait]
    impl GenerationProvider for HangingProvider {
        async fn generate(&self, _prompt: &str) -> crate::provider::Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("late".to_string())
        }

        fn model_name(&self) -> &str {
            "hanging"
        }
    }

    fn generator(provider: Arc<dyn GenerationProvider>, max_history_turns: usize) -> Generator {
        Generator::new(provider, "You are a legal assistant.", max_history_turns, Duration::from_secs(5))
    }

    fn context_with(text: &str) -> AssembledContext {
        let result = RetrievalResult {
            chunk_id: "hma.txt#000000-abcdef".to_string(),
            payload: ChunkPayload {
                document_id: "hma.txt".to_string(),
                source_path: PathBuf::from("hma.txt"),
                sequence_index: 0,
                page: 1,
                char_start: 0,
                char_end: text.chars().count(),
                text: text.to_string(),
            },
            score: 0.9,
        };
        assemble(&[result], 10_000)
    }

    #[test]
    fn test_prompt_contains_context_and_question() {
        let g = generator(Arc::new(RecordingProvider::new("ok")), 6);
        let prompt = g.build_prompt("What is Section 13?", &context_with("Section 13 text"), &[]);

        assert!(prompt.starts_with("You are a legal assistant."));
        assert!(prompt.contains("[Source: hma.txt, page 1]\nSection 13 text"));
        assert!(prompt.ends_with("Question: What is Section 13?\nAnswer:"));
        assert!(!prompt.contains("Conversation so far"));
    }

    #[test]
    fn test_prompt_without_context_instructs_refusal() {
        let g = generator(Arc::new(RecordingProvider::new("ok")), 6);
        let prompt = g.build_prompt("Anything?", &AssembledContext::empty(), &[]);
        assert!(prompt.contains(NO_CONTEXT_MARKER));
        assert!(prompt.contains("do not cover it"));
    }

    #[test]
    fn test_history_is_bounded_oldest_dropped() {
        let g = generator(Arc::new(RecordingProvider::new("ok")), 2);
        let history = vec![
            ConversationTurn::user("first question"),
            ConversationTurn::assistant("first answer"),
            ConversationTurn::user("second question"),
        ];
        let prompt = g.build_prompt("third", &AssembledContext::empty(), &history);

        assert!(!prompt.contains("first question"));
        assert!(prompt.contains("Assistant: first answer\nUser: second question\n"));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let g = generator(Arc::new(RecordingProvider::new("ok")), 6);
        let ctx = context_with("text");
        assert_eq!(g.build_prompt("q", &ctx, &[]), g.build_prompt("q", &ctx, &[]));
    }

    #[tokio::test]
    async fn test_generate_passes_prompt_and_trims() {
        let provider = Arc::new(RecordingProvider::new("  Divorce is possible.\n"));
        let g = generator(provider.clone(), 6);
        let answer = g.generate("q", &context_with("ctx"), &[]).await.unwrap();

        assert_eq!(answer, "Divorce is possible.");
        let prompt = provider.last_prompt.lock().unwrap().clone().unwrap();
        assert!(prompt.contains("ctx"));
    }

    #[tokio::test]
    async fn test_empty_answer_is_error() {
        let g = generator(Arc::new(RecordingProvider::new("   ")), 6);
        let result = g.generate("q", &context_with("ctx"), &[]).await;
        assert!(matches!(result, Err(GeneratorError::EmptyResponse)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_timeout() {
        let g = Generator::new(Arc::new(HangingProvider), "sys", 6, Duration::from_secs(1));
        let result = g.generate("q", &context_with("ctx"), &[]).await;
        assert!(matches!(result, Err(GeneratorError::Timeout(_))));
    }
}
