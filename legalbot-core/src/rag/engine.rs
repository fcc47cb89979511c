use super::builder::{self, BuildState, BuildSummary};
use super::context::{self, AssembledContext};
use super::embedder::Embedder;
use super::generator::{Generator, GeneratorError};
use super::index::VectorIndex;
use super::retriever;
use super::types::{Answer, AnswerOutcome, ConversationTurn};
use super::{QueryStage, RagError, Result};
use crate::config::Config;
use crate::provider::{self, EmbeddingProvider, GenerationProvider};
use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// An immutable, versioned view of the index.
///
/// Queries hold one snapshot for their whole duration, so a concurrent
/// rebuild never changes what a running query sees.
#[derive(Debug)]
pub struct IndexSnapshot {
    pub version: u64,
    pub index: VectorIndex,
}

/// The question-answering engine.
///
/// Owns the live index snapshot and runs builds and queries against it.
/// Model backends are injected, so tests and alternative deployments can
/// swap them without touching the pipeline.
///
/// # Thread Safety
///
/// All methods take `&self`; share the engine with `Arc<RagEngine>`.
/// Queries read the snapshot lock-free; builds are serialized and refused
/// while another one runs.
pub struct RagEngine {
    config: Arc<Config>,
    embedder: Embedder,
    generator: Generator,
    snapshot: ArcSwapOption<IndexSnapshot>,
    state: watch::Sender<BuildState>,
    build_lock: Mutex<()>,
    next_version: AtomicU64,
}

impl RagEngine {
    pub fn new(
        config: Config,
        embedding: Arc<dyn EmbeddingProvider>,
        generation: Arc<dyn GenerationProvider>,
    ) -> Self {
        let embedder = Embedder::new(embedding, Duration::from_secs(config.embedding.timeout_secs))
            .with_batching(config.embedding.batch_size, config.embedding.concurrency);
        let generator = Generator::new(
            generation,
            config.system_prompt.clone(),
            config.rag.max_history_turns,
            Duration::from_secs(config.llm.timeout_secs),
        );
        let (state, _) = watch::channel(BuildState::Empty);

        Self {
            config: Arc::new(config),
            embedder,
            generator,
            snapshot: ArcSwapOption::empty(),
            state,
            build_lock: Mutex::new(()),
            next_version: AtomicU64::new(1),
        }
    }

    /// Creates an engine with the backends selected in `config`.
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let embedding = provider::embedding_provider_from_config(&config);
        let generation = provider::generation_provider_from_config(&config);
        Ok(Self::new(config, embedding, generation))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> BuildState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<BuildState> {
        self.state.subscribe()
    }

    /// Number of chunks in the live index, zero if there is none.
    pub fn index_len(&self) -> usize {
        self.snapshot.load_full().map_or(0, |s| s.index.len())
    }

    /// Version of the live snapshot. Increases with every swap.
    pub fn index_version(&self) -> Option<u64> {
        self.snapshot.load_full().map(|s| s.version)
    }

    pub fn snapshot(&self) -> Option<Arc<IndexSnapshot>> {
        self.snapshot.load_full()
    }

    /// Makes an index available: loads the persisted one if it is valid and
    /// matches the configured embedding model, similarity and chunking,
    /// otherwise rebuilds.
    ///
    /// # Errors
    ///
    /// [`RagError::BuildInProgress`] if another build is running, and
    /// [`RagError::Chunk`] for an invalid chunk configuration. Build
    /// failures are reported in the returned summary.
    pub async fn build_index(&self) -> Result<BuildSummary> {
        self.validate_chunking()?;
        let _guard = self.build_lock.try_lock().map_err(|_| RagError::BuildInProgress)?;

        let started = Instant::now();
        let index_dir = &self.config.storage.index_dir;
        let previous = match VectorIndex::load(index_dir).await {
            Ok(index)
                if index.embedding_model() == self.embedder.model_name()
                    && index.similarity() == self.config.rag.similarity
                    && index.chunking() == (self.config.rag.chunk_size, self.config.rag.chunk_overlap) =>
            {
                info!(
                    dir = %index_dir.display(),
                    chunks = index.len(),
                    "Loaded persisted index"
                );
                let summary = BuildSummary::persisted(&index, started.elapsed());
                self.install(index);
                return Ok(summary);
            }
            Ok(index) => {
                info!(
                    persisted_model = index.embedding_model(),
                    configured_model = self.embedder.model_name(),
                    persisted_chunking = ?index.chunking(),
                    "Persisted index was built differently, rebuilding"
                );
                None
            }
            Err(e) => {
                warn!(error = %e, "No usable persisted index, rebuilding");
                None
            }
        };

        Ok(self.run_build(previous).await)
    }

    /// Rebuilds the index from the corpus, reusing vectors of unchanged chunks.
    ///
    /// On failure the previous index stays live and on disk.
    pub async fn rebuild_index(&self) -> Result<BuildSummary> {
        self.validate_chunking()?;
        let _guard = self.build_lock.try_lock().map_err(|_| RagError::BuildInProgress)?;

        let previous = match self.snapshot.load_full() {
            Some(snapshot) => Some(snapshot.index.clone()),
            None => VectorIndex::load(&self.config.storage.index_dir).await.ok(),
        };
        Ok(self.run_build(previous).await)
    }

    fn validate_chunking(&self) -> Result<()> {
        super::chunker::validate(self.config.rag.chunk_size, self.config.rag.chunk_overlap)?;
        Ok(())
    }

    async fn run_build(&self, previous: Option<VectorIndex>) -> BuildSummary {
        self.state.send_replace(BuildState::Building);

        let run = builder::build(&self.config, &self.embedder, previous.as_ref()).await;
        match run.index {
            Some(index) => {
                self.install(index);
            }
            None => {
                self.state.send_replace(BuildState::Failed);
            }
        }
        run.summary
    }

    fn install(&self, index: VectorIndex) {
        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        info!(version, chunks = index.len(), "Index snapshot is live");
        self.snapshot.store(Some(Arc::new(IndexSnapshot { version, index })));
        self.state.send_replace(BuildState::Ready);
    }

    /// Answers a question from the corpus.
    ///
    /// `history` holds the caller's prior turns, oldest first.
    pub async fn answer(&self, question: &str, history: &[ConversationTurn]) -> Result<Answer> {
        self.answer_with_cancel(question, history, &CancellationToken::new()).await
    }

    /// Like [`answer`](Self::answer), but returns [`RagError::Cancelled`] as
    /// soon as `cancel` fires while waiting on a model.
    pub async fn answer_with_cancel(
        &self,
        question: &str,
        history: &[ConversationTurn],
        cancel: &CancellationToken,
    ) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::EmptyQuestion);
        }
        let snapshot = self.snapshot.load_full().ok_or(RagError::IndexNotReady)?;
        let rag = &self.config.rag;

        let query_vector = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RagError::Cancelled),
            result = self.embedder.embed(question) => {
                result.map_err(|e| RagError::query(QueryStage::Embed, e))?
            }
        };

        let results = retriever::retrieve(&snapshot.index, &query_vector, rag.top_k, rag.min_score)
            .map_err(|e| RagError::query(QueryStage::Retrieve, e))?;

        let context = context::assemble(&results, rag.max_context_chars);
        debug!(
            version = snapshot.version,
            retrieved = results.len(),
            used = context.sources.len(),
            "Assembled context"
        );

        if !context.has_context() {
            if let Some(reply) = &rag.no_context_reply {
                info!("No relevant context, returning configured reply");
                return Ok(Answer {
                    text: reply.clone(),
                    sources: Vec::new(),
                    outcome: AnswerOutcome::NoRelevantContext,
                });
            }
        }

        let text = self.generate_with_retry(question, &context, history, cancel).await?;

        let outcome = if context.has_context() {
            AnswerOutcome::Grounded
        } else {
            AnswerOutcome::NoRelevantContext
        };
        info!(sources = context.sources.len(), ?outcome, "Answered question");

        Ok(Answer {
            text,
            sources: context.sources,
            outcome,
        })
    }

    /// A timed-out generation is retried once after the configured backoff.
    async fn generate_with_retry(
        &self,
        question: &str,
        context: &AssembledContext,
        history: &[ConversationTurn],
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut retried = false;
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RagError::Cancelled),
                result = self.generator.generate(question, context, history) => result,
            };

            match result {
                Ok(text) => return Ok(text),
                Err(GeneratorError::Timeout(after)) if !retried => {
                    retried = true;
                    let backoff = Duration::from_millis(self.config.rag.retry_backoff_ms);
                    warn!(?after, ?backoff, "Generation timed out, retrying once");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(RagError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(e) => return Err(RagError::query(QueryStage::Generate, e)),
            }
        }
    }
}
