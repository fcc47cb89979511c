//! Index building: load, chunk, embed, upsert, persist.
//!
//! A build always produces a brand-new [`VectorIndex`] from the current
//! corpus. Vectors of unchanged chunks can be carried over from the previous
//! index when it was built with the same embedding model and similarity.
//! Nothing here touches the live index; the engine swaps it in only after a
//! successful save.

use super::chunker;
use super::embedder::Embedder;
use super::index::VectorIndex;
use super::loader::{self, LoaderError};
use super::types::Chunk;
use crate::config::Config;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Lifecycle of the engine's index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildState {
    /// No index has been built or loaded yet.
    Empty,
    Building,
    Ready,
    /// The last build failed. A previously ready index, if any, is still served.
    Failed,
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildState::Empty => "empty",
            BuildState::Building => "building",
            BuildState::Ready => "ready",
            BuildState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Step of a build that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStage {
    Load,
    Embed,
    Index,
    Persist,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildStage::Load => "load",
            BuildStage::Embed => "embed",
            BuildStage::Index => "index",
            BuildStage::Persist => "persist",
        };
        f.write_str(name)
    }
}

/// A corpus file that was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentFailure {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BuildOutcome {
    Ready,
    Failed { stage: BuildStage, reason: String },
}

/// What a build (or an index load) did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildSummary {
    pub documents_loaded: usize,
    pub documents_indexed: usize,
    pub chunks_indexed: usize,
    /// Chunks whose vectors came from the previous index instead of the embedder.
    pub chunks_reused: usize,
    pub failures: Vec<DocumentFailure>,
    pub outcome: BuildOutcome,
    /// True when a valid persisted index was loaded and no build ran.
    pub from_persisted: bool,
    pub elapsed: Duration,
}

impl BuildSummary {
    pub fn is_ready(&self) -> bool {
        self.outcome == BuildOutcome::Ready
    }

    pub(crate) fn persisted(index: &VectorIndex, elapsed: Duration) -> Self {
        Self {
            documents_loaded: 0,
            documents_indexed: 0,
            chunks_indexed: index.len(),
            chunks_reused: index.len(),
            failures: Vec::new(),
            outcome: BuildOutcome::Ready,
            from_persisted: true,
            elapsed,
        }
    }

    fn started() -> Self {
        Self {
            documents_loaded: 0,
            documents_indexed: 0,
            chunks_indexed: 0,
            chunks_reused: 0,
            failures: Vec::new(),
            outcome: BuildOutcome::Ready,
            from_persisted: false,
            elapsed: Duration::ZERO,
        }
    }
}

/// Result of one build run. `index` is set only when the build succeeded.
pub(crate) struct BuildRun {
    pub index: Option<VectorIndex>,
    pub summary: BuildSummary,
}

/// Builds and persists a fresh index from the configured corpus.
pub(crate) async fn build(config: &Config, embedder: &Embedder, previous: Option<&VectorIndex>) -> BuildRun {
    let started = Instant::now();
    let mut summary = BuildSummary::started();

    let fail = |mut summary: BuildSummary, stage: BuildStage, reason: String| {
        warn!(%stage, %reason, "Index build failed");
        summary.outcome = BuildOutcome::Failed { stage, reason };
        summary.elapsed = started.elapsed();
        BuildRun { index: None, summary }
    };

    let data_dir = &config.corpus.data_dir;
    info!(corpus = %data_dir.display(), "Building index");

    let report = match loader::load(data_dir, &config.corpus).await {
        Ok(report) => report,
        Err(e) => return fail(summary, BuildStage::Load, e.to_string()),
    };
    summary.documents_loaded = report.documents.len();
    summary.failures = report
        .failures
        .into_iter()
        .map(|failure| match failure {
            LoaderError::UnreadableDocument { path, reason } => DocumentFailure { path, reason },
            LoaderError::Io(e) => DocumentFailure {
                path: data_dir.clone(),
                reason: e.to_string(),
            },
        })
        .collect();

    let mut chunks: Vec<Chunk> = Vec::new();
    for document in &report.documents {
        match chunker::chunk(document, config.rag.chunk_size, config.rag.chunk_overlap) {
            Ok(doc_chunks) if !doc_chunks.is_empty() => {
                debug!(document = %document.id, chunks = doc_chunks.len(), "Chunked document");
                summary.documents_indexed += 1;
                chunks.extend(doc_chunks);
            }
            Ok(_) => {}
            Err(e) => return fail(summary, BuildStage::Load, e.to_string()),
        }
    }

    let reusable = previous.filter(|prev| {
        prev.embedding_model() == embedder.model_name() && prev.similarity() == config.rag.similarity
    });

    let mut vectors: Vec<Option<Vec<f32>>> = chunks
        .iter()
        .map(|chunk| reusable.and_then(|prev| prev.get(&chunk.id)).map(|entry| entry.vector.clone()))
        .collect();
    summary.chunks_reused = vectors.iter().filter(|v| v.is_some()).count();

    let pending: Vec<usize> = (0..chunks.len()).filter(|&i| vectors[i].is_none()).collect();
    let texts: Vec<String> = pending.iter().map(|&i| chunks[i].text.clone()).collect();
    info!(
        chunks = chunks.len(),
        reused = summary.chunks_reused,
        to_embed = texts.len(),
        "Embedding chunks"
    );

    let embedded = match embedder.embed_batch(&texts).await {
        Ok(embedded) => embedded,
        Err(e) => return fail(summary, BuildStage::Embed, e.to_string()),
    };
    for (i, vector) in pending.into_iter().zip(embedded) {
        vectors[i] = Some(vector);
    }

    let mut index = VectorIndex::new(config.rag.similarity, embedder.model_name())
        .with_chunking(config.rag.chunk_size, config.rag.chunk_overlap);
    for (chunk, vector) in chunks.iter().zip(vectors) {
        let Some(vector) = vector else {
            return fail(summary, BuildStage::Embed, format!("no vector for chunk {}", chunk.id));
        };
        if let Err(e) = index.upsert(chunk.id.clone(), vector, chunk.payload()) {
            return fail(summary, BuildStage::Index, e.to_string());
        }
    }
    summary.chunks_indexed = index.len();

    if let Err(e) = index.save(&config.storage.index_dir).await {
        return fail(summary, BuildStage::Persist, e.to_string());
    }

    summary.elapsed = started.elapsed();
    info!(
        documents = summary.documents_indexed,
        chunks = summary.chunks_indexed,
        skipped = summary.failures.len(),
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "Index build complete"
    );
    BuildRun {
        index: Some(index),
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingBackend;
    use crate::provider::HashingEmbedder;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Config, Embedder) {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir(&data).unwrap();
        std::fs::write(data.join("hma.txt"), "Section 13 of the Hindu Marriage Act lists grounds for divorce. ".repeat(10)).unwrap();
        std::fs::write(data.join("ipc.txt"), "Section 302 of the Indian Penal Code deals with murder. ".repeat(10)).unwrap();

        let mut config = Config::default();
        config.corpus.data_dir = data;
        config.storage.index_dir = dir.path().join("index");
        config.embedding.backend = EmbeddingBackend::Hashing;
        config.rag.chunk_size = 200;
        config.rag.chunk_overlap = 40;

        let embedder = Embedder::new(Arc::new(HashingEmbedder::new(64)), Duration::from_secs(5));
        (dir, config, embedder)
    }

    #[tokio::test]
    async fn test_build_indexes_corpus_and_persists() {
        let (_dir, config, embedder) = setup();
        let run = build(&config, &embedder, None).await;

        assert!(run.summary.is_ready());
        assert_eq!(run.summary.documents_loaded, 2);
        assert_eq!(run.summary.documents_indexed, 2);
        assert_eq!(run.summary.chunks_reused, 0);
        let index = run.index.unwrap();
        assert_eq!(index.len(), run.summary.chunks_indexed);
        assert!(config.storage.index_dir.join("manifest.json").exists());
    }

    #[tokio::test]
    async fn test_rebuild_reuses_unchanged_vectors() {
        let (_dir, config, embedder) = setup();
        let first = build(&config, &embedder, None).await.index.unwrap();

        std::fs::write(config.corpus.data_dir.join("ipc.txt"), "Section 420 covers cheating.").unwrap();
        let second = build(&config, &embedder, Some(&first)).await;

        let hma_chunks = first.entries().filter(|(_, e)| e.payload.document_id == "hma.txt").count();
        assert_eq!(second.summary.chunks_reused, hma_chunks);
        let index = second.index.unwrap();
        assert!(index.entries().all(|(_, e)| !e.payload.text.contains("Section 302")));
    }

    #[tokio::test]
    async fn test_no_reuse_across_models() {
        let (_dir, config, embedder) = setup();
        let first = build(&config, &embedder, None).await.index.unwrap();

        let other = Embedder::new(Arc::new(HashingEmbedder::new(32)), Duration::from_secs(5));
        let second = build(&config, &other, Some(&first)).await;
        assert_eq!(second.summary.chunks_reused, 0);
        assert_eq!(second.index.unwrap().dimension(), Some(32));
    }

    #[tokio::test]
    async fn test_missing_corpus_fails_at_load() {
        let (_dir, mut config, embedder) = setup();
        config.corpus.data_dir = PathBuf::from("/no/such/legal/corpus");
        let run = build(&config, &embedder, None).await;

        assert!(run.index.is_none());
        assert!(matches!(
            run.summary.outcome,
            BuildOutcome::Failed { stage: BuildStage::Load, .. }
        ));
    }

    #[tokio::test]
    async fn test_unreadable_files_reported_in_summary() {
        let (_dir, config, embedder) = setup();
        std::fs::write(config.corpus.data_dir.join("scan.pdf"), b"not really a pdf").unwrap();
        let run = build(&config, &embedder, None).await;

        assert!(run.summary.is_ready());
        assert_eq!(run.summary.failures.len(), 1);
        assert!(run.summary.failures[0].path.ends_with("scan.pdf"));
    }
}
