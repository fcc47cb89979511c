//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use legalbot_core::config::{Config, EmbeddingBackend};
use legalbot_core::provider::{self, EmbeddingProvider, GenerationProvider, HashingEmbedder, ProviderError};
use legalbot_core::RagEngine;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::Notify;

pub const HMA_TEXT: &str = "Hindu Marriage Act, 1955. Section 13. Divorce. \
Any marriage solemnized under the Hindu Marriage Act may, on a petition presented by either the \
husband or the wife, be dissolved by a decree of divorce on the ground that the other party has \
treated the petitioner with cruelty, or has deserted the petitioner for a continuous period of \
not less than two years. A wife may divorce her husband under the Hindu Marriage Act on these grounds.";

pub const IPC_TEXT: &str = "Indian Penal Code, 1860. Section 302. Punishment for murder. \
Whoever commits murder shall be punished with death, or imprisonment for life, and shall also be \
liable to fine. Section 379. Punishment for theft. Whoever commits theft shall be punished with \
imprisonment of either description for a term which may extend to three years.";

/// Generation double that records prompts and quotes the first excerpt it saw.
#[derive(Default)]
pub struct EchoGenerator {
    pub prompts: Mutex<Vec<String>>,
}

impl EchoGenerator {
    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn last_prompt(&self) -> String {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl GenerationProvider for EchoGenerator {
    async fn generate(&self, prompt: &str) -> provider::Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut lines = prompt.lines().skip_while(|line| !line.starts_with("[Source: "));
        let reply = match (lines.next(), lines.next()) {
            (Some(header), Some(excerpt)) => format!("Grounded answer citing {}: {}", header, excerpt),
            (Some(header), None) => format!("Grounded answer citing {}", header),
            _ => "The provided documents do not cover this question.".to_string(),
        };
        Ok(reply)
    }

    fn model_name(&self) -> &str {
        "echo"
    }
}

/// Generation double whose backend is down.
pub struct DownGenerator;

#[async_trait]
impl GenerationProvider for DownGenerator {
    async fn generate(&self, _prompt: &str) -> provider::Result<String> {
        Err(ProviderError::Api("connection refused".to_string()))
    }

    fn model_name(&self) -> &str {
        "down"
    }
}

/// Hashing embedder that can be switched to failing mid-test.
pub struct SwitchableEmbedder {
    inner: HashingEmbedder,
    pub failing: AtomicBool,
    pub batch_calls: AtomicUsize,
}

impl SwitchableEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            inner: HashingEmbedder::new(dimension),
            failing: AtomicBool::new(false),
            batch_calls: AtomicUsize::new(0),
        }
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingProvider for SwitchableEmbedder {
    async fn embed(&self, text: &str) -> provider::Result<Vec<f32>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Api("embedding model unavailable".to_string()));
        }
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> provider::Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Api("embedding model unavailable".to_string()));
        }
        self.inner.embed_batch(texts).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// Embedder that blocks every batch until released.
pub struct GatedEmbedder {
    inner: HashingEmbedder,
    pub entered: Notify,
    pub release: Notify,
}

impl GatedEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            inner: HashingEmbedder::new(dimension),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for GatedEmbedder {
    async fn embed(&self, text: &str) -> provider::Result<Vec<f32>> {
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> provider::Result<Vec<Vec<f32>>> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.embed_batch(texts).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// A temporary corpus and index location.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("data")).unwrap();
        Self { dir }
    }

    pub fn with_legal_corpus() -> Self {
        let workspace = Self::new();
        workspace.write("family/hma.txt", HMA_TEXT);
        workspace.write("criminal/ipc.txt", IPC_TEXT);
        workspace
    }

    pub fn data_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("data")
    }

    pub fn index_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("index")
    }

    pub fn write(&self, relative: &str, text: &str) {
        let path = self.data_dir().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, text).unwrap();
    }

    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.corpus.data_dir = self.data_dir();
        config.storage.index_dir = self.index_dir();
        config.embedding.backend = EmbeddingBackend::Hashing;
        config.embedding.dimension = 512;
        config.rag.chunk_size = 300;
        config.rag.chunk_overlap = 50;
        config.rag.min_score = 0.05;
        config
    }

    pub fn engine(
        &self,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
    ) -> RagEngine {
        RagEngine::new(self.config(), embedder, generator)
    }
}

/// Reads every file of an index directory, sorted by name.
pub fn read_index_files(dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<(String, Vec<u8>)> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| {
            let entry = entry.unwrap();
            (
                entry.file_name().to_string_lossy().into_owned(),
                std::fs::read(entry.path()).unwrap(),
            )
        })
        .collect();
    files.sort();
    files
}
