use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration for the whole question-answering engine.
///
/// Every section falls back to its defaults when omitted, so a config file
/// only needs to mention what it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub rag: RagConfig,
    pub corpus: CorpusConfig,
    pub storage: StorageConfig,
    /// Instruction placed at the top of every generation prompt.
    pub system_prompt: String,
}

/// Configuration for the generative model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub base_url: String,
    pub temperature: f64,
    pub top_p: f64,
    pub repeat_penalty: f64,
    /// Upper bound on generated tokens (`num_predict` for Ollama).
    pub max_tokens: u32,
    /// Deadline for a single generation call.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gemma3:1b".to_string(),
            base_url: "http://localhost:11434".to_string(),
            temperature: 0.7,
            top_p: 0.95,
            repeat_penalty: 1.1,
            max_tokens: 1024,
            timeout_secs: 120,
        }
    }
}

/// Which embedding backend to construct from config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Ollama `/api/embed` endpoint
    Ollama,
    /// Local feature-hashing embedder, no model download required
    Hashing,
}

/// Configuration for the embedding model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub model: String,
    /// Base URL for the Ollama backend. Falls back to `llm.base_url` when unset.
    pub base_url: Option<String>,
    /// Vector dimension of the hashing backend. Ignored by model backends.
    pub dimension: usize,
    /// Number of texts sent per embedding request.
    pub batch_size: usize,
    /// Number of batches in flight while building the index.
    pub concurrency: usize,
    /// Deadline for a single embedding request.
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Ollama,
            model: "all-minilm".to_string(),
            base_url: None,
            dimension: 384,
            batch_size: 32,
            concurrency: 1,
            timeout_secs: 60,
        }
    }
}

/// Similarity function of the vector index.
///
/// Fixed when an index is created and persisted with it, so build and query
/// always agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Similarity {
    Cosine,
    Dot,
}

impl Similarity {
    pub fn name(&self) -> &'static str {
        match self {
            Similarity::Cosine => "cosine",
            Similarity::Dot => "dot",
        }
    }
}

/// Configuration for chunking, retrieval and prompt assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Chunk length in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub chunk_overlap: usize,
    /// Number of chunks retrieved per question.
    pub top_k: usize,
    /// Chunks scoring below this are never used as context.
    pub min_score: f32,
    /// Character budget of the assembled context.
    pub max_context_chars: usize,
    /// Prior conversation turns kept in the prompt; older ones are dropped.
    pub max_history_turns: usize,
    /// Delay before the single retry of a timed-out generation.
    pub retry_backoff_ms: u64,
    pub similarity: Similarity,
    /// When set, questions without relevant context get this reply
    /// instead of a model call.
    pub no_context_reply: Option<String>,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            top_k: 4,
            min_score: 0.2,
            max_context_chars: 6000,
            max_history_turns: 6,
            retry_backoff_ms: 500,
            similarity: Similarity::Cosine,
            no_context_reply: None,
        }
    }
}

/// Where the source documents live and which of them are indexed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    pub data_dir: PathBuf,
    /// File extensions to load, without the dot.
    pub extensions: Vec<String>,
    /// Paths with a component containing any of these strings are skipped.
    pub exclude_patterns: Vec<String>,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            extensions: vec!["pdf".to_string(), "txt".to_string(), "md".to_string()],
            exclude_patterns: default_exclude_patterns(),
        }
    }
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        ".git".to_string(),
        ".DS_Store".to_string(),
        "Thumbs.db".to_string(),
        "~$".to_string(),
    ]
}

/// Persistence locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the persisted vector index.
    pub index_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            index_dir: PathBuf::from("index"),
        }
    }
}

pub(crate) fn default_system_prompt() -> String {
    "You are LegalBOT, an assistant that answers questions about law using only the \
     provided excerpts from the legal document corpus. Cite the sources you rely on. \
     If the excerpts do not contain the answer, say so plainly instead of guessing."
        .to_string()
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;

        if config.system_prompt.trim().is_empty() {
            config.system_prompt = default_system_prompt();
        }
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from `config.yaml` if it exists, otherwise use defaults.
    pub fn load_or_default() -> Self {
        Self::load("config.yaml").unwrap_or_default()
    }

    /// Base URL used by the Ollama embedding backend.
    pub fn embedding_base_url(&self) -> &str {
        self.embedding
            .base_url
            .as_deref()
            .unwrap_or(&self.llm.base_url)
    }

    /// Checks the settings that would otherwise fail deep inside a build or query.
    pub fn validate(&self) -> Result<()> {
        let rag = &self.rag;
        if rag.chunk_size == 0 || rag.chunk_overlap >= rag.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "chunk_overlap ({}) must be smaller than a non-zero chunk_size ({})",
                rag.chunk_overlap, rag.chunk_size
            )));
        }
        if rag.top_k == 0 {
            return Err(ConfigError::Invalid("top_k must be at least 1".to_string()));
        }
        if self.embedding.batch_size == 0 || self.embedding.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "embedding batch_size and concurrency must be at least 1".to_string(),
            ));
        }
        if self.embedding.backend == EmbeddingBackend::Hashing && self.embedding.dimension == 0 {
            return Err(ConfigError::Invalid(
                "hashing embedder needs a non-zero dimension".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            rag: RagConfig::default(),
            corpus: CorpusConfig::default(),
            storage: StorageConfig::default(),
            system_prompt: default_system_prompt(),
        }
    }
}
