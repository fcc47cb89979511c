//! In-memory vector index with atomic on-disk persistence.
//!
//! Entries are kept in a `BTreeMap` keyed by chunk id, so iteration, search
//! tie-breaking and the persisted file are all independent of insertion
//! order. Saving the same entries twice produces byte-identical files.
//!
//! # On-disk layout
//!
//! ```text
//! index/
//!   manifest.json              # format, similarity, dimension, chunking, checksum, data file name
//!   vectors-<sha256 prefix>.json
//! ```
//!
//! The manifest is written last, through a temp file and a rename; whichever
//! manifest is on disk always points at a complete data file.

use super::types::{ChunkPayload, RetrievalResult};
use crate::config::Similarity;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

/// Bumped whenever the persisted layout changes.
pub const FORMAT_VERSION: u32 = 1;

const MANIFEST_FILE: &str = "manifest.json";
const MANIFEST_TMP_FILE: &str = "manifest.json.tmp";
const DATA_FILE_PREFIX: &str = "vectors-";

#[derive(Debug, Error)]
pub enum IndexError {
    /// The persisted index is missing, incomplete or inconsistent.
    #[error("Index at {} is corrupt: {reason}", dir.display())]
    Corrupt { dir: PathBuf, reason: String },

    #[error("Vector dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, IndexError>;

/// A stored vector and the chunk it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

/// Self-description of a persisted index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub similarity: Similarity,
    /// Zero for an empty index.
    pub dimension: usize,
    pub count: usize,
    pub embedding_model: String,
    /// Chunk window the entries were cut with. Zero when unknown.
    #[serde(default)]
    pub chunk_size: usize,
    #[serde(default)]
    pub chunk_overlap: usize,
    pub data_file: String,
    /// Hex SHA-256 of the data file.
    pub checksum: String,
}

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    chunk_id: String,
    vector: Vec<f32>,
    payload: ChunkPayload,
}

/// Vectors and payloads for every chunk of the corpus.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    similarity: Similarity,
    embedding_model: String,
    chunking: (usize, usize),
    dimension: Option<usize>,
    entries: BTreeMap<String, IndexEntry>,
}

impl VectorIndex {
    pub fn new(similarity: Similarity, embedding_model: impl Into<String>) -> Self {
        Self {
            similarity,
            embedding_model: embedding_model.into(),
            chunking: (0, 0),
            dimension: None,
            entries: BTreeMap::new(),
        }
    }

    /// Records the chunk size and overlap the entries were produced with.
    pub fn with_chunking(mut self, chunk_size: usize, chunk_overlap: usize) -> Self {
        self.chunking = (chunk_size, chunk_overlap);
        self
    }

    /// `(chunk_size, chunk_overlap)`; `(0, 0)` if never recorded.
    pub fn chunking(&self) -> (usize, usize) {
        self.chunking
    }

    pub fn similarity(&self) -> Similarity {
        self.similarity
    }

    /// Vector length, fixed by the first upsert.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.entries.contains_key(chunk_id)
    }

    pub fn get(&self, chunk_id: &str) -> Option<&IndexEntry> {
        self.entries.get(chunk_id)
    }

    /// All entries in ascending chunk id order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &IndexEntry)> {
        self.entries.iter().map(|(id, entry)| (id.as_str(), entry))
    }

    /// Inserts or replaces the entry for `chunk_id`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::DimensionMismatch`] if the vector length differs
    /// from the vectors already stored, or the vector is empty.
    pub fn upsert(&mut self, chunk_id: impl Into<String>, vector: Vec<f32>, payload: ChunkPayload) -> Result<()> {
        let expected = self.dimension.unwrap_or(vector.len());
        if vector.is_empty() || vector.len() != expected {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
        self.dimension = Some(expected);
        self.entries.insert(chunk_id.into(), IndexEntry { vector, payload });
        Ok(())
    }

    /// Removes an entry; returns whether it was present.
    pub fn remove(&mut self, chunk_id: &str) -> bool {
        self.entries.remove(chunk_id).is_some()
    }

    /// Returns at most `k` entries by descending similarity to `query`.
    ///
    /// Equal scores are ordered by ascending chunk id. Under cosine, a zero
    /// query vector matches nothing.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievalResult>> {
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(expected) = self.dimension {
            if query.len() != expected {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: query.len(),
                });
            }
        }

        let query_norm = norm(query);
        if self.similarity == Similarity::Cosine && query_norm == 0.0 {
            debug!("Query vector has no features");
            return Ok(Vec::new());
        }
        let mut scored: Vec<(f32, &String, &IndexEntry)> = self
            .entries
            .iter()
            .map(|(id, entry)| (self.score(query, query_norm, &entry.vector), id, entry))
            .collect();

        // BTreeMap iteration is already in id order, and the sort is stable.
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, id, entry)| RetrievalResult {
                chunk_id: id.clone(),
                payload: entry.payload.clone(),
                score,
            })
            .collect())
    }

    fn score(&self, query: &[f32], query_norm: f32, vector: &[f32]) -> f32 {
        let dot = dot(query, vector);
        match self.similarity {
            Similarity::Dot => dot,
            Similarity::Cosine => {
                let denom = query_norm * norm(vector);
                if denom == 0.0 {
                    0.0
                } else {
                    dot / denom
                }
            }
        }
    }

    /// Persists the index under `dir`, replacing any index already there.
    pub async fn save(&self, dir: &Path) -> Result<Manifest> {
        fs::create_dir_all(dir).await?;

        let stored: Vec<StoredEntry> = self
            .entries
            .iter()
            .map(|(id, entry)| StoredEntry {
                chunk_id: id.clone(),
                vector: entry.vector.clone(),
                payload: entry.payload.clone(),
            })
            .collect();
        let data = serde_json::to_vec(&stored)?;
        let checksum = hex_digest(&data);
        let data_file = format!("{}{}.json", DATA_FILE_PREFIX, &checksum[..16]);

        let data_tmp = dir.join(format!("{}.tmp", data_file));
        fs::write(&data_tmp, &data).await?;
        fs::rename(&data_tmp, dir.join(&data_file)).await?;

        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            similarity: self.similarity,
            dimension: self.dimension.unwrap_or(0),
            count: self.entries.len(),
            embedding_model: self.embedding_model.clone(),
            chunk_size: self.chunking.0,
            chunk_overlap: self.chunking.1,
            data_file: data_file.clone(),
            checksum,
        };
        let manifest_tmp = dir.join(MANIFEST_TMP_FILE);
        fs::write(&manifest_tmp, serde_json::to_vec_pretty(&manifest)?).await?;
        fs::rename(&manifest_tmp, dir.join(MANIFEST_FILE)).await?;

        // The new manifest is committed; leftovers only cost disk space.
        if let Err(e) = remove_stale_data_files(dir, &data_file).await {
            warn!(dir = %dir.display(), error = %e, "Could not remove stale index data files");
        }

        info!(
            dir = %dir.display(),
            entries = manifest.count,
            data_file = %manifest.data_file,
            "Saved vector index"
        );
        Ok(manifest)
    }

    /// Restores an index saved with [`save`](Self::save).
    ///
    /// # Errors
    ///
    /// Any missing file, failed checksum or inconsistency is reported as
    /// [`IndexError::Corrupt`]. A broken index is never returned as an empty one.
    pub async fn load(dir: &Path) -> Result<Self> {
        let corrupt = |reason: String| IndexError::Corrupt {
            dir: dir.to_path_buf(),
            reason,
        };

        let manifest_bytes = fs::read(dir.join(MANIFEST_FILE))
            .await
            .map_err(|e| corrupt(format!("cannot read manifest: {}", e)))?;
        let manifest: Manifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| corrupt(format!("unparsable manifest: {}", e)))?;

        if manifest.format_version != FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported format version {}",
                manifest.format_version
            )));
        }
        if manifest.data_file.contains(['/', '\\']) || !manifest.data_file.starts_with(DATA_FILE_PREFIX) {
            return Err(corrupt(format!("invalid data file name {:?}", manifest.data_file)));
        }

        let data = fs::read(dir.join(&manifest.data_file))
            .await
            .map_err(|e| corrupt(format!("cannot read {}: {}", manifest.data_file, e)))?;
        if hex_digest(&data) != manifest.checksum {
            return Err(corrupt("checksum mismatch".to_string()));
        }

        let stored: Vec<StoredEntry> = serde_json::from_slice(&data)
            .map_err(|e| corrupt(format!("unparsable data file: {}", e)))?;
        if stored.len() != manifest.count {
            return Err(corrupt(format!(
                "manifest lists {} entries, data file has {}",
                manifest.count,
                stored.len()
            )));
        }

        let mut index = Self::new(manifest.similarity, manifest.embedding_model.clone())
            .with_chunking(manifest.chunk_size, manifest.chunk_overlap);
        for entry in stored {
            if entry.vector.len() != manifest.dimension {
                return Err(corrupt(format!(
                    "entry {} has dimension {}, manifest says {}",
                    entry.chunk_id,
                    entry.vector.len(),
                    manifest.dimension
                )));
            }
            if index.contains(&entry.chunk_id) {
                return Err(corrupt(format!("duplicate chunk id {}", entry.chunk_id)));
            }
            index
                .upsert(entry.chunk_id, entry.vector, entry.payload)
                .map_err(|e| corrupt(e.to_string()))?;
        }

        debug!(dir = %dir.display(), entries = index.len(), "Loaded vector index");
        Ok(index)
    }
}

async fn remove_stale_data_files(dir: &Path, keep: &str) -> Result<()> {
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(DATA_FILE_PREFIX) && name != keep {
            debug!(file = name, "Removing stale index data file");
            fs::remove_file(entry.path()).await?;
        }
    }
    Ok(())
}

fn hex_digest(data: &[u8]) -> String {
    Sha256::digest(data).iter().map(|b| format!("{:02x}", b)).collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}
