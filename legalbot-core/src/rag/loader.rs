//! Corpus loading and text extraction.
//!
//! This module provides functionality to:
//! - Recursively collect supported documents from the corpus folder
//! - Extract plain text from PDFs page by page, and from text files
//! - Record page spans so chunks can point back to a page

use super::types::{Document, PageSpan};
use crate::config::CorpusConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

/// Errors that can occur while loading the corpus.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// An I/O error occurred while walking the corpus folder itself.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A single file could not be read or parsed. Never fatal to a load.
    #[error("Unreadable document {}: {reason}", path.display())]
    UnreadableDocument { path: PathBuf, reason: String },
}

/// Result type for loading operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Outcome of loading a corpus folder.
///
/// Documents come back in sorted path order; files that failed to parse are
/// listed in `failures` instead of aborting the load.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub documents: Vec<Document>,
    pub failures: Vec<LoaderError>,
}

/// Loads every supported document under `folder`.
///
/// # Errors
///
/// Returns an error only if the folder itself cannot be read. Per-file
/// problems are reported as [`LoaderError::UnreadableDocument`] entries in
/// [`LoadReport::failures`].
pub async fn load(folder: &Path, config: &CorpusConfig) -> Result<LoadReport> {
    let mut paths = Vec::new();
    collect_files_recursive(folder, &mut paths, config).await?;
    paths.sort();

    info!(folder = %folder.display(), files = paths.len(), "Loading corpus");

    let mut report = LoadReport::default();
    for path in paths {
        match load_file(folder, &path).await {
            Ok(document) => {
                debug!(
                    path = %path.display(),
                    pages = document.page_count,
                    chars = document.raw_text.len(),
                    "Loaded document"
                );
                report.documents.push(document);
            }
            Err(e) => {
                warn!(error = %e, "Skipping document");
                report.failures.push(e);
            }
        }
    }

    Ok(report)
}

fn collect_files_recursive<'a>(
    dir: &'a Path,
    files: &'a mut Vec<PathBuf>,
    config: &'a CorpusConfig,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();

            // Only the new component is checked; the corpus root itself may
            // live anywhere.
            if should_exclude(Path::new(&entry.file_name()), &config.exclude_patterns) {
                continue;
            }

            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                collect_files_recursive(&path, files, config).await?;
            } else if is_supported(&path, &config.extensions) {
                files.push(path);
            } else {
                debug!(path = %path.display(), "Ignoring unsupported file type");
            }
        }

        Ok(())
    })
}

async fn load_file(root: &Path, path: &Path) -> Result<Document> {
    let id = document_id(root, path);
    let unreadable = |reason: String| LoaderError::UnreadableDocument {
        path: path.to_path_buf(),
        reason,
    };

    let pages = match extension(path).as_deref() {
        Some("pdf") => {
            let bytes = fs::read(path).await.map_err(|e| unreadable(e.to_string()))?;
            tokio::task::spawn_blocking(move || {
                pdf_extract::extract_text_from_mem_by_pages(&bytes).map_err(|e| e.to_string())
            })
            .await
            .map_err(|e| unreadable(format!("extraction task failed: {}", e)))?
            .map_err(|e| unreadable(format!("PDF extraction error: {}", e)))?
        }
        _ => {
            let bytes = fs::read(path).await.map_err(|e| unreadable(e.to_string()))?;
            let text = String::from_utf8(bytes)
                .map_err(|_| unreadable("file is not valid UTF-8".to_string()))?;
            vec![text]
        }
    };

    let document = assemble_document(id, path.to_path_buf(), &pages);
    if document.raw_text.trim().is_empty() {
        return Err(unreadable(
            "no extractable text (image-based or empty file)".to_string(),
        ));
    }
    Ok(document)
}

/// Joins page texts with a newline and records each page's character span.
pub(crate) fn assemble_document(id: String, source_path: PathBuf, pages: &[String]) -> Document {
    let mut raw_text = String::new();
    let mut spans = Vec::with_capacity(pages.len());
    let mut offset = 0;

    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            raw_text.push('\n');
            offset += 1;
        }
        let start = offset;
        raw_text.push_str(page);
        offset += page.chars().count();
        spans.push(PageSpan {
            number: (i + 1) as u32,
            char_start: start,
            char_end: offset,
        });
    }

    Document {
        id,
        source_path,
        raw_text,
        page_count: spans.len() as u32,
        pages: spans,
    }
}

/// Path relative to the corpus root with `/` separators.
fn document_id(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Checks if a file should be loaded based on its extension.
fn is_supported(path: &Path, extensions: &[String]) -> bool {
    match extension(path) {
        Some(ext) => extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)),
        None => false,
    }
}

/// A path is excluded if any component of its path matches an exclude pattern.
fn should_exclude(path: &Path, patterns: &[String]) -> bool {
    path.components().any(|component| {
        if let Some(name) = component.as_os_str().to_str() {
            patterns.iter().any(|pattern| name.contains(pattern.as_str()))
        } else {
            false
        }
    })
}
