//! Splitting documents into overlapping, provenance-tagged chunks.

use super::types::{Chunk, Document};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("Invalid chunk config: overlap {overlap} must be smaller than chunk size {chunk_size}")]
    InvalidChunkConfig { chunk_size: usize, overlap: usize },
}

pub type Result<T> = std::result::Result<T, ChunkError>;

/// Preferred break points, strongest first.
const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

/// Checks the chunking precondition without chunking anything.
pub fn validate(chunk_size: usize, overlap: usize) -> Result<()> {
    if chunk_size == 0 || overlap >= chunk_size {
        return Err(ChunkError::InvalidChunkConfig { chunk_size, overlap });
    }
    Ok(())
}

/// Splits a document into overlapping chunks of at most `chunk_size` characters.
///
/// Each window is pulled back to the last paragraph break, line break or
/// space in its second half, so chunks tend to end on natural boundaries.
/// The next chunk starts `overlap` characters before the previous one ended.
/// Dropping those shared characters from every chunk but the first and
/// concatenating the rest gives back the document text.
///
/// # UTF-8 Safety
///
/// Sizes and offsets count characters, so multi-byte characters are never split.
pub fn chunk(document: &Document, chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    validate(chunk_size, overlap)?;

    let text = document.raw_text.as_str();
    if text.is_empty() {
        return Ok(Vec::new());
    }

    // byte_offsets[i] is the byte position of the i-th character; the extra
    // entry makes slicing up to the end uniform.
    let mut byte_offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    byte_offsets.push(text.len());
    let char_len = byte_offsets.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0;

    loop {
        let mut end = (start + chunk_size).min(char_len);
        if end < char_len {
            let earliest = start + (chunk_size / 2).max(overlap + 1);
            if let Some(boundary) = find_boundary(text, &byte_offsets, earliest, end) {
                end = boundary;
            }
        }

        let chunk_text = &text[byte_offsets[start]..byte_offsets[end]];
        let sequence_index = chunks.len();
        chunks.push(Chunk {
            id: chunk_id(&document.id, sequence_index, chunk_text),
            document_id: document.id.clone(),
            source_path: document.source_path.clone(),
            sequence_index,
            text: chunk_text.to_string(),
            char_start: start,
            char_end: end,
            page: document.page_at(start),
        });

        if end == char_len {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }

    Ok(chunks)
}

/// Finds the character offset just past the strongest separator ending in
/// `(earliest, end]`.
fn find_boundary(text: &str, byte_offsets: &[usize], earliest: usize, end: usize) -> Option<usize> {
    if earliest >= end {
        return None;
    }
    let window = &text[byte_offsets[earliest]..byte_offsets[end]];

    for separator in SEPARATORS {
        if let Some(pos) = window.rfind(separator) {
            let boundary_byte = byte_offsets[earliest] + pos + separator.len();
            // separators are ASCII, so the boundary is always a char start
            return byte_offsets.binary_search(&boundary_byte).ok();
        }
    }
    None
}

/// Stable identifier: document, position and a short hash of the text.
///
/// Zero-padding keeps lexical order equal to reading order within a document.
pub fn chunk_id(document_id: &str, sequence_index: usize, text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let hash: String = digest.iter().take(6).map(|b| format!("{:02x}", b)).collect();
    format!("{}#{:06}-{}", document_id, sequence_index, hash)
}
