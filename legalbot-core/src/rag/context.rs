//! Turning retrieved chunks into a bounded, source-tagged prompt context.

use super::types::{RetrievalResult, SourceRef};

/// Context text used when no chunk qualified.
///
/// The generator recognises it and switches to its "nothing relevant"
/// instruction instead of presenting it as excerpts.
pub const NO_CONTEXT_MARKER: &str = "[NO RELEVANT CONTEXT FOUND]";

const BLOCK_SEPARATOR: &str = "\n\n";

/// The context passed to the generator and the sources it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledContext {
    pub text: String,
    pub sources: Vec<SourceRef>,
}

impl AssembledContext {
    pub fn empty() -> Self {
        Self {
            text: NO_CONTEXT_MARKER.to_string(),
            sources: Vec::new(),
        }
    }

    pub fn has_context(&self) -> bool {
        !self.sources.is_empty()
    }
}

/// Builds the context from retrieval results, best first, within `max_chars`.
///
/// Each chunk becomes a `[Source: <document>, page <n>]` header followed by
/// its text. Chunks are never truncated: assembly stops at the first block
/// that would not fit. A chunk whose text already appears inside an
/// included chunk is skipped.
pub fn assemble(results: &[RetrievalResult], max_chars: usize) -> AssembledContext {
    let mut ordered: Vec<&RetrievalResult> = results.iter().collect();
    ordered.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.chunk_id.cmp(&b.chunk_id)));

    let mut text = String::new();
    let mut used_chars = 0;
    let mut included: Vec<&str> = Vec::new();
    let mut sources = Vec::new();

    for result in ordered {
        let chunk_text = result.text();
        if included.iter().any(|kept| kept.contains(chunk_text)) {
            continue;
        }

        let block = format!(
            "[Source: {}, page {}]\n{}",
            result.payload.document_id, result.payload.page, chunk_text
        );
        let separator = if text.is_empty() { "" } else { BLOCK_SEPARATOR };
        let block_chars = separator.len() + block.chars().count();
        if used_chars + block_chars > max_chars {
            break;
        }

        text.push_str(separator);
        text.push_str(&block);
        used_chars += block_chars;
        included.push(chunk_text);
        sources.push(SourceRef::from(result));
    }

    if sources.is_empty() {
        return AssembledContext::empty();
    }
    AssembledContext { text, sources }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::types::ChunkPayload;
    use std::path::PathBuf;

    fn result(id: &str, text: &str, score: f32) -> RetrievalResult {
        RetrievalResult {
            chunk_id: id.to_string(),
            payload: ChunkPayload {
                document_id: "hma.pdf".to_string(),
                source_path: PathBuf::from("data/hma.pdf"),
                sequence_index: 0,
                page: 4,
                char_start: 0,
                char_end: text.chars().count(),
                text: text.to_string(),
            },
            score,
        }
    }

    #[test]
    fn test_assemble_formats_blocks_in_score_order() {
        let results = vec![result("b", "second", 0.5), result("a", "first", 0.9)];
        let context = assemble(&results, 1000);

        assert_eq!(
            context.text,
            "[Source: hma.pdf, page 4]\nfirst\n\n[Source: hma.pdf, page 4]\nsecond"
        );
        assert_eq!(context.sources.len(), 2);
        assert_eq!(context.sources[0].chunk_id, "a");
        assert!(context.has_context());
    }

    #[test]
    fn test_assemble_stops_before_exceeding_budget() {
        let results = vec![
            result("a", &"x".repeat(40), 0.9),
            result("b", &"y".repeat(40), 0.8),
        ];
        let header = "[Source: hma.pdf, page 4]\n".len();
        let context = assemble(&results, header + 40 + 10);

        assert_eq!(context.sources.len(), 1);
        assert!(context.text.chars().count() <= header + 50);
        assert!(context.text.ends_with(&"x".repeat(40)));
    }

    #[test]
    fn test_assemble_never_splits_a_chunk() {
        let results = vec![result("a", &"x".repeat(100), 0.9)];
        let context = assemble(&results, 50);
        assert!(!context.has_context());
        assert_eq!(context.text, NO_CONTEXT_MARKER);
    }

    #[test]
    fn test_assemble_skips_contained_duplicates() {
        let results = vec![
            result("a", "Section 13 lists the grounds for divorce.", 0.9),
            result("b", "the grounds for divorce", 0.8),
            result("c", "Section 13B covers mutual consent.", 0.7),
        ];
        let context = assemble(&results, 1000);
        let ids: Vec<_> = context.sources.iter().map(|s| s.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_assemble_empty_input_gives_marker() {
        let context = assemble(&[], 1000);
        assert_eq!(context, AssembledContext::empty());
        assert!(context.sources.is_empty());
    }

    #[test]
    fn test_equal_scores_order_by_chunk_id() {
        let results = vec![result("z", "last", 0.5), result("a", "first", 0.5)];
        let context = assemble(&results, 1000);
        assert_eq!(context.sources[0].chunk_id, "a");
    }
}
