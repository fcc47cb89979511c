use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Character range of one page inside [`Document::raw_text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSpan {
    /// 1-based page number.
    pub number: u32,
    pub char_start: usize,
    pub char_end: usize,
}

/// A source document with its extracted text.
///
/// Offsets (`char_start`/`char_end` here and on [`Chunk`]) count Unicode
/// scalar values, not bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Path relative to the corpus folder, `/`-separated.
    pub id: String,
    pub source_path: PathBuf,
    pub raw_text: String,
    pub page_count: u32,
    pub pages: Vec<PageSpan>,
}

impl Document {
    /// Builds a single-page document from plain text.
    pub fn from_text(id: impl Into<String>, source_path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        let raw_text = text.into();
        let char_end = raw_text.chars().count();
        Self {
            id: id.into(),
            source_path: source_path.into(),
            raw_text,
            page_count: 1,
            pages: vec![PageSpan {
                number: 1,
                char_start: 0,
                char_end,
            }],
        }
    }

    /// Page containing the given character offset.
    pub fn page_at(&self, char_offset: usize) -> u32 {
        self.pages
            .iter()
            .find(|page| char_offset >= page.char_start && char_offset < page.char_end)
            .or_else(|| self.pages.last())
            .map(|page| page.number)
            .unwrap_or(1)
    }
}

/// A provenance-tagged span of document text; the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub source_path: PathBuf,
    pub sequence_index: usize,
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
    pub page: u32,
}

impl Chunk {
    /// Payload stored next to the chunk's vector in the index.
    pub fn payload(&self) -> ChunkPayload {
        ChunkPayload {
            document_id: self.document_id.clone(),
            source_path: self.source_path.clone(),
            sequence_index: self.sequence_index,
            page: self.page,
            char_start: self.char_start,
            char_end: self.char_end,
            text: self.text.clone(),
        }
    }
}

/// Everything the index keeps about a chunk besides its vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub document_id: String,
    pub source_path: PathBuf,
    pub sequence_index: usize,
    pub page: u32,
    pub char_start: usize,
    pub char_end: usize,
    pub text: String,
}

/// A search result containing a chunk and its similarity score.
///
/// Returned by vector search operations, ordered by descending similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub payload: ChunkPayload,
    pub score: f32,
}

impl RetrievalResult {
    pub fn text(&self) -> &str {
        &self.payload.text
    }
}

/// Where a piece of context came from, reported back with the answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub document_id: String,
    pub source_path: PathBuf,
    pub page: u32,
    pub chunk_id: String,
    pub score: f32,
}

impl From<&RetrievalResult> for SourceRef {
    fn from(result: &RetrievalResult) -> Self {
        Self {
            document_id: result.payload.document_id.clone(),
            source_path: result.payload.source_path.clone(),
            page: result.payload.page,
            chunk_id: result.chunk_id.clone(),
            score: result.score,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

/// One prior exchange in a conversation. Owned by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Whether an answer was backed by retrieved context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcome {
    Grounded,
    /// The corpus held nothing relevant enough; a successful outcome, not an error.
    NoRelevantContext,
}

/// Result of [`RagEngine::answer`](crate::rag::RagEngine::answer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SourceRef>,
    pub outcome: AnswerOutcome,
}

impl Answer {
    pub fn is_grounded(&self) -> bool {
        self.outcome == AnswerOutcome::Grounded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_text_single_page() {
        let doc = Document::from_text("a.txt", "/corpus/a.txt", "héllo");
        assert_eq!(doc.page_count, 1);
        assert_eq!(doc.pages[0].char_end, 5);
        assert_eq!(doc.page_at(3), 1);
    }

    #[test]
    fn test_page_at_multiple_pages() {
        let doc = Document {
            id: "act.pdf".to_string(),
            source_path: PathBuf::from("act.pdf"),
            raw_text: "aaaa\nbbbb".to_string(),
            page_count: 2,
            pages: vec![
                PageSpan { number: 1, char_start: 0, char_end: 5 },
                PageSpan { number: 2, char_start: 5, char_end: 9 },
            ],
        };
        assert_eq!(doc.page_at(0), 1);
        assert_eq!(doc.page_at(4), 1);
        assert_eq!(doc.page_at(5), 2);
        assert_eq!(doc.page_at(100), 2);
    }

    #[test]
    fn test_conversation_turn_roles() {
        assert_eq!(ConversationTurn::user("q").role, Role::User);
        assert_eq!(ConversationTurn::assistant("a").role.label(), "Assistant");
    }
}
