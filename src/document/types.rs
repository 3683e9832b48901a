//! Type definitions for documents and sentences.

use serde::{Deserialize, Serialize};

use crate::types::{DocumentId, SentenceId, Timestamp};

/// A source document that sentences were extracted from.
///
/// Unique on `path`. Created on the first ingestion of a path and never
/// mutated afterwards; only a full-store clear removes it.
///
/// # Serialization
///
/// Documents are serialized with bincode for compact storage in redb.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Store-assigned identifier.
    pub id: DocumentId,

    /// Display name (usually the file's base name).
    pub filename: String,

    /// Full path; the uniqueness key.
    pub path: String,

    /// When this document was first ingested.
    pub created_at: Timestamp,
}

/// A sentence belonging to a document.
///
/// `position` is the 0-based order within the source document at ingestion
/// time and is unique per document. Immutable once written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentence {
    /// Store-assigned identifier (monotonic, never reused).
    pub id: SentenceId,

    /// Owning document.
    pub document_id: DocumentId,

    /// Sentence text.
    pub text: String,

    /// 0-based order within the document.
    pub position: u32,

    /// When this sentence was written.
    pub created_at: Timestamp,
}

/// A sentence joined with its document, as needed to render a search hit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentenceRecord {
    /// Sentence identifier.
    pub id: SentenceId,

    /// Sentence text.
    pub text: String,

    /// 0-based order within the document.
    pub position: u32,

    /// Owning document.
    pub document_id: DocumentId,

    /// Owning document's filename.
    pub filename: String,

    /// Owning document's path.
    pub path: String,
}

/// Record counts reported by [`StorageEngine::stats`](crate::storage::StorageEngine::stats).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Number of documents.
    pub documents: u64,

    /// Number of sentences, with or without an embedding.
    pub sentences: u64,

    /// Number of sentences that carry an embedding.
    pub embeddings: u64,
}

impl StoreStats {
    /// Returns true if every count is zero.
    pub fn is_empty(&self) -> bool {
        self.documents == 0 && self.sentences == 0 && self.embeddings == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_bincode_roundtrip() {
        let doc = Document {
            id: DocumentId::new(3),
            filename: "notes.md".to_string(),
            path: "/corpus/notes.md".to_string(),
            created_at: Timestamp::now(),
        };
        let bytes = bincode::serialize(&doc).unwrap();
        let restored: Document = bincode::deserialize(&bytes).unwrap();
        assert_eq!(doc, restored);
    }

    #[test]
    fn test_sentence_bincode_roundtrip() {
        let sentence = Sentence {
            id: SentenceId::new(10),
            document_id: DocumentId::new(3),
            text: "Rust guarantees memory safety.".to_string(),
            position: 4,
            created_at: Timestamp::now(),
        };
        let bytes = bincode::serialize(&sentence).unwrap();
        let restored: Sentence = bincode::deserialize(&bytes).unwrap();
        assert_eq!(sentence, restored);
    }

    #[test]
    fn test_store_stats_is_empty() {
        assert!(StoreStats::default().is_empty());
        let stats = StoreStats {
            documents: 1,
            ..Default::default()
        };
        assert!(!stats.is_empty());
    }
}
