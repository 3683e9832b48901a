//! redb table layout of the sentence store.
//!
//! The schema version lives in [`DatabaseMetadata`]; a file written by any
//! other version is refused on open.
//!
//! # Tables
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ METADATA_TABLE                                               │
//! │   Key: &str                                                  │
//! │   Value: &[u8] (bincode DatabaseMetadata)                    │
//! │   Entries: "db_metadata" -> DatabaseMetadata                 │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │ DOCUMENTS_TABLE              DOCUMENTS_BY_PATH_TABLE         │
//! │   u64 -> bincode Document      &str path -> u64              │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │ SENTENCES_TABLE              SENTENCES_BY_POSITION_TABLE     │
//! │   u64 -> bincode Sentence      (u64 doc, u32 pos) -> u64     │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │ EMBEDDINGS_TABLE                                             │
//! │   u64 sentence id -> raw LE f32 bytes (dimension * 4)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use redb::TableDefinition;
use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// Schema version written into new stores.
pub const SCHEMA_VERSION: u32 = 1;

/// Single-row table holding [`DatabaseMetadata`].
pub const METADATA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("metadata");

/// Document id to bincode [`Document`](crate::document::Document).
pub const DOCUMENTS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("documents");

/// Unique index: document path -> DocumentId.
pub const DOCUMENTS_BY_PATH_TABLE: TableDefinition<&str, u64> =
    TableDefinition::new("documents_by_path");

/// Sentence id to bincode [`Sentence`](crate::document::Sentence). The
/// vector, if any, lives in [`EMBEDDINGS_TABLE`].
pub const SENTENCES_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("sentences");

/// Unique index: (DocumentId, position) -> SentenceId.
///
/// Tuple keys order by document first, so a range scan over one document
/// yields its sentences in position order.
pub const SENTENCES_BY_POSITION_TABLE: TableDefinition<(u64, u32), u64> =
    TableDefinition::new("sentences_by_position");

/// Sentence id to the vector as little-endian f32 bytes.
///
/// Kept apart from [`SENTENCES_TABLE`] so a full scan for index builds
/// touches only vectors.
pub const EMBEDDINGS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("embeddings");

/// Store-wide state: schema version, dimension and id counters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseMetadata {
    /// Version of the table layout that wrote this file.
    pub schema_version: u32,

    /// Set by the first embedding written, or by `Config::embedding_dimension`
    /// on creation. Survives `clear`.
    pub embedding_dimension: Option<usize>,

    /// When the store file was first created.
    pub created_at: Timestamp,

    /// Refreshed on every open.
    pub last_opened_at: Timestamp,

    /// Next document identifier to hand out.
    pub next_document_id: u64,

    /// Next sentence identifier to hand out. Never decreases.
    pub next_sentence_id: u64,
}

impl DatabaseMetadata {
    /// Metadata for an empty store; ids start at 1.
    pub fn new(embedding_dimension: Option<usize>) -> Self {
        let now = Timestamp::now();
        Self {
            schema_version: SCHEMA_VERSION,
            embedding_dimension,
            created_at: now,
            last_opened_at: now,
            next_document_id: 1,
            next_sentence_id: 1,
        }
    }

    /// Stamps `last_opened_at` with the current time.
    pub fn touch(&mut self) {
        self.last_opened_at = Timestamp::now();
    }

    /// Whether this build can read the file.
    pub fn is_compatible(&self) -> bool {
        self.schema_version == SCHEMA_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_metadata_counters_start_at_one() {
        let meta = DatabaseMetadata::new(Some(384));
        assert_eq!(meta.schema_version, SCHEMA_VERSION);
        assert_eq!(meta.embedding_dimension, Some(384));
        assert_eq!(meta.next_document_id, 1);
        assert_eq!(meta.next_sentence_id, 1);
        assert!(meta.is_compatible());
    }

    #[test]
    fn test_touch_advances_last_opened() {
        let mut meta = DatabaseMetadata::new(None);
        let original = meta.last_opened_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        meta.touch();
        assert!(meta.last_opened_at > original);
    }

    #[test]
    fn test_metadata_bincode_round_trip() {
        let mut meta = DatabaseMetadata::new(None);
        meta.next_sentence_id = 42;
        let bytes = bincode::serialize(&meta).unwrap();
        let restored: DatabaseMetadata = bincode::deserialize(&bytes).unwrap();
        assert_eq!(meta, restored);
    }
}
