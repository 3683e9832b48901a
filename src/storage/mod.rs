//! Storage layer abstractions for SentenceDB.
//!
//! The store is the source of truth for documents, sentences and their
//! embeddings. Similarity indexes are derived from it and can always be
//! rebuilt from [`StorageEngine::all_embeddings`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │   SentenceDB / SearchEngine / IngestionPipeline              │
//! │                         │                                    │
//! │                         ▼                                    │
//! │              ┌─────────────────────┐                        │
//! │              │   StorageEngine     │  ← Trait               │
//! │              └─────────────────────┘                        │
//! │                         ▲                                    │
//! │                  ┌──────┴──────┐                             │
//! │                  │ RedbStorage │                             │
//! │                  └─────────────┘                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod redb;
pub mod schema;

pub use self::redb::RedbStorage;
pub use schema::{DatabaseMetadata, SCHEMA_VERSION};

use std::path::Path;

use crate::config::Config;
use crate::document::{Document, Sentence, SentenceRecord, StoreStats};
use crate::error::Result;
use crate::types::{DocumentId, Embedding, SentenceId};

/// Storage engine trait for SentenceDB.
///
/// This trait defines the contract that any storage backend must implement.
/// The primary implementation is [`RedbStorage`].
///
/// # Durability
///
/// Every write is committed before the call returns, and every read observes
/// all writes that completed before it started.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the engine is shared between the
/// database facade, the search engine and ingestion pipelines.
pub trait StorageEngine: Send + Sync {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Returns a snapshot of the database metadata.
    fn metadata(&self) -> DatabaseMetadata;

    /// Returns the established embedding dimension, if any embedding was written.
    fn embedding_dimension(&self) -> Option<usize> {
        self.metadata().embedding_dimension
    }

    /// Returns the path to the database file, if applicable.
    fn path(&self) -> Option<&Path>;

    // =========================================================================
    // Documents
    // =========================================================================

    /// Registers a document, returning the existing id if `path` is known.
    ///
    /// Concurrent calls with the same path never create two documents.
    fn add_document(&self, filename: &str, path: &str) -> Result<DocumentId>;

    /// Retrieves a document by id.
    fn get_document(&self, id: DocumentId) -> Result<Option<Document>>;

    /// Lists all documents in ascending id order.
    fn list_documents(&self) -> Result<Vec<Document>>;

    // =========================================================================
    // Sentences & embeddings
    // =========================================================================

    /// Appends a sentence without an embedding.
    ///
    /// Used when a sentence's text is kept but its encoding failed.
    ///
    /// # Errors
    ///
    /// - `StorageError::IntegrityViolation` if the document is unknown or
    ///   already has a sentence at `position`
    fn add_sentence(&self, document_id: DocumentId, text: &str, position: u32)
        -> Result<SentenceId>;

    /// Appends a sentence and its embedding atomically.
    ///
    /// The first successful call fixes the store's dimension.
    ///
    /// # Errors
    ///
    /// - `ValidationError::DimensionMismatch` if `vector.len()` differs from
    ///   the established dimension; nothing is written
    /// - `StorageError::IntegrityViolation` if the document is unknown or
    ///   already has a sentence at `position`
    fn add_sentence_embedding(
        &self,
        document_id: DocumentId,
        text: &str,
        position: u32,
        vector: &[f32],
    ) -> Result<SentenceId>;

    /// Looks up a sentence joined with its document.
    ///
    /// Returns `None` if no sentence with the given id exists.
    fn sentence_by_id(&self, id: SentenceId) -> Result<Option<SentenceRecord>>;

    /// Returns a document's sentences ordered by position.
    fn document_sentences(&self, document_id: DocumentId) -> Result<Vec<Sentence>>;

    /// Returns every stored embedding in ascending sentence-id order.
    ///
    /// Two calls without an intervening write return identical sequences.
    fn all_embeddings(&self) -> Result<Vec<(SentenceId, Embedding)>>;

    /// Returns record counts.
    fn stats(&self) -> Result<StoreStats>;

    /// Deletes all documents, sentences and embeddings.
    ///
    /// Identifier counters and the established dimension survive, so ids are
    /// never reused within the store's lifetime.
    fn clear(&self) -> Result<()>;
}

/// Opens a storage engine at the given path.
///
/// This is a convenience function that creates a [`RedbStorage`] instance.
///
/// # Errors
///
/// Returns an error if:
/// - The database file is corrupted
/// - The database is locked by another process
/// - Schema version doesn't match
/// - Embedding dimension doesn't match (for existing databases)
pub fn open_storage(path: impl AsRef<Path>, config: &Config) -> Result<Box<dyn StorageEngine>> {
    let storage = RedbStorage::open(path, config)?;
    Ok(Box::new(storage))
}
