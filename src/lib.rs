//! # SentenceDB
//!
//! Embedded sentence-embedding store with a persistent similarity index.
//!
//! SentenceDB keeps documents, their sentences and one embedding per
//! sentence in an ACID store, builds an exact or clustered inner-product
//! index over those embeddings, persists it next to the database, and
//! answers nearest-neighbor queries with fully hydrated results.
//!
//! ## Quick Start
//!
//! ```rust
//! use sentencedb::{Config, IndexKind, SentenceDB};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let db = SentenceDB::open(dir.path().join("corpus.db"), Config::default()).unwrap();
//!
//! let doc = db.add_document("guide.md", "/docs/guide.md").unwrap();
//! db.add_sentence_embedding(doc, "Install the toolchain.", 0, &[0.9, 0.1]).unwrap();
//! db.add_sentence_embedding(doc, "Run the tests.", 1, &[0.1, 0.9]).unwrap();
//!
//! db.build_index(IndexKind::Flat).unwrap();
//!
//! let response = db.search(&[1.0, 0.0], 5, 0.5).unwrap();
//! assert_eq!(response.len(), 1);
//! assert_eq!(response.results()[0].document_filename, "guide.md");
//! ```
//!
//! ## Key Concepts
//!
//! ### Store
//!
//! The store is the **source of truth**. Documents are unique by path,
//! sentences are unique by (document, position), and every embedding has
//! the same dimension, fixed by the first one written.
//!
//! ### Index
//!
//! An index is derived from the store and can always be rebuilt. Two
//! variants exist: [`IndexKind::Flat`] (exact) and
//! [`IndexKind::InvertedFile`] (k-means clusters, approximate). Scores are
//! raw inner products; normalize vectors for cosine similarity.
//!
//! ### Availability
//!
//! A search with no loadable index returns
//! [`SearchResponse::IndexUnavailable`] instead of failing, so read paths
//! keep working while an index is missing.
//!
//! ## Thread Safety
//!
//! `SentenceDB` is `Send + Sync` and can be shared across threads using `Arc`.
//! Index builds run beside searches and swap in atomically when done.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

// ============================================================================
// Module declarations
// ============================================================================

mod config;
mod db;
mod error;
mod types;

pub mod document;
pub mod embedding;
pub mod index;
pub mod ingest;
pub mod search;
pub mod storage;

// ============================================================================
// Public API re-exports
// ============================================================================

// Main database interface
pub use db::SentenceDB;

// Configuration
pub use config::{Config, IndexConfig, IndexKind, SyncMode, MAX_EMBEDDING_DIMENSION};

// Error handling
pub use error::{
    IndexError, NotFoundError, Result, SentenceDBError, StorageError, ValidationError,
};

// Core types
pub use types::{DocumentId, Embedding, SentenceId, Timestamp};

// Domain types
pub use document::{Document, Sentence, SentenceRecord, StoreStats};

// Index
pub use index::{CancellationFlag, IndexStats, IndexVariant};

// Search
pub use search::{SearchEngine, SearchResponse, SearchResult};

// Ingestion
pub use embedding::EmbeddingService;
pub use ingest::{
    BatchFailure, FileOutcome, FileReport, IngestReport, IngestionPipeline, SentenceSource,
};

// Storage (for advanced users)
pub use storage::DatabaseMetadata;

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Convenient imports for common SentenceDB usage.
///
/// ```rust
/// use sentencedb::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{Config, IndexKind, SyncMode};
    pub use crate::db::SentenceDB;
    pub use crate::embedding::EmbeddingService;
    pub use crate::error::{Result, SentenceDBError};
    pub use crate::index::CancellationFlag;
    pub use crate::search::{SearchResponse, SearchResult};
    pub use crate::types::{DocumentId, SentenceId};
}
