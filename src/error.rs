//! Error types for SentenceDB.
//!
//! Every public API returns [`SentenceDBError`]. It wraps one detailed error
//! per subsystem: [`StorageError`] for the redb store, [`ValidationError`]
//! for caller input, [`IndexError`] for building, persisting and loading the
//! similarity index, and [`NotFoundError`] for missing records.
//!
//! ```rust,ignore
//! use sentencedb::{Config, Result, SentenceDB};
//!
//! fn count_documents() -> Result<usize> {
//!     let db = SentenceDB::open("./sentences.db", Config::default())?;
//!     let n = db.list_documents()?.len();
//!     db.close()?;
//!     Ok(n)
//! }
//! ```

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SentenceDBError>;

/// Error returned by every public SentenceDB operation.
///
/// Match on the variant, or use the `is_*` predicates for the cases callers
/// usually branch on (dimension mismatch, empty corpus, unavailable index).
#[derive(Debug, Error)]
pub enum SentenceDBError {
    /// The sentence store failed.
    #[error("store error: {0}")]
    Storage(#[from] StorageError),

    /// Caller-supplied input was rejected.
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    /// The similarity index could not be built, saved or loaded.
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// The configuration cannot be used.
    #[error("invalid configuration: {reason}")]
    Config {
        /// What is wrong.
        reason: String,
    },

    /// A record addressed by id does not exist.
    #[error("{0}")]
    NotFound(#[from] NotFoundError),

    /// Filesystem failure outside redb (index artifacts, ingested files).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The embedding service failed to encode text.
    #[error("embedding service failed: {0}")]
    Embedding(String),
}

impl SentenceDBError {
    /// Builds a [`SentenceDBError::Config`].
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Builds a [`SentenceDBError::Embedding`].
    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::Embedding(msg.into())
    }

    /// Returns true for [`SentenceDBError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true for [`SentenceDBError::Validation`].
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true for [`SentenceDBError::Storage`].
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true for [`SentenceDBError::Index`].
    pub fn is_index(&self) -> bool {
        matches!(self, Self::Index(_))
    }

    /// A vector's length disagreed with the established dimension.
    pub fn is_dimension_mismatch(&self) -> bool {
        matches!(
            self,
            Self::Validation(ValidationError::DimensionMismatch { .. })
        )
    }

    /// A build was requested while the store held no embeddings.
    pub fn is_empty_corpus(&self) -> bool {
        matches!(self, Self::Index(IndexError::EmptyCorpus))
    }

    /// No index is loaded and none could be loaded from disk.
    pub fn is_index_unavailable(&self) -> bool {
        matches!(self, Self::Index(IndexError::Unavailable(_)))
    }

    /// Persisted data (index artifacts or store records) failed validation.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Index(IndexError::Corrupted(_))
                | Self::Index(IndexError::UnsupportedVersion { .. })
                | Self::Storage(StorageError::Corrupted(_))
        )
    }

    /// A sentence referenced a missing document, or a position was reused.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, Self::Storage(StorageError::IntegrityViolation(_)))
    }

    /// The caller's [`CancellationFlag`](crate::CancellationFlag) fired mid-build.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Index(IndexError::Cancelled))
    }
}

/// Failures of the redb-backed sentence store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Stored records could not be decoded or disagree with each other.
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// Another process has the database file open.
    #[error("store file is held by another process")]
    DatabaseLocked,

    /// Begin or commit failed.
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// A record could not be encoded or decoded with bincode.
    #[error("record encoding failed: {0}")]
    Serialization(String),

    /// Any other failure reported by redb.
    #[error("redb: {0}")]
    Redb(String),

    /// The file was written by an incompatible schema.
    #[error("store schema v{found} cannot be opened (this build reads v{expected})")]
    SchemaVersionMismatch {
        /// Schema version this build reads.
        expected: u32,
        /// Schema version stored in the file.
        found: u32,
    },

    /// A write would break document references or position uniqueness.
    #[error("store integrity violation: {0}")]
    IntegrityViolation(String),
}

impl StorageError {
    /// Builds a [`StorageError::Corrupted`].
    pub fn corrupted(msg: impl Into<String>) -> Self {
        Self::Corrupted(msg.into())
    }

    /// Builds a [`StorageError::Serialization`].
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Builds a [`StorageError::IntegrityViolation`].
    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::IntegrityViolation(msg.into())
    }
}

/// Maps a redb error type onto a [`StorageError`] variant and lifts it
/// straight into [`SentenceDBError`] so `?` works on both levels.
macro_rules! storage_conversion {
    ($source:ty => $variant:ident) => {
        impl From<$source> for StorageError {
            fn from(err: $source) -> Self {
                StorageError::$variant(err.to_string())
            }
        }

        impl From<$source> for SentenceDBError {
            fn from(err: $source) -> Self {
                SentenceDBError::Storage(StorageError::from(err))
            }
        }
    };
}

storage_conversion!(redb::Error => Redb);
storage_conversion!(redb::DatabaseError => Redb);
storage_conversion!(redb::TableError => Redb);
storage_conversion!(redb::StorageError => Redb);
storage_conversion!(redb::TransactionError => Transaction);
storage_conversion!(redb::CommitError => Transaction);
storage_conversion!(bincode::Error => Serialization);

/// Rejected caller input. Nothing is written when one of these is returned.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A vector's length differs from the store or index dimension.
    #[error("expected a {expected}-dimensional vector, got {got}")]
    DimensionMismatch {
        /// Established dimension.
        expected: usize,
        /// Length of the rejected vector.
        got: usize,
    },

    /// A value is out of range or malformed.
    #[error("{field}: {reason}")]
    InvalidField {
        /// Offending field or parameter.
        field: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Sentence text exceeds `Config::max_sentence_bytes`.
    #[error("text is {size} bytes, limit is {max}")]
    ContentTooLarge {
        /// Length of the rejected text in bytes.
        size: usize,
        /// Configured limit in bytes.
        max: usize,
    },

    /// A text field or vector was empty.
    #[error("{field} must not be empty")]
    RequiredField {
        /// The empty field.
        field: String,
    },
}

impl ValidationError {
    /// Builds a [`ValidationError::DimensionMismatch`].
    pub fn dimension_mismatch(expected: usize, got: usize) -> Self {
        Self::DimensionMismatch { expected, got }
    }

    /// Builds a [`ValidationError::InvalidField`].
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Builds a [`ValidationError::ContentTooLarge`].
    pub fn content_too_large(size: usize, max: usize) -> Self {
        Self::ContentTooLarge { size, max }
    }

    /// Builds a [`ValidationError::RequiredField`].
    pub fn required_field(field: impl Into<String>) -> Self {
        Self::RequiredField {
            field: field.into(),
        }
    }
}

/// Similarity index errors.
#[derive(Debug, Error)]
pub enum IndexError {
    /// A build was requested but the store holds no embeddings.
    #[error("cannot build an index over an empty corpus")]
    EmptyCorpus,

    /// No index is loaded and none could be loaded from disk.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Persisted index artifacts are malformed, truncated or inconsistent.
    #[error("artifacts corrupted: {0}")]
    Corrupted(String),

    /// Persisted artifacts were written by an unknown format version.
    #[error("unsupported format version {found} (expected {expected})")]
    UnsupportedVersion {
        /// Format version this build understands.
        expected: u32,
        /// Format version found on disk.
        found: u32,
    },

    /// The caller cancelled a build before it finished.
    #[error("build cancelled")]
    Cancelled,

    /// Another process holds the artifact lock.
    #[error("artifacts are locked by another writer")]
    ArtifactsLocked,

    /// Internal invariant failure (poisoned lock, worker panic).
    #[error("internal: {0}")]
    Internal(String),
}

impl IndexError {
    /// Builds an [`IndexError::Unavailable`].
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }

    /// Builds an [`IndexError::Corrupted`].
    pub fn corrupted(msg: impl Into<String>) -> Self {
        Self::Corrupted(msg.into())
    }

    /// Builds an [`IndexError::Internal`].
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// A record addressed by id does not exist.
#[derive(Debug, Error)]
pub enum NotFoundError {
    /// Unknown document id.
    #[error("no document with id {0}")]
    Document(String),
}

impl NotFoundError {
    /// Builds a [`NotFoundError::Document`].
    pub fn document(id: impl ToString) -> Self {
        Self::Document(id.to_string())
    }
}
