//! Configuration types for SentenceDB.
//!
//! The [`Config`] struct controls database behavior including:
//! - Embedding dimension (pre-declared or discovered on first insert)
//! - Ingestion batch size
//! - Similarity index variant and artifact location
//! - Durability settings
//!
//! # Example
//! ```rust
//! use sentencedb::{Config, IndexConfig, IndexKind, SyncMode};
//!
//! // Use defaults (flat index, batch size 32, dimension discovered on first insert)
//! let config = Config::default();
//!
//! // Customize for a large corpus
//! let config = Config {
//!     embedding_dimension: Some(384),
//!     batch_size: 64,
//!     sync_mode: SyncMode::Paranoid,
//!     index: IndexConfig {
//!         kind: IndexKind::InvertedFile,
//!         nprobe: 16,
//!         ..Default::default()
//!     },
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Largest embedding dimension accepted by the store.
pub const MAX_EMBEDDING_DIMENSION: usize = 4096;

/// Database configuration options.
///
/// All fields have sensible defaults. Use struct update syntax to override
/// specific settings:
///
/// ```rust
/// use sentencedb::Config;
///
/// let config = Config {
///     batch_size: 128,
///     ..Default::default()
/// };
/// ```
#[derive(Clone, Debug)]
pub struct Config {
    /// Embedding vector dimension.
    ///
    /// `None` lets the first successful insert fix the dimension. When set,
    /// it must agree with whatever dimension an existing database recorded.
    pub embedding_dimension: Option<usize>,

    /// Number of sentences encoded per embedding call during ingestion.
    ///
    /// Default: 32
    pub batch_size: usize,

    /// Durability mode for write operations.
    pub sync_mode: SyncMode,

    /// Similarity index settings.
    pub index: IndexConfig,

    /// Rebuild the index after an ingestion call that embedded at least one sentence.
    pub rebuild_after_ingest: bool,

    /// Maximum size of a single sentence in bytes.
    ///
    /// Default: 100 KB
    pub max_sentence_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            embedding_dimension: None,
            batch_size: 32,
            sync_mode: SyncMode::Normal,
            index: IndexConfig::default(),
            rebuild_after_ingest: false,
            max_sentence_bytes: 100 * 1024,
        }
    }
}

impl Config {
    /// Creates a new Config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a Config with a pre-declared embedding dimension.
    ///
    /// # Example
    /// ```rust
    /// use sentencedb::Config;
    ///
    /// // all-MiniLM-L6-v2
    /// let config = Config::with_dimension(384);
    /// assert_eq!(config.embedding_dimension, Some(384));
    /// ```
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            embedding_dimension: Some(dimension),
            ..Default::default()
        }
    }

    /// Validates the configuration.
    ///
    /// Called automatically by `SentenceDB::open()`.
    ///
    /// # Errors
    /// Returns `ValidationError` if:
    /// - `batch_size` is 0
    /// - `embedding_dimension` is 0 or > 4096
    /// - `index.nprobe` is 0
    /// - `max_sentence_bytes` is 0
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.batch_size == 0 {
            return Err(ValidationError::invalid_field(
                "batch_size",
                "must be greater than 0",
            ));
        }

        if let Some(dim) = self.embedding_dimension {
            if dim == 0 {
                return Err(ValidationError::invalid_field(
                    "embedding_dimension",
                    "dimension must be greater than 0",
                ));
            }
            if dim > MAX_EMBEDDING_DIMENSION {
                return Err(ValidationError::invalid_field(
                    "embedding_dimension",
                    format!("dimension must not exceed {}", MAX_EMBEDDING_DIMENSION),
                ));
            }
        }

        if self.index.nprobe == 0 {
            return Err(ValidationError::invalid_field(
                "index.nprobe",
                "must be greater than 0",
            ));
        }

        if self.max_sentence_bytes == 0 {
            return Err(ValidationError::invalid_field(
                "max_sentence_bytes",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

/// Similarity index settings.
#[derive(Clone, Debug)]
pub struct IndexConfig {
    /// Index variant built by default.
    pub kind: IndexKind,

    /// Number of clusters probed per query by the inverted-file variant.
    ///
    /// Clamped to the number of clusters at search time. Ignored by the flat
    /// variant. Default: 8
    pub nprobe: usize,

    /// Directory holding the index artifacts.
    ///
    /// `None` places them next to the database file.
    pub dir: Option<PathBuf>,

    /// Base name of the index artifacts.
    ///
    /// `None` uses the database file stem.
    pub name: Option<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            kind: IndexKind::Flat,
            nprobe: 8,
            dir: None,
            name: None,
        }
    }
}

impl IndexConfig {
    /// Resolves the artifact directory and base name for a database at `db_path`.
    pub fn resolve(&self, db_path: &Path) -> (PathBuf, String) {
        let dir = self.dir.clone().unwrap_or_else(|| {
            db_path
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        });
        let name = self.name.clone().unwrap_or_else(|| {
            db_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "similarity_index".to_string())
        });
        (dir, name)
    }
}

/// Requested similarity index variant.
///
/// The resolved parameters of a built index (cluster count, probe count) are
/// reported by [`IndexVariant`](crate::index::IndexVariant).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Exact search by full linear scan.
    #[default]
    Flat,

    /// Clustered search probing a subset of trained partitions.
    InvertedFile,
}

impl IndexKind {
    /// Returns the canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::InvertedFile => "ivf",
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flat" => Ok(Self::Flat),
            "ivf" | "inverted_file" | "inverted-file" => Ok(Self::InvertedFile),
            other => Err(ValidationError::invalid_field(
                "index.kind",
                format!("unsupported index type '{}'", other),
            )),
        }
    }
}

/// Durability mode for write operations.
///
/// Every mode commits durably before a write call returns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Sync to disk on transaction commit.
    #[default]
    Normal,

    /// Two-phase commit on every write (slowest, strongest crash guarantees).
    Paranoid,
}

impl SyncMode {
    /// Returns true if this mode uses two-phase commit.
    pub fn is_paranoid(&self) -> bool {
        matches!(self, Self::Paranoid)
    }
}
