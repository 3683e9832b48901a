//! Ingestion outcome records.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::DocumentId;

/// A batch whose embeddings could not be obtained.
///
/// Its sentences were stored without embeddings so their text is kept.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    /// Position of the first sentence in the batch.
    pub start: u32,

    /// Position one past the last sentence in the batch.
    pub end: u32,

    /// Why encoding failed.
    pub reason: String,
}

/// Outcome of ingesting one document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReport {
    /// Path the document was registered under.
    pub path: String,

    /// Document the sentences were attached to.
    pub document_id: DocumentId,

    /// Sentences stored with an embedding.
    pub embedded: usize,

    /// Sentences stored without an embedding because their batch failed.
    pub unembedded: usize,

    /// Sentences already stored at their position by an earlier ingestion.
    pub skipped: usize,

    /// Sentences rejected by validation (blank or oversized text).
    pub rejected: usize,

    /// Batches whose encoding failed.
    pub failed_batches: Vec<BatchFailure>,
}

impl FileReport {
    /// Returns true if every batch was encoded.
    pub fn is_complete(&self) -> bool {
        self.failed_batches.is_empty()
    }
}

/// Outcome for one file of a directory ingestion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileOutcome {
    /// The file was ingested, possibly with failed batches.
    Ingested(FileReport),

    /// The file could not be ingested at all.
    Failed {
        /// File that failed.
        path: PathBuf,
        /// Why it failed.
        error: String,
    },
}

impl FileOutcome {
    /// Returns the report if the file was ingested.
    pub fn report(&self) -> Option<&FileReport> {
        match self {
            Self::Ingested(report) => Some(report),
            Self::Failed { .. } => None,
        }
    }
}

/// Outcome of a directory ingestion, one entry per candidate file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Per-file outcomes in traversal order.
    pub files: Vec<FileOutcome>,
}

impl IngestReport {
    /// Total sentences embedded across all files.
    pub fn total_embedded(&self) -> usize {
        self.files
            .iter()
            .filter_map(FileOutcome::report)
            .map(|r| r.embedded)
            .sum()
    }

    /// Number of files that were ingested.
    pub fn ingested_files(&self) -> usize {
        self.files.iter().filter(|f| f.report().is_some()).count()
    }

    /// Number of files that failed outright.
    pub fn failed_files(&self) -> usize {
        self.files.len() - self.ingested_files()
    }
}
