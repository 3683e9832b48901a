//! Batched ingestion of sentences into the store.
//!
//! The pipeline encodes sentences in fixed-size batches, one
//! [`EmbeddingService::embed_batch`] call per batch, and writes each
//! sentence with its embedding as its own record. A batch that fails to
//! encode is reported and its sentences are stored without embeddings;
//! ingestion carries on with the next batch.
//!
//! Splitting files into sentences is not done here. Directory and file
//! ingestion ask a [`SentenceSource`] for a file's sentences.

mod types;

pub use types::{BatchFailure, FileOutcome, FileReport, IngestReport};

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::embedding::EmbeddingService;
use crate::error::{Result, ValidationError};
use crate::storage::StorageEngine;
use crate::types::Embedding;

/// File extensions ingested by default.
pub const DEFAULT_EXTENSIONS: &[&str] = &["md", "txt"];

/// Supplies the sentences of a file, in document order.
///
/// Any `Fn(&Path) -> Result<Vec<String>>` closure is a source.
pub trait SentenceSource: Send + Sync {
    /// Extracts the sentences of the file at `path`.
    fn sentences(&self, path: &Path) -> Result<Vec<String>>;
}

impl<F> SentenceSource for F
where
    F: Fn(&Path) -> Result<Vec<String>> + Send + Sync,
{
    fn sentences(&self, path: &Path) -> Result<Vec<String>> {
        self(path)
    }
}

/// Writes embedded sentences through a [`StorageEngine`].
pub struct IngestionPipeline<'a> {
    storage: Arc<dyn StorageEngine>,
    embedder: &'a dyn EmbeddingService,
    batch_size: usize,
}

impl<'a> IngestionPipeline<'a> {
    /// Creates a pipeline with the default batch size.
    pub fn new(storage: Arc<dyn StorageEngine>, embedder: &'a dyn EmbeddingService) -> Self {
        Self {
            storage,
            embedder,
            batch_size: Config::default().batch_size,
        }
    }

    /// Sets the number of sentences encoded per call. Zero is treated as 1.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Returns the batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Ingests the sentences of one document.
    ///
    /// The document is registered by `path` (an already known path reuses
    /// its document). Sentence `i` is stored at position `i`; positions that
    /// already hold a sentence are skipped, so re-ingesting a file only adds
    /// what is missing.
    ///
    /// # Errors
    ///
    /// - `ValidationError::DimensionMismatch` if the embedding service's
    ///   dimension differs from the store's; nothing is written
    /// - Storage errors from registering the document or writing records
    ///
    /// Encoding failures are not errors; they appear in
    /// [`FileReport::failed_batches`].
    #[instrument(skip(self, sentences), fields(count = sentences.len()))]
    pub fn ingest_sentences(
        &self,
        filename: &str,
        path: &str,
        sentences: &[String],
    ) -> Result<FileReport> {
        if let Some(dimension) = self.storage.embedding_dimension() {
            if self.embedder.dimension() != dimension {
                return Err(
                    ValidationError::dimension_mismatch(dimension, self.embedder.dimension()).into(),
                );
            }
        }
        if sentences.len() > u32::MAX as usize {
            return Err(ValidationError::invalid_field(
                "sentences",
                format!("{} sentences exceed the position range", sentences.len()),
            )
            .into());
        }

        let document_id = self.storage.add_document(filename, path)?;
        let existing: HashSet<u32> = self
            .storage
            .document_sentences(document_id)?
            .into_iter()
            .map(|s| s.position)
            .collect();

        let mut report = FileReport {
            path: path.to_string(),
            document_id,
            embedded: 0,
            unembedded: 0,
            skipped: 0,
            rejected: 0,
            failed_batches: Vec::new(),
        };

        for (batch, chunk) in sentences.chunks(self.batch_size).enumerate() {
            let start = (batch * self.batch_size) as u32;
            let pending: Vec<(u32, &str)> = chunk
                .iter()
                .enumerate()
                .map(|(offset, text)| (start + offset as u32, text.as_str()))
                .filter(|(position, _)| !existing.contains(position))
                .collect();
            report.skipped += chunk.len() - pending.len();
            if pending.is_empty() {
                continue;
            }

            let texts: Vec<&str> = pending.iter().map(|(_, text)| *text).collect();
            let vectors = match self.embed_checked(&texts) {
                Ok(vectors) => Some(vectors),
                Err(reason) => {
                    let first = pending[0].0;
                    let last = pending[pending.len() - 1].0;
                    self.record_failure(&mut report, first, last + 1, reason);
                    None
                }
            };

            match vectors {
                Some(vectors) => {
                    for ((position, text), vector) in pending.iter().zip(&vectors) {
                        let outcome = self.storage.add_sentence_embedding(
                            document_id,
                            text,
                            *position,
                            vector,
                        );
                        if tally(&mut report, outcome, *position)? {
                            report.embedded += 1;
                        }
                    }
                }
                None => {
                    for (position, text) in &pending {
                        let outcome = self.storage.add_sentence(document_id, text, *position);
                        if tally(&mut report, outcome, *position)? {
                            report.unembedded += 1;
                        }
                    }
                }
            }
        }

        info!(
            document_id = %document_id,
            embedded = report.embedded,
            failed_batches = report.failed_batches.len(),
            "Document ingested"
        );
        Ok(report)
    }

    /// Ingests one file, registering it under its file name and full path.
    pub fn ingest_file(&self, path: &Path, source: &dyn SentenceSource) -> Result<FileReport> {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| ValidationError::invalid_field("path", "has no file name"))?;
        let sentences = source.sentences(path)?;
        self.ingest_sentences(&filename, &path.to_string_lossy(), &sentences)
    }

    /// Ingests every file under `dir` whose extension is in `extensions`.
    ///
    /// Extensions match case-insensitively. Files are visited in file-name
    /// order. A file that fails is recorded in the report and the walk
    /// continues.
    ///
    /// # Errors
    ///
    /// `ValidationError::InvalidField` if `dir` is not a directory.
    #[instrument(skip(self, source, extensions), fields(dir = %dir.display()))]
    pub fn ingest_directory(
        &self,
        dir: &Path,
        source: &dyn SentenceSource,
        extensions: &[&str],
    ) -> Result<IngestReport> {
        if !dir.is_dir() {
            return Err(ValidationError::invalid_field(
                "dir",
                format!("{} is not a directory", dir.display()),
            )
            .into());
        }

        let mut report = IngestReport::default();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().unwrap_or(dir).to_path_buf();
                    warn!(path = %path.display(), error = %e, "Cannot read directory entry");
                    report.files.push(FileOutcome::Failed {
                        path,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            if !entry.file_type().is_file() || !has_extension(entry.path(), extensions) {
                continue;
            }

            match self.ingest_file(entry.path(), source) {
                Ok(file) => report.files.push(FileOutcome::Ingested(file)),
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "File ingestion failed");
                    report.files.push(FileOutcome::Failed {
                        path: entry.path().to_path_buf(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            files = report.files.len(),
            failed = report.failed_files(),
            embedded = report.total_embedded(),
            "Directory ingested"
        );
        Ok(report)
    }

    /// Embeds one batch and checks every vector before anything is written.
    ///
    /// Returns the failure reason if the service errs, answers with the wrong
    /// number of vectors, or returns a vector of the wrong dimension.
    fn embed_checked(&self, texts: &[&str]) -> std::result::Result<Vec<Embedding>, String> {
        let vectors = self.embedder.embed_batch(texts).map_err(|e| e.to_string())?;
        if vectors.len() != texts.len() {
            return Err(format!(
                "embedding service returned {} vectors for {} sentences",
                vectors.len(),
                texts.len()
            ));
        }
        for vector in &vectors {
            self.embedder
                .validate_embedding(vector)
                .map_err(|e| e.to_string())?;
        }
        Ok(vectors)
    }

    fn record_failure(&self, report: &mut FileReport, start: u32, end: u32, reason: String) {
        warn!(
            document_id = %report.document_id,
            start = start,
            reason = %reason,
            "Embedding batch failed"
        );
        report.failed_batches.push(BatchFailure {
            start,
            end,
            reason,
        });
    }
}

/// Folds one record write into the report.
///
/// Returns `Ok(true)` if the record was written. Validation failures of a
/// single sentence are counted as rejected; a dimension mismatch and
/// storage failures abort the file.
fn tally<T>(report: &mut FileReport, outcome: Result<T>, position: u32) -> Result<bool> {
    match outcome {
        Ok(_) => Ok(true),
        Err(e) if e.is_validation() && !e.is_dimension_mismatch() => {
            debug!(position = position, error = %e, "Sentence rejected");
            report.rejected += 1;
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
}

impl std::fmt::Debug for IngestionPipeline<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionPipeline")
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}
