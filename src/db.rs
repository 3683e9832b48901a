//! SentenceDB main struct and lifecycle operations.
//!
//! The [`SentenceDB`] struct is the primary interface for interacting with
//! the database. It provides methods for:
//!
//! - Opening and closing the database
//! - Registering documents and storing sentences with their embeddings
//! - Building, rebuilding and extending the similarity index
//! - Similarity search with hydrated results
//! - Batched ingestion through an embedding service
//!
//! # Quick Start
//!
//! ```rust
//! use sentencedb::{Config, IndexKind, SentenceDB};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let db = SentenceDB::open(dir.path().join("corpus.db"), Config::default()).unwrap();
//!
//! let doc = db.add_document("notes.md", "/notes/notes.md").unwrap();
//! db.add_sentence_embedding(doc, "Rust has no GC.", 0, &[1.0, 0.0]).unwrap();
//! db.add_sentence_embedding(doc, "Ownership is checked.", 1, &[0.0, 1.0]).unwrap();
//!
//! db.build_index(IndexKind::Flat).unwrap();
//! let results = db.search(&[1.0, 0.0], 1, 0.0).unwrap().into_results();
//! assert_eq!(results[0].text, "Rust has no GC.");
//!
//! db.close().unwrap();
//! ```
//!
//! # Thread Safety
//!
//! `SentenceDB` is `Send + Sync` and can be shared across threads using `Arc`.
//! The store uses MVCC for concurrent reads with exclusive write locking;
//! index builds swap the new index in only once it is complete.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::config::{Config, IndexKind};
use crate::document::{Document, Sentence, SentenceRecord, StoreStats};
use crate::embedding::EmbeddingService;
use crate::error::{Result, SentenceDBError};
use crate::index::{CancellationFlag, IndexStats};
use crate::ingest::{FileReport, IngestReport, IngestionPipeline, SentenceSource, DEFAULT_EXTENSIONS};
use crate::search::{SearchEngine, SearchResponse};
use crate::storage::{open_storage, DatabaseMetadata, StorageEngine};
use crate::types::{DocumentId, Embedding, SentenceId};

/// The main SentenceDB database handle.
///
/// Create an instance with [`SentenceDB::open()`] and close it with
/// [`SentenceDB::close()`].
///
/// # Ownership
///
/// `SentenceDB` owns its store and search engine. When you call `close()`,
/// the database is consumed and cannot be used afterward.
pub struct SentenceDB {
    /// Storage engine, shared with the search engine and ingestion pipelines.
    storage: Arc<dyn StorageEngine>,

    /// Serving similarity index.
    engine: SearchEngine,

    /// Configuration used to open this database.
    config: Config,
}

impl std::fmt::Debug for SentenceDB {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentenceDB")
            .field("config", &self.config)
            .field("embedding_dimension", &self.embedding_dimension())
            .finish_non_exhaustive()
    }
}

impl SentenceDB {
    /// Opens or creates a SentenceDB database at the specified path.
    ///
    /// The similarity index is not loaded here; the first search loads it
    /// from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration is invalid (see [`Config::validate`])
    /// - Database file is corrupted
    /// - Database is locked by another process
    /// - Schema version doesn't match
    /// - The configured embedding dimension conflicts with the stored one
    #[instrument(skip(config), fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        config.validate().map_err(SentenceDBError::from)?;

        info!("Opening SentenceDB");

        let storage: Arc<dyn StorageEngine> = Arc::from(open_storage(&path, &config)?);
        let (dir, name) = config.index.resolve(path.as_ref());
        let engine = SearchEngine::new(Arc::clone(&storage), dir, name).with_nprobe(config.index.nprobe);

        info!(
            dimension = ?storage.embedding_dimension(),
            sync_mode = ?config.sync_mode,
            index = %engine.paths().index.display(),
            "SentenceDB opened successfully"
        );

        Ok(Self {
            storage,
            engine,
            config,
        })
    }

    /// Closes the database.
    ///
    /// Consumes the handle. Every write was already committed when its call
    /// returned, so closing only releases the file lock.
    #[instrument(skip(self))]
    pub fn close(self) -> Result<()> {
        info!("Closing SentenceDB");
        drop(self.engine);
        drop(self.storage);
        info!("SentenceDB closed successfully");
        Ok(())
    }

    /// Returns the configuration used to open this database.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns a snapshot of the database metadata.
    pub fn metadata(&self) -> DatabaseMetadata {
        self.storage.metadata()
    }

    /// Returns the established embedding dimension, if any.
    pub fn embedding_dimension(&self) -> Option<usize> {
        self.storage.embedding_dimension()
    }

    /// Returns the search engine serving this database's index.
    #[inline]
    pub fn search_engine(&self) -> &SearchEngine {
        &self.engine
    }

    // =========================================================================
    // Store
    // =========================================================================

    /// Registers a document; an already known `path` returns its existing id.
    pub fn add_document(&self, filename: &str, path: &str) -> Result<DocumentId> {
        self.storage.add_document(filename, path)
    }

    /// Retrieves a document by id.
    pub fn get_document(&self, id: DocumentId) -> Result<Option<Document>> {
        self.storage.get_document(id)
    }

    /// Lists all documents in ascending id order.
    pub fn list_documents(&self) -> Result<Vec<Document>> {
        self.storage.list_documents()
    }

    /// Stores a sentence without an embedding.
    pub fn add_sentence(&self, document_id: DocumentId, text: &str, position: u32) -> Result<SentenceId> {
        self.storage.add_sentence(document_id, text, position)
    }

    /// Stores a sentence with its embedding.
    ///
    /// The index is not updated; call [`add_vectors`](Self::add_vectors) or
    /// rebuild to make the sentence searchable.
    pub fn add_sentence_embedding(
        &self,
        document_id: DocumentId,
        text: &str,
        position: u32,
        vector: &[f32],
    ) -> Result<SentenceId> {
        self.storage
            .add_sentence_embedding(document_id, text, position, vector)
    }

    /// Looks up a sentence joined with its document.
    pub fn sentence_by_id(&self, id: SentenceId) -> Result<Option<SentenceRecord>> {
        self.storage.sentence_by_id(id)
    }

    /// Returns a document's sentences ordered by position.
    pub fn document_sentences(&self, document_id: DocumentId) -> Result<Vec<Sentence>> {
        self.storage.document_sentences(document_id)
    }

    /// Returns every stored embedding in ascending sentence-id order.
    pub fn all_embeddings(&self) -> Result<Vec<(SentenceId, Embedding)>> {
        self.storage.all_embeddings()
    }

    /// Returns record counts.
    pub fn stats(&self) -> Result<StoreStats> {
        self.storage.stats()
    }

    /// Deletes all documents, sentences and embeddings, and discards the index.
    ///
    /// Searches report the index as unavailable until the next build.
    #[instrument(skip(self))]
    pub fn clear(&self) -> Result<()> {
        self.storage.clear()?;
        self.engine.discard("store was cleared")?;
        info!("Database cleared");
        Ok(())
    }

    // =========================================================================
    // Index
    // =========================================================================

    /// Builds an index over all stored embeddings and starts serving it.
    ///
    /// # Errors
    ///
    /// `IndexError::EmptyCorpus` if no embeddings are stored.
    pub fn build_index(&self, kind: IndexKind) -> Result<IndexStats> {
        self.engine.build(kind, &CancellationFlag::new())
    }

    /// Like [`build_index`](Self::build_index), stopping early if `cancel` fires.
    pub fn build_index_with_cancel(&self, kind: IndexKind, cancel: &CancellationFlag) -> Result<IndexStats> {
        self.engine.build(kind, cancel)
    }

    /// Discards the current index and its files and builds a new one.
    pub fn rebuild_index(&self, kind: IndexKind) -> Result<IndexStats> {
        self.engine.rebuild(kind, &CancellationFlag::new())
    }

    /// Like [`rebuild_index`](Self::rebuild_index), stopping early if `cancel` fires.
    pub fn rebuild_index_with_cancel(
        &self,
        kind: IndexKind,
        cancel: &CancellationFlag,
    ) -> Result<IndexStats> {
        self.engine.rebuild(kind, cancel)
    }

    /// Appends vectors to the serving index and persists it.
    pub fn add_vectors(&self, sentence_ids: &[SentenceId], vectors: &[Embedding]) -> Result<IndexStats> {
        self.engine.add_vectors(sentence_ids, vectors)
    }

    /// Returns statistics of the serving index, or `None` if none is available.
    pub fn index_stats(&self) -> Result<Option<IndexStats>> {
        self.engine.get_index_stats()
    }

    /// Runs an index build on tokio's blocking thread pool.
    ///
    /// Searches keep using the previous index until the build completes.
    /// Must be called from within a tokio runtime.
    ///
    /// ```rust
    /// # use std::sync::Arc;
    /// # use sentencedb::{CancellationFlag, Config, IndexKind, SentenceDB};
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// # let dir = tempfile::tempdir().unwrap();
    /// let db = Arc::new(SentenceDB::open(dir.path().join("c.db"), Config::default()).unwrap());
    /// # let doc = db.add_document("a.md", "/a.md").unwrap();
    /// # db.add_sentence_embedding(doc, "hello", 0, &[1.0]).unwrap();
    /// let stats = db
    ///     .spawn_build(IndexKind::Flat, CancellationFlag::new())
    ///     .await
    ///     .unwrap()
    ///     .unwrap();
    /// assert_eq!(stats.total_vectors, 1);
    /// # }
    /// ```
    pub fn spawn_build(
        self: &Arc<Self>,
        kind: IndexKind,
        cancel: CancellationFlag,
    ) -> tokio::task::JoinHandle<Result<IndexStats>> {
        let db = Arc::clone(self);
        tokio::task::spawn_blocking(move || db.engine.build(kind, &cancel))
    }

    // =========================================================================
    // Search
    // =========================================================================

    /// Returns up to `k` sentences scoring at least `threshold` against `query`.
    ///
    /// See [`SearchEngine::search`].
    pub fn search(&self, query: &[f32], k: usize, threshold: f32) -> Result<SearchResponse> {
        self.engine.search(query, k, threshold)
    }

    /// Encodes `text` with `embedder` and searches for it.
    pub fn search_text(
        &self,
        text: &str,
        k: usize,
        threshold: f32,
        embedder: &dyn EmbeddingService,
    ) -> Result<SearchResponse> {
        let query = embedder.embed(text)?;
        embedder.validate_embedding(&query)?;
        self.engine.search(&query, k, threshold)
    }

    // =========================================================================
    // Ingestion
    // =========================================================================

    /// Returns an ingestion pipeline writing into this database.
    pub fn ingestion<'a>(&self, embedder: &'a dyn EmbeddingService) -> IngestionPipeline<'a> {
        IngestionPipeline::new(Arc::clone(&self.storage), embedder).with_batch_size(self.config.batch_size)
    }

    /// Ingests the sentences of one document.
    ///
    /// Rebuilds the index afterwards if `rebuild_after_ingest` is set and
    /// anything was embedded.
    pub fn ingest_sentences(
        &self,
        filename: &str,
        path: &str,
        sentences: &[String],
        embedder: &dyn EmbeddingService,
    ) -> Result<FileReport> {
        let report = self
            .ingestion(embedder)
            .ingest_sentences(filename, path, sentences)?;
        self.after_ingest(report.embedded)?;
        Ok(report)
    }

    /// Ingests one file through `source`.
    pub fn ingest_file(
        &self,
        path: &Path,
        source: &dyn SentenceSource,
        embedder: &dyn EmbeddingService,
    ) -> Result<FileReport> {
        let report = self.ingestion(embedder).ingest_file(path, source)?;
        self.after_ingest(report.embedded)?;
        Ok(report)
    }

    /// Ingests every `.md` and `.txt` file under `dir`.
    pub fn ingest_directory(
        &self,
        dir: &Path,
        source: &dyn SentenceSource,
        embedder: &dyn EmbeddingService,
    ) -> Result<IngestReport> {
        let report = self
            .ingestion(embedder)
            .ingest_directory(dir, source, DEFAULT_EXTENSIONS)?;
        self.after_ingest(report.total_embedded())?;
        Ok(report)
    }

    fn after_ingest(&self, embedded: usize) -> Result<()> {
        if !self.config.rebuild_after_ingest || embedded == 0 {
            return Ok(());
        }
        info!(embedded = embedded, "Rebuilding index after ingestion");
        match self.engine.rebuild(self.config.index.kind, &CancellationFlag::new()) {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(error = %e, "Index rebuild after ingestion failed");
                Err(e)
            }
        }
    }
}

// SentenceDB is auto Send + Sync: Arc<dyn StorageEngine> (StorageEngine:
// Send + Sync), SearchEngine and Config are all Send + Sync.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use tempfile::tempdir;

    #[test]
    fn test_open_creates_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = SentenceDB::open(&path, Config::default()).unwrap();

        assert!(path.exists());
        assert_eq!(db.embedding_dimension(), None);
        assert_eq!(db.search_engine().name(), "test");

        db.close().unwrap();
    }

    #[test]
    fn test_open_existing_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = SentenceDB::open(&path, Config::default()).unwrap();
        let doc = db.add_document("a.md", "/a.md").unwrap();
        db.add_sentence_embedding(doc, "one", 0, &[1.0, 0.0, 0.0]).unwrap();
        db.close().unwrap();

        let db = SentenceDB::open(&path, Config::default()).unwrap();
        assert_eq!(db.embedding_dimension(), Some(3));
        assert_eq!(db.stats().unwrap().sentences, 1);
        db.close().unwrap();
    }

    #[test]
    fn test_config_validation() {
        let dir = tempdir().unwrap();
        let invalid_config = Config {
            batch_size: 0,
            ..Default::default()
        };

        let result = SentenceDB::open(dir.path().join("test.db"), invalid_config);
        assert!(result.unwrap_err().is_validation());
    }

    #[test]
    fn test_dimension_mismatch_on_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = SentenceDB::open(&path, Config::with_dimension(4)).unwrap();
        db.close().unwrap();

        let result = SentenceDB::open(&path, Config::with_dimension(8));
        assert!(result.unwrap_err().is_dimension_mismatch());
    }

    #[test]
    fn test_index_artifacts_follow_config() {
        let dir = tempdir().unwrap();
        let config = Config {
            index: IndexConfig {
                dir: Some(dir.path().join("indexes")),
                name: Some("corpus".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let db = SentenceDB::open(dir.path().join("test.db"), config).unwrap();
        let doc = db.add_document("a.md", "/a.md").unwrap();
        db.add_sentence_embedding(doc, "one", 0, &[1.0]).unwrap();
        db.build_index(IndexKind::Flat).unwrap();

        assert!(dir.path().join("indexes").join("corpus.snix").exists());
        assert!(dir.path().join("indexes").join("corpus.snix.meta").exists());
    }

    #[test]
    fn test_clear_discards_index() {
        let dir = tempdir().unwrap();
        let db = SentenceDB::open(dir.path().join("test.db"), Config::default()).unwrap();
        let doc = db.add_document("a.md", "/a.md").unwrap();
        db.add_sentence_embedding(doc, "one", 0, &[1.0, 0.0]).unwrap();
        db.build_index(IndexKind::Flat).unwrap();

        db.clear().unwrap();

        assert!(db.stats().unwrap().is_empty());
        assert!(!db.search_engine().paths().exist());
        assert!(db.search(&[1.0, 0.0], 1, 0.0).unwrap().is_index_unavailable());
        assert!(db.build_index(IndexKind::Flat).unwrap_err().is_empty_corpus());
    }

    #[test]
    fn test_sentencedb_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SentenceDB>();
    }
}
