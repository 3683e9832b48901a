//! Similarity search over the persisted index.
//!
//! [`SearchEngine`] owns the in-memory index and its lifecycle:
//!
//! ```text
//! Unloaded ──first access──▶ Loading ──▶ Ready(index)
//!                                   └──▶ Unavailable(reason)
//! ```
//!
//! The first search or stats call attempts exactly one load from disk. A
//! failed load is remembered; later calls report the index as unavailable
//! until a build, an incremental add or [`SearchEngine::reload`].
//!
//! Builds and incremental adds take an exclusive writer lock, construct a
//! new [`SearchIndex`] off to the side, persist it and only then swap it in.
//! Searches running meanwhile keep using the index they started with.

mod result;

pub use result::{SearchResponse, SearchResult};

use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use tracing::{debug, info, instrument, warn};

use crate::config::{IndexConfig, IndexKind};
use crate::document::validate_vector_values;
use crate::error::{IndexError, Result, SentenceDBError, ValidationError};
use crate::index::persistence::{self, IndexPaths};
use crate::index::{CancellationFlag, IndexBuilder, IndexStats, SearchIndex};
use crate::storage::StorageEngine;
use crate::types::{Embedding, SentenceId};

/// Lifecycle of the in-memory index.
#[derive(Debug)]
enum IndexState {
    Unloaded,
    Loading,
    Ready(Arc<SearchIndex>),
    Unavailable(String),
}

/// Owns a similarity index over a store and answers queries against it.
///
/// `SearchEngine` is `Send + Sync`; share it behind an `Arc`.
pub struct SearchEngine {
    storage: Arc<dyn StorageEngine>,
    dir: PathBuf,
    name: String,
    nprobe: usize,
    state: Mutex<IndexState>,
    loaded: Condvar,
    writer: Mutex<()>,
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngine")
            .field("dir", &self.dir)
            .field("name", &self.name)
            .field("nprobe", &self.nprobe)
            .finish_non_exhaustive()
    }
}

impl SearchEngine {
    /// Creates an engine whose index artifacts live at `dir/name.snix*`.
    ///
    /// Nothing is read from disk until the first search.
    pub fn new(storage: Arc<dyn StorageEngine>, dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            storage,
            dir: dir.into(),
            name: name.into(),
            nprobe: IndexConfig::default().nprobe,
            state: Mutex::new(IndexState::Unloaded),
            loaded: Condvar::new(),
            writer: Mutex::new(()),
        }
    }

    /// Sets the probe count used by inverted-file builds.
    pub fn with_nprobe(mut self, nprobe: usize) -> Self {
        self.nprobe = nprobe;
        self
    }

    /// Returns the directory holding the index artifacts.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the artifact base name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the artifact paths.
    pub fn paths(&self) -> IndexPaths {
        IndexPaths::new(&self.dir, &self.name)
    }

    /// Returns true if an index is loaded and serving.
    pub fn is_ready(&self) -> bool {
        matches!(
            self.state.lock().as_deref(),
            Ok(IndexState::Ready(_))
        )
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Returns up to `k` sentences whose embeddings score at least
    /// `threshold` against `query`.
    ///
    /// Results are ordered by descending score and ranked from 1. Index
    /// entries whose sentence is gone from the store are skipped.
    ///
    /// # Errors
    ///
    /// - `ValidationError::DimensionMismatch` if the query length differs
    ///   from the index dimension
    /// - `ValidationError::InvalidField` for an empty or non-finite query or
    ///   a NaN threshold
    ///
    /// A missing or unloadable index is not an error: the response is
    /// [`SearchResponse::IndexUnavailable`].
    pub fn search(&self, query: &[f32], k: usize, threshold: f32) -> Result<SearchResponse> {
        validate_vector_values(query)?;
        if threshold.is_nan() {
            return Err(ValidationError::invalid_field("threshold", "must not be NaN").into());
        }

        let index = match self.ensure_loaded() {
            Ok(index) => index,
            Err(SentenceDBError::Index(IndexError::Unavailable(reason))) => {
                return Ok(SearchResponse::IndexUnavailable { reason })
            }
            Err(e) => return Err(e),
        };

        if query.len() != index.dimension() {
            return Err(ValidationError::dimension_mismatch(index.dimension(), query.len()).into());
        }

        let k = k.min(index.ntotal());
        if k == 0 {
            return Ok(SearchResponse::Ready(Vec::new()));
        }

        let neighbors = index.search(query, k)?;
        let mut results = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            let Some(ordinal) = neighbor.ordinal else {
                continue;
            };
            if neighbor.score < threshold {
                continue;
            }
            let Some(sentence_id) = index.sentence_id(ordinal) else {
                warn!(ordinal = ordinal, "Index ordinal has no mapping entry, skipping");
                continue;
            };

            let record = match self.storage.sentence_by_id(sentence_id) {
                Ok(Some(record)) => record,
                Ok(None) => {
                    warn!(sentence_id = %sentence_id, "Indexed sentence missing from store, skipping");
                    continue;
                }
                Err(e) if e.is_integrity_violation() => {
                    warn!(sentence_id = %sentence_id, error = %e, "Indexed sentence cannot be hydrated, skipping");
                    continue;
                }
                Err(e) => return Err(e),
            };

            results.push(SearchResult {
                rank: results.len() + 1,
                sentence_id,
                text: record.text,
                document_id: record.document_id,
                document_filename: record.filename,
                document_path: record.path,
                position: record.position,
                score: neighbor.score,
            });
        }

        debug!(k = k, returned = results.len(), "Search complete");
        Ok(SearchResponse::Ready(results))
    }

    /// Returns statistics of the serving index, loading it if necessary.
    ///
    /// Returns `None` if no index can be made available.
    pub fn get_index_stats(&self) -> Result<Option<IndexStats>> {
        match self.ensure_loaded() {
            Ok(index) => Ok(Some(index.stats())),
            Err(e) if e.is_index_unavailable() => Ok(None),
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Builds an index over every stored embedding, persists it and swaps it in.
    ///
    /// # Errors
    ///
    /// - `IndexError::EmptyCorpus` if the store has no embeddings
    /// - `IndexError::Cancelled` if `cancel` fires
    ///
    /// On any error the previously serving index stays in place.
    #[instrument(skip(self, cancel), fields(name = %self.name))]
    pub fn build(&self, kind: IndexKind, cancel: &CancellationFlag) -> Result<IndexStats> {
        let _writer = self.lock_writer()?;

        let index = self.build_from_store(kind, cancel)?;
        persistence::save(&index, &self.dir, &self.name)?;

        let stats = index.stats();
        self.publish(IndexState::Ready(Arc::new(index)))?;
        info!(total_vectors = stats.total_vectors, "Index published");
        Ok(stats)
    }

    /// Builds afresh from the store and replaces the current index and its
    /// artifacts.
    ///
    /// If the store is empty the old artifacts are removed and the engine
    /// becomes unavailable. A cancelled or failed rebuild leaves the previous
    /// index and its files as they were.
    #[instrument(skip(self, cancel), fields(name = %self.name))]
    pub fn rebuild(&self, kind: IndexKind, cancel: &CancellationFlag) -> Result<IndexStats> {
        let _writer = self.lock_writer()?;

        let index = match self.build_from_store(kind, cancel) {
            Ok(index) => index,
            Err(e) if e.is_empty_corpus() => {
                persistence::remove_files(&self.dir, &self.name)?;
                self.publish(IndexState::Unavailable("store has no embeddings".into()))?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        persistence::save(&index, &self.dir, &self.name)?;

        let stats = index.stats();
        self.publish(IndexState::Ready(Arc::new(index)))?;
        info!(total_vectors = stats.total_vectors, "Index rebuilt");
        Ok(stats)
    }

    /// Appends vectors to the serving index and persists the result.
    ///
    /// New ordinals continue from the current vector count. The serving
    /// index is cloned, extended and swapped, so concurrent searches never
    /// see a partial append.
    ///
    /// # Errors
    ///
    /// - `IndexError::Unavailable` if there is no index to extend
    /// - `ValidationError::DimensionMismatch` if a vector has the wrong length
    #[instrument(skip(self, ids, vectors), fields(count = ids.len()))]
    pub fn add_vectors(&self, ids: &[SentenceId], vectors: &[Embedding]) -> Result<IndexStats> {
        let _writer = self.lock_writer()?;
        let current = self.ensure_loaded()?;

        for vector in vectors {
            validate_vector_values(vector)?;
        }
        let mut next = SearchIndex::clone(&current);
        next.extend(ids, vectors)?;
        persistence::save(&next, &self.dir, &self.name)?;

        let stats = next.stats();
        self.publish(IndexState::Ready(Arc::new(next)))?;
        info!(total_vectors = stats.total_vectors, "Index extended");
        Ok(stats)
    }

    /// Removes the index artifacts and stops serving.
    pub fn discard(&self, reason: &str) -> Result<()> {
        let _writer = self.lock_writer()?;
        persistence::remove_files(&self.dir, &self.name)?;
        self.publish(IndexState::Unavailable(reason.to_string()))?;
        info!(reason = reason, "Index discarded");
        Ok(())
    }

    /// Forgets the in-memory index; the next access loads from disk again.
    pub fn reload(&self) -> Result<()> {
        let _writer = self.lock_writer()?;
        self.publish(IndexState::Unloaded)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn build_from_store(&self, kind: IndexKind, cancel: &CancellationFlag) -> Result<SearchIndex> {
        let corpus = self.storage.all_embeddings()?;
        IndexBuilder::new(kind)
            .nprobe(self.nprobe)
            .build_from_corpus(corpus, cancel)
    }

    /// Returns the serving index, performing the one lazy load if needed.
    fn ensure_loaded(&self) -> Result<Arc<SearchIndex>> {
        let mut state = self.lock_state()?;
        while matches!(*state, IndexState::Loading) {
            state = self.loaded.wait(state).map_err(|_| poisoned())?;
        }
        if !matches!(*state, IndexState::Unloaded) {
            return serving(&state);
        }
        *state = IndexState::Loading;
        drop(state);

        let outcome = self.load_from_disk();

        let mut state = self.lock_state()?;
        // A build or discard may have published while the lock was released.
        if matches!(*state, IndexState::Loading) {
            *state = match outcome {
                Ok(index) => IndexState::Ready(Arc::new(index)),
                Err(e) => {
                    warn!(error = %e, "Index could not be loaded");
                    IndexState::Unavailable(e.to_string())
                }
            };
        }
        self.loaded.notify_all();
        serving(&state)
    }

    fn load_from_disk(&self) -> Result<SearchIndex> {
        let index = persistence::load(&self.dir, &self.name)?;
        if let Some(dimension) = self.storage.embedding_dimension() {
            if dimension != index.dimension() {
                return Err(IndexError::corrupted(format!(
                    "index dimension {} differs from store dimension {}",
                    index.dimension(),
                    dimension
                ))
                .into());
            }
        }
        Ok(index)
    }

    fn publish(&self, next: IndexState) -> Result<()> {
        let mut state = self.lock_state()?;
        *state = next;
        self.loaded.notify_all();
        Ok(())
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, IndexState>> {
        self.state.lock().map_err(|_| poisoned())
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, ()>> {
        self.writer
            .lock()
            .map_err(|_| IndexError::internal("index writer lock poisoned").into())
    }
}

fn serving(state: &IndexState) -> Result<Arc<SearchIndex>> {
    match state {
        IndexState::Ready(index) => Ok(Arc::clone(index)),
        IndexState::Unavailable(reason) => Err(IndexError::unavailable(reason.clone()).into()),
        IndexState::Unloaded | IndexState::Loading => {
            Err(IndexError::unavailable("index is not loaded").into())
        }
    }
}

fn poisoned() -> SentenceDBError {
    IndexError::internal("index state lock poisoned").into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::RedbStorage;
    use crate::types::DocumentId;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<dyn StorageEngine>, SearchEngine) {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn StorageEngine> =
            Arc::new(RedbStorage::open(dir.path().join("test.db"), &Config::default()).unwrap());
        let engine = SearchEngine::new(Arc::clone(&storage), dir.path(), "test");
        (dir, storage, engine)
    }

    fn insert(storage: &dyn StorageEngine, doc: DocumentId, vectors: &[[f32; 4]]) -> Vec<SentenceId> {
        vectors
            .iter()
            .enumerate()
            .map(|(i, v)| {
                storage
                    .add_sentence_embedding(doc, &format!("sentence {}", i), i as u32, v)
                    .unwrap()
            })
            .collect()
    }

    fn basis(storage: &dyn StorageEngine) -> Vec<SentenceId> {
        let doc = storage.add_document("a.md", "/docs/a.md").unwrap();
        insert(
            storage,
            doc,
            &[
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
                [1.0, 0.0, 0.0, 0.0],
            ],
        )
    }

    #[test]
    fn test_search_without_index_is_unavailable() {
        let (_dir, _storage, engine) = setup();
        let response = engine.search(&[1.0, 0.0], 3, 0.0).unwrap();
        assert!(response.is_index_unavailable());
        assert!(engine.get_index_stats().unwrap().is_none());
    }

    #[test]
    fn test_build_then_search_ranks_duplicates() {
        let (_dir, storage, engine) = setup();
        let ids = basis(storage.as_ref());
        engine.build(IndexKind::Flat, &CancellationFlag::new()).unwrap();

        let results = engine
            .search(&[1.0, 0.0, 0.0, 0.0], 2, 0.0)
            .unwrap()
            .into_results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[0].sentence_id, ids[0]);
        assert_eq!(results[1].rank, 2);
        assert_eq!(results[1].sentence_id, ids[4]);
        assert_eq!(results[0].score, 1.0);
        assert_eq!(results[1].score, 1.0);
        assert_eq!(results[1].position, 4);
        assert_eq!(results[0].document_filename, "a.md");
    }

    #[test]
    fn test_threshold_applied_after_sentinels_and_ranks_after_filter() {
        let (_dir, storage, engine) = setup();
        basis(storage.as_ref());
        engine.build(IndexKind::Flat, &CancellationFlag::new()).unwrap();

        let results = engine
            .search(&[1.0, 0.0, 0.0, 0.0], 100, 0.5)
            .unwrap()
            .into_results();
        assert_eq!(results.len(), 2);
        assert_eq!(
            results.iter().map(|r| r.rank).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let (_dir, storage, engine) = setup();
        basis(storage.as_ref());
        engine.build(IndexKind::Flat, &CancellationFlag::new()).unwrap();

        let err = engine.search(&[1.0, 0.0], 1, 0.0).unwrap_err();
        assert!(err.is_dimension_mismatch());
    }

    #[test]
    fn test_invalid_query_values_rejected() {
        let (_dir, _storage, engine) = setup();
        assert!(engine.search(&[], 1, 0.0).unwrap_err().is_validation());
        assert!(engine.search(&[f32::NAN], 1, 0.0).unwrap_err().is_validation());
        assert!(engine.search(&[1.0], 1, f32::NAN).unwrap_err().is_validation());
    }

    #[test]
    fn test_k_zero_returns_nothing() {
        let (_dir, storage, engine) = setup();
        basis(storage.as_ref());
        engine.build(IndexKind::Flat, &CancellationFlag::new()).unwrap();

        let response = engine.search(&[1.0, 0.0, 0.0, 0.0], 0, 0.0).unwrap();
        assert!(response.is_empty());
        assert!(!response.is_index_unavailable());
    }

    #[test]
    fn test_lazy_load_from_disk() {
        let (dir, storage, engine) = setup();
        basis(storage.as_ref());
        engine.build(IndexKind::Flat, &CancellationFlag::new()).unwrap();

        let fresh = SearchEngine::new(Arc::clone(&storage), dir.path(), "test");
        assert!(!fresh.is_ready());
        let stats = fresh.get_index_stats().unwrap().unwrap();
        assert_eq!(stats.total_vectors, 5);
        assert_eq!(stats.mapping_size, 5);
        assert!(fresh.is_ready());
    }

    #[test]
    fn test_failed_lazy_load_is_attempted_once() {
        let (dir, storage, engine) = setup();
        basis(storage.as_ref());
        assert!(engine.search(&[1.0, 0.0, 0.0, 0.0], 1, 0.0).unwrap().is_index_unavailable());

        // Artifacts appear behind the engine's back; it stays unavailable.
        let other = SearchEngine::new(Arc::clone(&storage), dir.path(), "test");
        other.build(IndexKind::Flat, &CancellationFlag::new()).unwrap();
        assert!(engine.search(&[1.0, 0.0, 0.0, 0.0], 1, 0.0).unwrap().is_index_unavailable());

        engine.reload().unwrap();
        assert_eq!(engine.search(&[1.0, 0.0, 0.0, 0.0], 1, 0.0).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_corpus_build_keeps_unavailable() {
        let (_dir, _storage, engine) = setup();
        let err = engine.build(IndexKind::Flat, &CancellationFlag::new()).unwrap_err();
        assert!(err.is_empty_corpus());
        assert!(engine.search(&[1.0], 1, 0.0).unwrap().is_index_unavailable());
    }

    #[test]
    fn test_cancelled_build_keeps_previous_index() {
        let (_dir, storage, engine) = setup();
        basis(storage.as_ref());
        engine.build(IndexKind::Flat, &CancellationFlag::new()).unwrap();

        let doc = storage.add_document("b.md", "/docs/b.md").unwrap();
        insert(storage.as_ref(), doc, &[[0.5, 0.5, 0.0, 0.0]]);

        let cancel = CancellationFlag::new();
        cancel.cancel();
        assert!(engine.rebuild(IndexKind::Flat, &cancel).unwrap_err().is_cancelled());

        let stats = engine.get_index_stats().unwrap().unwrap();
        assert_eq!(stats.total_vectors, 5);
        assert!(engine.paths().exist());
    }

    #[test]
    fn test_rebuild_of_empty_store_removes_artifacts() {
        let (_dir, storage, engine) = setup();
        basis(storage.as_ref());
        engine.build(IndexKind::Flat, &CancellationFlag::new()).unwrap();

        storage.clear().unwrap();
        let err = engine.rebuild(IndexKind::Flat, &CancellationFlag::new()).unwrap_err();
        assert!(err.is_empty_corpus());
        assert!(!engine.paths().exist());
        assert!(engine.search(&[1.0, 0.0, 0.0, 0.0], 1, 0.0).unwrap().is_index_unavailable());
    }

    #[test]
    fn test_add_vectors_extends_and_persists() {
        let (dir, storage, engine) = setup();
        basis(storage.as_ref());
        engine.build(IndexKind::Flat, &CancellationFlag::new()).unwrap();

        let doc = storage.add_document("b.md", "/docs/b.md").unwrap();
        let new_ids = insert(storage.as_ref(), doc, &[[0.0, 0.0, 0.6, 0.8]]);
        let stats = engine
            .add_vectors(&new_ids, &[vec![0.0, 0.0, 0.6, 0.8]])
            .unwrap();
        assert_eq!(stats.total_vectors, 6);

        let top = engine.search(&[0.0, 0.0, 0.6, 0.8], 1, 0.0).unwrap().into_results();
        assert_eq!(top[0].sentence_id, new_ids[0]);

        let reloaded = SearchEngine::new(Arc::clone(&storage), dir.path(), "test");
        assert_eq!(reloaded.get_index_stats().unwrap().unwrap().total_vectors, 6);
    }

    #[test]
    fn test_add_vectors_without_index_fails() {
        let (_dir, _storage, engine) = setup();
        let err = engine
            .add_vectors(&[SentenceId::new(1)], &[vec![1.0]])
            .unwrap_err();
        assert!(err.is_index_unavailable());
    }

    #[test]
    fn test_drifted_entries_are_skipped() {
        let (_dir, storage, engine) = setup();
        basis(storage.as_ref());
        engine.build(IndexKind::Flat, &CancellationFlag::new()).unwrap();

        // Remove every indexed sentence, then index one that still exists.
        storage.clear().unwrap();
        let doc = storage.add_document("c.md", "/docs/c.md").unwrap();
        let live = insert(storage.as_ref(), doc, &[[0.9, 0.1, 0.0, 0.0]]);
        engine.add_vectors(&live, &[vec![0.9, 0.1, 0.0, 0.0]]).unwrap();

        let results = engine.search(&[1.0, 0.0, 0.0, 0.0], 6, 0.0).unwrap().into_results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].sentence_id, live[0]);
        assert_eq!(results[0].rank, 1);
    }

    #[test]
    fn test_discard_removes_artifacts() {
        let (_dir, storage, engine) = setup();
        basis(storage.as_ref());
        engine.build(IndexKind::Flat, &CancellationFlag::new()).unwrap();

        engine.discard("cleared").unwrap();
        assert!(!engine.paths().exist());
        match engine.search(&[1.0, 0.0, 0.0, 0.0], 1, 0.0).unwrap() {
            SearchResponse::IndexUnavailable { reason } => assert_eq!(reason, "cleared"),
            other => panic!("expected unavailable, got {:?}", other),
        }
    }

    #[test]
    fn test_index_with_foreign_dimension_is_rejected() {
        let (dir, storage, engine) = setup();
        basis(storage.as_ref());

        let foreign = IndexBuilder::new(IndexKind::Flat)
            .build(vec![SentenceId::new(1)], &[vec![1.0, 0.0]], &CancellationFlag::new())
            .unwrap();
        persistence::save(&foreign, dir.path(), "test").unwrap();

        assert!(engine.search(&[1.0, 0.0], 1, 0.0).unwrap().is_index_unavailable());
    }

    #[test]
    fn test_concurrent_first_searches_share_one_load() {
        let (dir, storage, engine) = setup();
        basis(storage.as_ref());
        engine.build(IndexKind::Flat, &CancellationFlag::new()).unwrap();

        let fresh = Arc::new(SearchEngine::new(Arc::clone(&storage), dir.path(), "test"));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = Arc::clone(&fresh);
                std::thread::spawn(move || engine.search(&[1.0, 0.0, 0.0, 0.0], 2, 0.0).unwrap())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().len(), 2);
        }
    }

    #[test]
    fn test_search_engine_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SearchEngine>();
    }
}
