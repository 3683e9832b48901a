//! Index construction from a store snapshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, instrument};

use super::{flatten, FlatIndex, IndexStructure, IvfIndex, SearchIndex, VectorIndex};
use crate::config::{IndexConfig, IndexKind};
use crate::error::{IndexError, Result, ValidationError};
use crate::types::{Embedding, SentenceId};

/// Upper bound on the number of inverted lists.
pub const MAX_INVERTED_LISTS: usize = 100;

/// Vectors added per step between cancellation checks.
const ADD_CHUNK: usize = 4096;

/// Number of inverted lists for a corpus of `n` vectors.
///
/// `min(100, n / 10)`, but never below 1. Corpora under 20 vectors get a
/// single list, which searches exactly like a flat index.
pub fn inverted_file_lists(n: usize) -> usize {
    (n / 10).clamp(1, MAX_INVERTED_LISTS)
}

/// Caller-owned flag that stops a running build.
///
/// Clones share the flag. A cancelled build returns `IndexError::Cancelled`
/// and publishes nothing, so the previous index stays in service.
#[derive(Clone, Debug, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Creates a flag that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> std::result::Result<(), IndexError> {
        if self.is_cancelled() {
            Err(IndexError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Builds a [`SearchIndex`] over a corpus.
///
/// # Example
///
/// ```rust
/// use sentencedb::index::{CancellationFlag, IndexBuilder};
/// use sentencedb::{IndexKind, SentenceId};
///
/// let ids = vec![SentenceId::new(1), SentenceId::new(2)];
/// let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
///
/// let index = IndexBuilder::new(IndexKind::Flat)
///     .build(ids, &vectors, &CancellationFlag::new())
///     .unwrap();
/// assert_eq!(index.ntotal(), 2);
/// ```
#[derive(Clone, Debug)]
pub struct IndexBuilder {
    kind: IndexKind,
    nprobe: usize,
}

impl IndexBuilder {
    /// Creates a builder for the given variant with the default probe count.
    pub fn new(kind: IndexKind) -> Self {
        Self {
            kind,
            nprobe: IndexConfig::default().nprobe,
        }
    }

    /// Creates a builder from index settings.
    pub fn from_config(config: &IndexConfig) -> Self {
        Self {
            kind: config.kind,
            nprobe: config.nprobe,
        }
    }

    /// Sets the number of lists probed per query by the inverted-file variant.
    pub fn nprobe(mut self, nprobe: usize) -> Self {
        self.nprobe = nprobe;
        self
    }

    /// Builds from `(sentence_id, vector)` pairs, as returned by
    /// [`StorageEngine::all_embeddings`](crate::storage::StorageEngine::all_embeddings).
    pub fn build_from_corpus(
        &self,
        corpus: Vec<(SentenceId, Embedding)>,
        cancel: &CancellationFlag,
    ) -> Result<SearchIndex> {
        let (ids, vectors): (Vec<SentenceId>, Vec<Embedding>) = corpus.into_iter().unzip();
        self.build(ids, &vectors, cancel)
    }

    /// Builds an index; ordinal `i` maps to `ids[i]`.
    ///
    /// # Errors
    ///
    /// - `IndexError::EmptyCorpus` if there are no vectors
    /// - `ValidationError::DimensionMismatch` if the vectors disagree on length
    /// - `IndexError::Cancelled` if `cancel` fires
    #[instrument(skip(self, ids, vectors, cancel), fields(kind = %self.kind, n = vectors.len()))]
    pub fn build(
        &self,
        ids: Vec<SentenceId>,
        vectors: &[Embedding],
        cancel: &CancellationFlag,
    ) -> Result<SearchIndex> {
        if vectors.is_empty() {
            return Err(IndexError::EmptyCorpus.into());
        }
        if ids.len() != vectors.len() {
            return Err(ValidationError::invalid_field(
                "ids",
                format!("{} ids supplied for {} vectors", ids.len(), vectors.len()),
            )
            .into());
        }

        let dimension = vectors[0].len();
        if dimension == 0 {
            return Err(ValidationError::invalid_field("vectors", "dimension must be greater than 0").into());
        }
        let flat = flatten(vectors, dimension)?;

        let mut structure = match self.kind {
            IndexKind::Flat => IndexStructure::Flat(FlatIndex::new(dimension)),
            IndexKind::InvertedFile => {
                let mut ivf = IvfIndex::new(dimension, inverted_file_lists(vectors.len()), self.nprobe);
                ivf.train(&flat, cancel)?;
                IndexStructure::InvertedFile(ivf)
            }
        };

        for chunk in flat.chunks(ADD_CHUNK * dimension) {
            cancel.check()?;
            structure.add(chunk)?;
        }
        cancel.check()?;

        if let IndexStructure::InvertedFile(ivf) = &structure {
            let sizes = ivf.list_sizes();
            debug!(
                n_lists = sizes.len(),
                empty_lists = sizes.iter().filter(|&&n| n == 0).count(),
                largest_list = sizes.iter().copied().max().unwrap_or(0),
                "Inverted lists filled"
            );
        }

        let index = SearchIndex::from_parts(structure, ids)?;
        info!(
            ntotal = index.ntotal(),
            dimension = dimension,
            variant = ?index.variant(),
            "Index built"
        );
        Ok(index)
    }
}
