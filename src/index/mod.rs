//! Similarity index structures for nearest-neighbor search.
//!
//! Two variants are provided:
//!
//! - [`FlatIndex`]: exact search by full linear scan
//! - [`IvfIndex`]: inverted-file index probing a subset of k-means clusters
//!
//! Both score by raw inner product. Nothing is normalized here; callers who
//! want cosine similarity normalize their vectors first (see
//! [`normalize`](crate::embedding::normalize)).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────┐
//! │         VectorIndex trait         │
//! └──────────┬───────────────────────┘
//!            │
//!    ┌───────┴────────┐
//!    │ IndexStructure │  Flat(FlatIndex) | InvertedFile(IvfIndex)
//!    └───────┬────────┘
//!            │  + ordinal → SentenceId mapping
//!    ┌───────┴────────┐
//!    │  SearchIndex   │
//!    └────────────────┘
//! ```
//!
//! Embeddings stored in redb are the **source of truth**. A `SearchIndex` is
//! a derived, rebuildable structure: if its files are missing or corrupt,
//! rebuild it from the store.

mod builder;
mod flat;
mod ivf;
mod kmeans;
pub mod persistence;

pub use builder::{inverted_file_lists, CancellationFlag, IndexBuilder, MAX_INVERTED_LISTS};
pub use flat::FlatIndex;
pub use ivf::IvfIndex;

use serde::{Deserialize, Serialize};

use crate::config::IndexKind;
use crate::error::{IndexError, Result, ValidationError};
use crate::types::{Embedding, SentenceId};

/// Vector index trait for k-nearest-neighbor search by inner product.
///
/// Ordinals are assigned densely in insertion order, starting at 0 and
/// continuing from the previous length on every `add`.
pub trait VectorIndex: Send + Sync {
    /// Returns the vector dimension.
    fn dimension(&self) -> usize;

    /// Returns the number of stored vectors.
    fn len(&self) -> usize;

    /// Returns true if the index holds no vectors.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if the index is ready to accept vectors.
    fn is_trained(&self) -> bool;

    /// Appends vectors given as one contiguous row-major slice.
    fn add(&mut self, vectors: &[f32]) -> Result<()>;

    /// Returns exactly `k` neighbors sorted by descending score.
    ///
    /// Slots the index could not fill carry the [`Neighbor::MISSING`]
    /// sentinel. Equal scores are ordered by ascending ordinal.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>>;
}

/// One slot of a k-nearest-neighbor answer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Neighbor {
    /// Ordinal of the matched vector, or `None` for an unfilled slot.
    pub ordinal: Option<usize>,

    /// Inner product between the query and the matched vector.
    pub score: f32,
}

impl Neighbor {
    /// Sentinel for a slot with no result.
    pub const MISSING: Neighbor = Neighbor {
        ordinal: None,
        score: f32::NEG_INFINITY,
    };
}

/// Resolved variant of a built index, including its parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndexVariant {
    /// Exact linear scan.
    Flat,

    /// Clustered index.
    InvertedFile {
        /// Number of trained clusters.
        n_lists: usize,
        /// Clusters probed per query.
        nprobe: usize,
    },
}

impl IndexVariant {
    /// Returns the requested kind this variant was built from.
    pub fn kind(&self) -> IndexKind {
        match self {
            Self::Flat => IndexKind::Flat,
            Self::InvertedFile { .. } => IndexKind::InvertedFile,
        }
    }
}

/// Summary of a loaded index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Number of vectors in the index.
    pub total_vectors: usize,

    /// Vector dimension.
    pub dimension: usize,

    /// Variant and its parameters.
    pub variant: IndexVariant,

    /// Number of ordinal → sentence id entries.
    pub mapping_size: usize,
}

/// The searchable structure of either variant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum IndexStructure {
    /// Exact linear scan.
    Flat(FlatIndex),

    /// Clustered index.
    InvertedFile(IvfIndex),
}

impl IndexStructure {
    /// Returns the variant and its parameters.
    pub fn variant(&self) -> IndexVariant {
        match self {
            Self::Flat(_) => IndexVariant::Flat,
            Self::InvertedFile(ivf) => IndexVariant::InvertedFile {
                n_lists: ivf.n_lists(),
                nprobe: ivf.nprobe(),
            },
        }
    }

    /// Checks internal consistency after decoding.
    pub(crate) fn check_consistency(&self) -> std::result::Result<(), IndexError> {
        match self {
            Self::Flat(flat) => flat.check_consistency(),
            Self::InvertedFile(ivf) => ivf.check_consistency(),
        }
    }

    fn inner(&self) -> &dyn VectorIndex {
        match self {
            Self::Flat(flat) => flat,
            Self::InvertedFile(ivf) => ivf,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn VectorIndex {
        match self {
            Self::Flat(flat) => flat,
            Self::InvertedFile(ivf) => ivf,
        }
    }
}

impl VectorIndex for IndexStructure {
    fn dimension(&self) -> usize {
        self.inner().dimension()
    }

    fn len(&self) -> usize {
        self.inner().len()
    }

    fn is_trained(&self) -> bool {
        self.inner().is_trained()
    }

    fn add(&mut self, vectors: &[f32]) -> Result<()> {
        self.inner_mut().add(vectors)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.inner().search(query, k)
    }
}

/// A built index together with its ordinal → sentence id mapping.
///
/// Immutable once published: incremental additions clone, extend and swap.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchIndex {
    structure: IndexStructure,
    id_mapping: Vec<SentenceId>,
}

impl SearchIndex {
    /// Pairs a structure with its mapping.
    ///
    /// # Errors
    ///
    /// `IndexError::Corrupted` if the mapping doesn't have one entry per vector.
    pub fn from_parts(structure: IndexStructure, id_mapping: Vec<SentenceId>) -> Result<Self> {
        if structure.len() != id_mapping.len() {
            return Err(IndexError::corrupted(format!(
                "index holds {} vectors but mapping has {} entries",
                structure.len(),
                id_mapping.len()
            ))
            .into());
        }
        Ok(Self {
            structure,
            id_mapping,
        })
    }

    /// Returns the searchable structure.
    pub fn structure(&self) -> &IndexStructure {
        &self.structure
    }

    /// Returns the ordinal → sentence id mapping.
    pub fn id_mapping(&self) -> &[SentenceId] {
        &self.id_mapping
    }

    /// Resolves an ordinal to its sentence id.
    pub fn sentence_id(&self, ordinal: usize) -> Option<SentenceId> {
        self.id_mapping.get(ordinal).copied()
    }

    /// Returns the vector dimension.
    pub fn dimension(&self) -> usize {
        self.structure.dimension()
    }

    /// Returns the number of vectors.
    pub fn ntotal(&self) -> usize {
        self.structure.len()
    }

    /// Returns true if the structure is trained.
    pub fn is_trained(&self) -> bool {
        self.structure.is_trained()
    }

    /// Returns the variant and its parameters.
    pub fn variant(&self) -> IndexVariant {
        self.structure.variant()
    }

    /// Runs the native k-nearest-neighbor search.
    ///
    /// # Errors
    ///
    /// `ValidationError::DimensionMismatch` if the query has the wrong length.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.structure.search(query, k)
    }

    /// Appends vectors; new ordinals continue from [`ntotal`](Self::ntotal).
    pub fn extend(&mut self, ids: &[SentenceId], vectors: &[Embedding]) -> Result<()> {
        if ids.len() != vectors.len() {
            return Err(ValidationError::invalid_field(
                "sentence_ids",
                format!(
                    "{} ids supplied for {} vectors",
                    ids.len(),
                    vectors.len()
                ),
            )
            .into());
        }
        let dimension = self.dimension();
        let flat = flatten(vectors, dimension)?;
        self.structure.add(&flat)?;
        self.id_mapping.extend_from_slice(ids);
        Ok(())
    }

    /// Returns a summary of this index.
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            total_vectors: self.ntotal(),
            dimension: self.dimension(),
            variant: self.variant(),
            mapping_size: self.id_mapping.len(),
        }
    }
}

/// Inner product of two equal-length slices.
#[inline]
pub(crate) fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Copies vectors into one row-major buffer, checking every length.
pub(crate) fn flatten(vectors: &[Embedding], dimension: usize) -> Result<Vec<f32>> {
    let mut flat = Vec::with_capacity(vectors.len() * dimension);
    for vector in vectors {
        if vector.len() != dimension {
            return Err(ValidationError::dimension_mismatch(dimension, vector.len()).into());
        }
        flat.extend_from_slice(vector);
    }
    Ok(flat)
}

/// Keeps the `k` best `(ordinal, score)` pairs and pads with sentinels.
///
/// Ordering is descending score, then ascending ordinal.
pub(crate) fn select_top_k(scored: impl Iterator<Item = (usize, f32)>, k: usize) -> Vec<Neighbor> {
    let order = |a: &(usize, f32), b: &(usize, f32)| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0));

    let mut candidates: Vec<(usize, f32)> = scored.collect();
    if k < candidates.len() {
        candidates.select_nth_unstable_by(k, order);
        candidates.truncate(k);
    }
    candidates.sort_by(order);

    let mut neighbors: Vec<Neighbor> = candidates
        .into_iter()
        .map(|(ordinal, score)| Neighbor {
            ordinal: Some(ordinal),
            score,
        })
        .collect();
    neighbors.resize(k, Neighbor::MISSING);
    neighbors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_top_k_orders_and_breaks_ties_by_ordinal() {
        let scored = vec![(0, 0.5), (1, 1.0), (2, 0.2), (3, 1.0)];
        let top = select_top_k(scored.into_iter(), 3);
        let ordinals: Vec<Option<usize>> = top.iter().map(|n| n.ordinal).collect();
        assert_eq!(ordinals, vec![Some(1), Some(3), Some(0)]);
    }

    #[test]
    fn test_select_top_k_pads_with_sentinel() {
        let top = select_top_k(vec![(0, 0.1)].into_iter(), 3);
        assert_eq!(top.len(), 3);
        assert_eq!(top[0].ordinal, Some(0));
        assert_eq!(top[1], Neighbor::MISSING);
        assert_eq!(top[2], Neighbor::MISSING);
    }

    #[test]
    fn test_select_top_k_zero() {
        assert!(select_top_k(vec![(0, 0.1)].into_iter(), 0).is_empty());
    }

    #[test]
    fn test_flatten_rejects_ragged_input() {
        let err = flatten(&[vec![1.0, 2.0], vec![1.0]], 2).unwrap_err();
        assert!(err.is_dimension_mismatch());
    }

    #[test]
    fn test_search_index_rejects_mapping_size_mismatch() {
        let mut flat = FlatIndex::new(2);
        flat.add(&[1.0, 0.0, 0.0, 1.0]).unwrap();
        let err =
            SearchIndex::from_parts(IndexStructure::Flat(flat), vec![SentenceId::new(1)])
                .unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_search_index_extend_continues_ordinals() {
        let mut flat = FlatIndex::new(2);
        flat.add(&[1.0, 0.0]).unwrap();
        let mut index =
            SearchIndex::from_parts(IndexStructure::Flat(flat), vec![SentenceId::new(10)])
                .unwrap();

        index
            .extend(&[SentenceId::new(11)], &[vec![0.0, 1.0]])
            .unwrap();

        assert_eq!(index.ntotal(), 2);
        assert_eq!(index.sentence_id(1), Some(SentenceId::new(11)));
        let top = index.search(&[0.0, 1.0], 1).unwrap();
        assert_eq!(top[0].ordinal, Some(1));

        let stats = index.stats();
        assert_eq!(stats.total_vectors, 2);
        assert_eq!(stats.mapping_size, 2);
        assert_eq!(stats.variant, IndexVariant::Flat);
    }

    #[test]
    fn test_index_variant_json_shape() {
        let variant = IndexVariant::InvertedFile {
            n_lists: 4,
            nprobe: 2,
        };
        let json = serde_json::to_string(&variant).unwrap();
        assert_eq!(json, r#"{"type":"inverted_file","n_lists":4,"nprobe":2}"#);
        assert_eq!(variant.kind(), IndexKind::InvertedFile);
    }
}
