//! Inverted-file index: vectors partitioned by a trained k-means quantizer.
//!
//! A query scores every centroid, probes the `nprobe` best lists and scans
//! only the vectors in them. With `nprobe >= n_lists` the result equals a
//! flat scan; with one list the index degrades to a flat scan outright.

use serde::{Deserialize, Serialize};

use super::builder::CancellationFlag;
use super::kmeans::{self, nearest_centroid};
use super::{inner_product, select_top_k, Neighbor, VectorIndex};
use crate::error::{IndexError, Result, ValidationError};

/// Clustered inner-product index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IvfIndex {
    dimension: usize,
    n_lists: usize,
    nprobe: usize,
    /// `n_lists * dimension` floats once trained, empty before.
    centroids: Vec<f32>,
    /// Ordinals assigned to each list, in insertion order.
    lists: Vec<Vec<usize>>,
    vectors: Vec<f32>,
}

impl IvfIndex {
    /// Creates an untrained index.
    ///
    /// `n_lists` and `nprobe` are raised to at least 1.
    pub fn new(dimension: usize, n_lists: usize, nprobe: usize) -> Self {
        Self {
            dimension,
            n_lists: n_lists.max(1),
            nprobe: nprobe.max(1),
            centroids: Vec::new(),
            lists: Vec::new(),
            vectors: Vec::new(),
        }
    }

    /// Trains the quantizer over a row-major training set.
    ///
    /// If there are fewer training vectors than lists, the list count shrinks
    /// to the training-set size.
    pub fn train(&mut self, vectors: &[f32], cancel: &CancellationFlag) -> Result<()> {
        if self.dimension == 0 || vectors.len() % self.dimension != 0 {
            return Err(ValidationError::dimension_mismatch(self.dimension, vectors.len()).into());
        }
        let centroids = kmeans::train(vectors, self.dimension, self.n_lists, cancel)?;
        self.n_lists = centroids.len() / self.dimension;
        self.centroids = centroids;
        self.lists = vec![Vec::new(); self.n_lists];
        Ok(())
    }

    /// Returns the number of lists.
    pub fn n_lists(&self) -> usize {
        self.n_lists
    }

    /// Returns the number of lists probed per query (never above `n_lists`).
    pub fn nprobe(&self) -> usize {
        self.nprobe.min(self.n_lists)
    }

    /// Returns the size of each list.
    pub(crate) fn list_sizes(&self) -> Vec<usize> {
        self.lists.iter().map(Vec::len).collect()
    }

    pub(crate) fn check_consistency(&self) -> std::result::Result<(), IndexError> {
        if self.dimension == 0 {
            return Err(IndexError::corrupted("inverted-file index has dimension 0"));
        }
        if self.vectors.len() % self.dimension != 0 {
            return Err(IndexError::corrupted(
                "inverted-file vector buffer is not a multiple of the dimension",
            ));
        }
        if !self.is_trained() {
            return Err(IndexError::corrupted("inverted-file index was saved untrained"));
        }
        let centroid_floats = self.n_lists.checked_mul(self.dimension);
        if self.lists.len() != self.n_lists || centroid_floats != Some(self.centroids.len()) {
            return Err(IndexError::corrupted(format!(
                "inverted-file quantizer does not match {} lists",
                self.n_lists
            )));
        }

        let total = self.len();
        let mut seen = vec![false; total];
        for &ordinal in self.lists.iter().flatten() {
            match seen.get_mut(ordinal) {
                Some(slot) if !*slot => *slot = true,
                _ => {
                    return Err(IndexError::corrupted(format!(
                        "inverted list entry {} is out of range or duplicated",
                        ordinal
                    )))
                }
            }
        }
        if seen.iter().any(|s| !s) {
            return Err(IndexError::corrupted("vector missing from every inverted list"));
        }
        Ok(())
    }

    /// Returns the lists to probe for `query`, best first.
    fn probe_lists(&self, query: &[f32]) -> Vec<usize> {
        let scored = self
            .centroids
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(list, centroid)| (list, inner_product(query, centroid)));
        select_top_k(scored, self.nprobe())
            .into_iter()
            .filter_map(|n| n.ordinal)
            .collect()
    }
}

impl VectorIndex for IvfIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.vectors.len() / self.dimension.max(1)
    }

    fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    fn add(&mut self, vectors: &[f32]) -> Result<()> {
        if !self.is_trained() {
            return Err(IndexError::internal("inverted-file index must be trained before adding").into());
        }
        if vectors.len() % self.dimension != 0 {
            return Err(ValidationError::dimension_mismatch(self.dimension, vectors.len()).into());
        }

        let start = self.len();
        for (offset, vector) in vectors.chunks_exact(self.dimension).enumerate() {
            let list = nearest_centroid(&self.centroids, self.dimension, vector);
            self.lists[list].push(start + offset);
        }
        self.vectors.extend_from_slice(vectors);
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimension {
            return Err(ValidationError::dimension_mismatch(self.dimension, query.len()).into());
        }
        if !self.is_trained() {
            return Ok(vec![Neighbor::MISSING; k]);
        }

        let probes = self.probe_lists(query);
        let scored = probes
            .iter()
            .flat_map(|&list| self.lists[list].iter().copied())
            .map(|ordinal| {
                let vector = &self.vectors[ordinal * self.dimension..(ordinal + 1) * self.dimension];
                (ordinal, inner_product(query, vector))
            });
        Ok(select_top_k(scored, k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{persistence, FlatIndex, IndexStructure};

    /// Generates a deterministic unit-length embedding from a seed.
    fn make_embedding(seed: u64, dim: usize) -> Vec<f32> {
        let mut v: Vec<f32> = (0..dim)
            .map(|i| ((seed as f32 + 1.0) * (i as f32 + 1.0) * 0.37).sin())
            .collect();
        crate::embedding::normalize(&mut v);
        v
    }

    fn corpus(n: u64, dim: usize) -> Vec<f32> {
        (0..n).flat_map(|i| make_embedding(i, dim)).collect()
    }

    fn trained(n: u64, dim: usize, n_lists: usize, nprobe: usize) -> IvfIndex {
        let vectors = corpus(n, dim);
        let mut index = IvfIndex::new(dim, n_lists, nprobe);
        index.train(&vectors, &CancellationFlag::new()).unwrap();
        index.add(&vectors).unwrap();
        index
    }

    #[test]
    fn test_untrained_index_rejects_add() {
        let mut index = IvfIndex::new(4, 2, 1);
        assert!(!index.is_trained());
        assert!(index.add(&[0.0; 4]).is_err());
    }

    #[test]
    fn test_every_vector_lands_in_one_list() {
        let index = trained(50, 8, 5, 2);
        assert_eq!(index.len(), 50);
        assert_eq!(index.list_sizes().iter().sum::<usize>(), 50);
        assert!(index.check_consistency().is_ok());
    }

    #[test]
    fn test_full_probe_matches_flat_scan() {
        let dim = 8;
        let index = trained(60, dim, 6, 6);

        let mut flat = FlatIndex::new(dim);
        flat.add(&corpus(60, dim)).unwrap();

        let query = make_embedding(17, dim);
        assert_eq!(index.search(&query, 5).unwrap(), flat.search(&query, 5).unwrap());
    }

    #[test]
    fn test_single_list_degrades_to_flat() {
        let dim = 4;
        let index = trained(9, dim, 1, 8);
        assert_eq!(index.n_lists(), 1);
        assert_eq!(index.nprobe(), 1);

        let mut flat = FlatIndex::new(dim);
        flat.add(&corpus(9, dim)).unwrap();

        let query = make_embedding(3, dim);
        assert_eq!(index.search(&query, 9).unwrap(), flat.search(&query, 9).unwrap());
    }

    #[test]
    fn test_exact_match_found_when_probing() {
        let dim = 8;
        let index = trained(100, dim, 10, 2);
        let query = make_embedding(42, dim);
        let top = index.search(&query, 1).unwrap();
        assert_eq!(top[0].ordinal, Some(42));
    }

    #[test]
    fn test_partial_probe_pads_with_sentinels() {
        let dim = 2;
        let mut vectors = Vec::new();
        for _ in 0..5 {
            vectors.extend_from_slice(&[1.0, 0.0]);
            vectors.extend_from_slice(&[-1.0, 0.0]);
        }
        let mut index = IvfIndex::new(dim, 2, 1);
        index.train(&vectors, &CancellationFlag::new()).unwrap();
        index.add(&vectors).unwrap();

        let top = index.search(&[1.0, 0.0], 10).unwrap();
        assert_eq!(top.len(), 10);
        assert_eq!(top.iter().filter(|n| n.ordinal.is_some()).count(), 5);
    }

    #[test]
    fn test_check_consistency_detects_bad_lists() {
        let mut index = trained(20, 4, 2, 1);
        index.lists[0].push(999);
        assert!(index.check_consistency().is_err());
    }

    #[test]
    fn test_nprobe_clamped_to_lists() {
        let index = trained(30, 4, 3, 50);
        assert_eq!(index.nprobe(), 3);
    }

    #[test]
    fn test_check_consistency_rejects_overflowing_list_count() {
        let index = IvfIndex {
            dimension: 2,
            n_lists: usize::MAX / 2 + 1,
            nprobe: 1,
            centroids: vec![1.0, 0.0],
            lists: vec![Vec::new()],
            vectors: Vec::new(),
        };
        assert!(matches!(
            index.check_consistency(),
            Err(IndexError::Corrupted(_))
        ));

        let bytes = persistence::encode_structure(&IndexStructure::InvertedFile(index)).unwrap();
        assert!(matches!(
            persistence::decode_structure(&bytes),
            Err(IndexError::Corrupted(_))
        ));
    }
}
