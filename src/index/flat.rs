//! Exact inner-product index.

use serde::{Deserialize, Serialize};

use super::{inner_product, select_top_k, Neighbor, VectorIndex};
use crate::error::{IndexError, Result, ValidationError};

/// Exact index: every query scans every stored vector.
///
/// Vectors live in one contiguous row-major buffer; ordinal `i` occupies
/// `vectors[i * dimension..(i + 1) * dimension]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlatIndex {
    dimension: usize,
    vectors: Vec<f32>,
}

impl FlatIndex {
    /// Creates an empty index.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
        }
    }

    pub(crate) fn check_consistency(&self) -> std::result::Result<(), IndexError> {
        if self.dimension == 0 {
            return Err(IndexError::corrupted("flat index has dimension 0"));
        }
        if self.vectors.len() % self.dimension != 0 {
            return Err(IndexError::corrupted(format!(
                "flat index buffer of {} floats is not a multiple of dimension {}",
                self.vectors.len(),
                self.dimension
            )));
        }
        Ok(())
    }
}

impl VectorIndex for FlatIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.vectors.len() / self.dimension.max(1)
    }

    fn is_trained(&self) -> bool {
        true
    }

    fn add(&mut self, vectors: &[f32]) -> Result<()> {
        if self.dimension == 0 || vectors.len() % self.dimension != 0 {
            return Err(ValidationError::dimension_mismatch(self.dimension, vectors.len()).into());
        }
        self.vectors.extend_from_slice(vectors);
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimension {
            return Err(ValidationError::dimension_mismatch(self.dimension, query.len()).into());
        }
        let scored = self
            .vectors
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(ordinal, vector)| (ordinal, inner_product(query, vector)));
        Ok(select_top_k(scored, k))
    }
}
