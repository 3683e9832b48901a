//! K-means training for the inverted-file quantizer.
//!
//! Assignment uses the same inner-product score as search, so a vector lands
//! in the list whose centroid a query would probe for it. Initialization
//! samples distinct training vectors from a fixed seed, which makes training
//! deterministic for a given corpus.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::builder::CancellationFlag;
use super::inner_product;
use crate::error::IndexError;

/// Maximum number of Lloyd iterations.
pub(crate) const MAX_ITERATIONS: usize = 25;

/// Seed for centroid sampling and empty-cluster reseeding.
pub(crate) const TRAINING_SEED: u64 = 0x5EED_5E47;

/// Trains `k` centroids over a row-major buffer of vectors.
///
/// `k` is clamped to `[1, n]`. Returns the centroids as one row-major buffer
/// of `k * dimension` floats.
pub(crate) fn train(
    vectors: &[f32],
    dimension: usize,
    k: usize,
    cancel: &CancellationFlag,
) -> Result<Vec<f32>, IndexError> {
    let n = vectors.len() / dimension;
    if n == 0 {
        return Err(IndexError::EmptyCorpus);
    }
    let k = k.clamp(1, n);
    let row = |i: usize| &vectors[i * dimension..(i + 1) * dimension];

    let mut rng = StdRng::seed_from_u64(TRAINING_SEED);
    let mut centroids = Vec::with_capacity(k * dimension);
    for i in rand::seq::index::sample(&mut rng, n, k).iter() {
        centroids.extend_from_slice(row(i));
    }

    let mut assignments = vec![usize::MAX; n];
    let mut iterations = 0;
    while iterations < MAX_ITERATIONS {
        cancel.check()?;
        iterations += 1;

        let mut changed = false;
        for (i, assignment) in assignments.iter_mut().enumerate() {
            let nearest = nearest_centroid(&centroids, dimension, row(i));
            if *assignment != nearest {
                *assignment = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![0.0f32; k * dimension];
        let mut counts = vec![0usize; k];
        for (i, &cluster) in assignments.iter().enumerate() {
            counts[cluster] += 1;
            let sum = &mut sums[cluster * dimension..(cluster + 1) * dimension];
            for (s, v) in sum.iter_mut().zip(row(i)) {
                *s += v;
            }
        }

        for cluster in 0..k {
            let target = &mut centroids[cluster * dimension..(cluster + 1) * dimension];
            if counts[cluster] == 0 {
                // Empty cluster: restart it from a random training vector
                target.copy_from_slice(row(rng.random_range(0..n)));
            } else {
                let count = counts[cluster] as f32;
                let sum = &sums[cluster * dimension..(cluster + 1) * dimension];
                for (c, s) in target.iter_mut().zip(sum) {
                    *c = s / count;
                }
            }
        }
    }

    debug!(n = n, k = k, iterations = iterations, "K-means training finished");
    Ok(centroids)
}

/// Returns the centroid with the highest inner product (lowest index on ties).
pub(crate) fn nearest_centroid(centroids: &[f32], dimension: usize, vector: &[f32]) -> usize {
    let mut best = 0;
    let mut best_score = f32::NEG_INFINITY;
    for (i, centroid) in centroids.chunks_exact(dimension).enumerate() {
        let score = inner_product(vector, centroid);
        if score > best_score {
            best = i;
            best_score = score;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blobs() -> Vec<f32> {
        let mut vectors = Vec::new();
        for i in 0..10 {
            let jitter = i as f32 * 0.01;
            vectors.extend_from_slice(&[1.0, jitter]);
            vectors.extend_from_slice(&[jitter, 1.0]);
        }
        vectors
    }

    #[test]
    fn test_train_separates_blobs() {
        let vectors = two_blobs();
        let centroids = train(&vectors, 2, 2, &CancellationFlag::new()).unwrap();
        assert_eq!(centroids.len(), 4);

        let a = nearest_centroid(&centroids, 2, &[1.0, 0.0]);
        let b = nearest_centroid(&centroids, 2, &[0.0, 1.0]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_train_is_deterministic() {
        let vectors = two_blobs();
        let first = train(&vectors, 2, 3, &CancellationFlag::new()).unwrap();
        let second = train(&vectors, 2, 3, &CancellationFlag::new()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_k_clamped_to_corpus_size() {
        let vectors = vec![1.0, 0.0, 0.0, 1.0];
        let centroids = train(&vectors, 2, 10, &CancellationFlag::new()).unwrap();
        assert_eq!(centroids.len(), 4);
    }

    #[test]
    fn test_train_empty_corpus() {
        let err = train(&[], 2, 1, &CancellationFlag::new()).unwrap_err();
        assert!(matches!(err, IndexError::EmptyCorpus));
    }

    #[test]
    fn test_train_observes_cancellation() {
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let err = train(&two_blobs(), 2, 2, &cancel).unwrap_err();
        assert!(matches!(err, IndexError::Cancelled));
    }

    #[test]
    fn test_nearest_centroid_ties_prefer_lowest() {
        let centroids = vec![1.0, 0.0, 1.0, 0.0];
        assert_eq!(nearest_centroid(&centroids, 2, &[1.0, 0.0]), 0);
    }
}
