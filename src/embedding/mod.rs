//! Embedding service abstraction for SentenceDB.
//!
//! SentenceDB never runs an encoder itself. Text becomes a vector through an
//! [`EmbeddingService`] supplied by the caller: a local model, a remote API,
//! or a test stub. The database only checks what comes back.
//!
//! Indexes score by raw inner product. Use [`normalize`] on vectors before
//! storing them (and on queries) to get cosine similarity.

use crate::error::{Result, SentenceDBError, ValidationError};
use crate::types::Embedding;

/// Embedding service trait for generating vector representations of text.
///
/// Implementations must be thread-safe (`Send + Sync`) so a pipeline or a
/// background build can hold one behind an `Arc`.
///
/// # Implementing a Custom Provider
///
/// ```rust
/// use sentencedb::embedding::EmbeddingService;
/// use sentencedb::{Embedding, Result};
///
/// struct CharCounts;
///
/// impl EmbeddingService for CharCounts {
///     fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
///         Ok(texts
///             .iter()
///             .map(|t| vec![t.len() as f32, t.matches(' ').count() as f32])
///             .collect())
///     }
///
///     fn dimension(&self) -> usize {
///         2
///     }
/// }
///
/// let v = CharCounts.embed("a b").unwrap();
/// assert_eq!(v, vec![3.0, 1.0]);
/// ```
pub trait EmbeddingService: Send + Sync {
    /// Generates embeddings for multiple texts in one call.
    ///
    /// Must return one embedding per input, in input order.
    ///
    /// # Errors
    ///
    /// Returns `SentenceDBError::Embedding` if the batch cannot be encoded.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>>;

    /// Returns the dimension of embeddings produced by this service.
    fn dimension(&self) -> usize;

    /// Generates an embedding for a single text.
    fn embed(&self, text: &str) -> Result<Embedding> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| SentenceDBError::embedding("embedding service returned no vectors"))
    }

    /// Validates that an embedding has the correct dimension.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::DimensionMismatch` if dimensions don't match.
    fn validate_embedding(&self, embedding: &[f32]) -> Result<()> {
        let expected = self.dimension();
        if embedding.len() != expected {
            return Err(ValidationError::dimension_mismatch(expected, embedding.len()).into());
        }
        Ok(())
    }
}

/// Scales `vector` to unit length in place. Zero vectors are left unchanged.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<Embedding>);

    impl EmbeddingService for Fixed {
        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
            Ok(self.0.iter().take(texts.len()).cloned().collect())
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    #[test]
    fn test_embed_uses_first_batch_result() {
        let service = Fixed(vec![vec![1.0, 2.0]]);
        assert_eq!(service.embed("x").unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_embed_empty_batch_is_error() {
        let service = Fixed(Vec::new());
        let err = service.embed("x").unwrap_err();
        assert!(matches!(err, SentenceDBError::Embedding(_)));
    }

    #[test]
    fn test_validate_embedding() {
        let service = Fixed(Vec::new());
        assert!(service.validate_embedding(&[1.0, 2.0]).is_ok());
        assert!(service
            .validate_embedding(&[1.0])
            .unwrap_err()
            .is_dimension_mismatch());
    }

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn test_service_is_object_safe() {
        let service: Box<dyn EmbeddingService> = Box::new(Fixed(Vec::new()));
        assert_eq!(service.dimension(), 2);
    }
}
