//! Document and sentence management.
//!
//! A **document** is a source file registered once per path. A **sentence**
//! is one ordered unit of its text, optionally carrying an embedding.
//!
//! # Operations
//!
//! All operations are available on [`SentenceDB`](crate::SentenceDB) and on
//! any [`StorageEngine`](crate::storage::StorageEngine):
//!
//! - `add_document(filename, path)` (idempotent by path)
//! - `add_sentence_embedding(document_id, text, position, vector)`
//! - `add_sentence(document_id, text, position)`
//! - `sentence_by_id(id)`
//! - `document_sentences(document_id)`

pub mod types;

pub use types::{Document, Sentence, SentenceRecord, StoreStats};

use crate::error::{SentenceDBError, ValidationError};

/// Maximum length of a document path or filename in bytes.
pub const MAX_PATH_LENGTH: usize = 4096;

/// Validates the inputs of `add_document`.
///
/// # Rules
///
/// - `filename`: non-empty, max 4096 bytes
/// - `path`: non-empty, max 4096 bytes
pub(crate) fn validate_document(filename: &str, path: &str) -> Result<(), SentenceDBError> {
    if filename.is_empty() {
        return Err(ValidationError::required_field("filename").into());
    }
    if path.is_empty() {
        return Err(ValidationError::required_field("path").into());
    }
    if filename.len() > MAX_PATH_LENGTH {
        return Err(ValidationError::invalid_field(
            "filename",
            format!("exceeds max length of {} bytes", MAX_PATH_LENGTH),
        )
        .into());
    }
    if path.len() > MAX_PATH_LENGTH {
        return Err(ValidationError::invalid_field(
            "path",
            format!("exceeds max length of {} bytes", MAX_PATH_LENGTH),
        )
        .into());
    }
    Ok(())
}

/// Validates sentence text before storage.
pub(crate) fn validate_sentence_text(text: &str, max_bytes: usize) -> Result<(), SentenceDBError> {
    if text.trim().is_empty() {
        return Err(ValidationError::required_field("text").into());
    }
    if text.len() > max_bytes {
        return Err(ValidationError::content_too_large(text.len(), max_bytes).into());
    }
    Ok(())
}

/// Validates an embedding's values.
///
/// Non-finite components would poison every inner product they take part in.
pub(crate) fn validate_vector_values(vector: &[f32]) -> Result<(), SentenceDBError> {
    if vector.is_empty() {
        return Err(ValidationError::required_field("vector").into());
    }
    if let Some(i) = vector.iter().position(|v| !v.is_finite()) {
        return Err(ValidationError::invalid_field(
            "vector",
            format!("component {} is not finite", i),
        )
        .into());
    }
    Ok(())
}
