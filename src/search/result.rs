//! Search result records.

use serde::{Deserialize, Serialize};

use crate::types::{DocumentId, SentenceId};

/// One hydrated search hit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// 1-based rank among the returned results.
    pub rank: usize,

    /// Matched sentence.
    pub sentence_id: SentenceId,

    /// Sentence text.
    pub text: String,

    /// Document the sentence belongs to.
    pub document_id: DocumentId,

    /// Filename of the document.
    pub document_filename: String,

    /// Path of the document.
    pub document_path: String,

    /// Position of the sentence within its document.
    pub position: u32,

    /// Inner product between the query and the sentence's embedding.
    pub score: f32,
}

/// Outcome of a search.
///
/// `IndexUnavailable` means no index could be loaded. It is distinct from
/// `Ready` with no results, which means the index answered and nothing matched.
#[derive(Clone, Debug, PartialEq)]
pub enum SearchResponse {
    /// The index answered; results are in rank order.
    Ready(Vec<SearchResult>),

    /// No index is loaded and none could be loaded from disk.
    IndexUnavailable {
        /// Why the index could not be made available.
        reason: String,
    },
}

impl SearchResponse {
    /// Returns the results, empty if the index was unavailable.
    pub fn results(&self) -> &[SearchResult] {
        match self {
            Self::Ready(results) => results,
            Self::IndexUnavailable { .. } => &[],
        }
    }

    /// Consumes the response, returning its results.
    pub fn into_results(self) -> Vec<SearchResult> {
        match self {
            Self::Ready(results) => results,
            Self::IndexUnavailable { .. } => Vec::new(),
        }
    }

    /// Returns true if no index was available to answer.
    pub fn is_index_unavailable(&self) -> bool {
        matches!(self, Self::IndexUnavailable { .. })
    }

    /// Returns the number of results.
    pub fn len(&self) -> usize {
        self.results().len()
    }

    /// Returns true if there are no results.
    pub fn is_empty(&self) -> bool {
        self.results().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_is_distinct_from_no_matches() {
        let none = SearchResponse::Ready(Vec::new());
        let unavailable = SearchResponse::IndexUnavailable {
            reason: "missing".into(),
        };

        assert!(none.is_empty());
        assert!(!none.is_index_unavailable());
        assert!(unavailable.is_empty());
        assert!(unavailable.is_index_unavailable());
        assert_ne!(none, unavailable);
    }
}
