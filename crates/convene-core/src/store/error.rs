//! Document store error types.
//!
//! Defines errors that can occur during store operations:
//! - `Unavailable`: store unreachable or internally failing (retryable)
//! - `Rejected`: store refused the write (permissions, quota, validation)
//! - `NotFound`: a document that must exist is missing

use thiserror::Error;

/// Errors that can occur during document store operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Store is unreachable or failed internally
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Store refused the write
    #[error("write to {collection}/{id} rejected: {reason}")]
    Rejected {
        /// Target collection
        collection: String,
        /// Target document id
        id: String,
        /// Reason given by the store
        reason: String,
    },

    /// Document not found
    #[error("document not found: {collection}/{id}")]
    NotFound {
        /// Collection searched
        collection: String,
        /// Missing document id
        id: String,
    },
}

impl StoreError {
    /// Returns true if the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
