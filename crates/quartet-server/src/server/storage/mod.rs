//! Storage contract consumed by the document service.
//!
//! The service only needs five operations over a named collection of
//! documents; [`DocumentStore`] is that contract and nothing more. The engine
//! behind it is responsible for its own concurrency safety: the service shares
//! one handle across all calls and never locks it.

mod memory;

pub use memory::MemoryStore;

use futures::stream::BoxStream;
use quartet_core::{DocumentId, Error};

/// The caller-owned fields of a document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Record {
    pub author_id: String,
    pub title: String,
    pub content: String,
}

/// A record together with the identifier the store assigned to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredDocument {
    pub id: DocumentId,
    pub record: Record,
}

/// Result of a full-record replace.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplaceOutcome {
    /// Records whose identifier matched.
    pub matched: u64,
    /// Matched records whose content actually changed.
    pub modified: u64,
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Collection {collection:?} is unavailable: {reason}")]
    Unavailable { collection: String, reason: String },

    #[error("Storage backend failure: {0}")]
    Backend(String),
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::internal(err.to_string())
    }
}

/// Lazily produced sequence of every document in a collection.
pub type DocumentStream = BoxStream<'static, Result<StoredDocument, StoreError>>;

#[tonic::async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Stores `record` under a freshly generated identifier.
    async fn insert(&self, collection: &str, record: Record) -> Result<DocumentId, StoreError>;

    async fn find_by_id(
        &self,
        collection: &str,
        id: DocumentId,
    ) -> Result<Option<Record>, StoreError>;

    /// Replaces the whole record stored under `id`.
    async fn replace_by_id(
        &self,
        collection: &str,
        id: DocumentId,
        record: Record,
    ) -> Result<ReplaceOutcome, StoreError>;

    /// Returns the number of removed records (0 or 1).
    async fn delete_by_id(&self, collection: &str, id: DocumentId) -> Result<u64, StoreError>;

    /// Enumerates the collection in the store's natural order. Documents are
    /// read as the stream is polled, not collected up front.
    fn scan_all(&self, collection: &str) -> DocumentStream;
}
