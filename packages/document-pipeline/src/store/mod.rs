use anyhow::Result;
use async_trait::async_trait;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryDocumentStore;
pub use postgres::PostgresDocumentStore;

use crate::types::{CompletedFields, ContentHash, Document, DocumentId, ProcessingStatus};

/// Durable storage for document records.
///
/// All mutations are atomic at the row level. The store never transitions
/// status on its own; the pipeline drives every change. `insert_new` must be
/// backed by a uniqueness constraint on `url`, not a check-then-insert, so
/// concurrent creators collapse onto a single row.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_by_url(&self, url: &str) -> Result<Option<Document>>;

    async fn get(&self, id: DocumentId) -> Result<Option<Document>>;

    /// Insert a fresh `processing` row. Returns `false` when another caller
    /// already created a row for this URL; the caller must re-read.
    async fn insert_new(&self, document: &Document) -> Result<bool>;

    /// Atomically move a row from `from` back into `processing`. Returns
    /// `false` when the row was no longer in `from` (someone else won).
    async fn try_claim_for_processing(
        &self,
        id: DocumentId,
        from: ProcessingStatus,
    ) -> Result<bool>;

    /// Look up a `completed` document with this fingerprint, excluding the
    /// record currently being processed.
    async fn find_completed_by_hash(
        &self,
        content_hash: &ContentHash,
        exclude: DocumentId,
    ) -> Result<Option<Document>>;

    async fn mark_failed(&self, id: DocumentId) -> Result<()>;

    /// Terminal transition into `duplicate`, recording the canonical record
    /// and the fingerprint that matched it.
    async fn mark_duplicate(
        &self,
        id: DocumentId,
        duplicate_of: DocumentId,
        content_hash: &ContentHash,
    ) -> Result<()>;

    /// Single atomic update persisting hash, markdown, analysis output and
    /// the `completed` status.
    async fn complete(&self, id: DocumentId, fields: &CompletedFields) -> Result<()>;

    async fn increment_times_referenced(&self, id: DocumentId) -> Result<()>;
}
