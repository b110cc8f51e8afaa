//! The ingestion coordinator.
//!
//! Given a URL and optional metadata, guarantees that content is fetched,
//! hashed, deduplicated, analyzed and persisted exactly once, and that
//! concurrent requests for the same URL converge on a single canonical
//! record. Per URL the create/fetch/hash/normalize/analyze/complete sequence
//! is totally ordered across callers; distinct URLs proceed fully
//! concurrently.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use url::Url;

use crate::config::PipelineConfig;
use crate::error::IngestError;
use crate::inflight::{InflightGuard, InflightRegistry};
use crate::normalizer::{normalize_pdf, title_from_url};
use crate::store::DocumentStore;
use crate::traits::{AnalysisHints, ContentFetcher, DocumentAnalyzer};
use crate::types::{
    CompletedFields, ContentHash, Document, DocumentAnalysis, DocumentId, DocumentMetadata,
    ProcessingStatus,
};

pub struct IngestionPipeline<S, F, A> {
    store: S,
    fetcher: F,
    analyzer: A,
    inflight: Arc<InflightRegistry>,
    config: PipelineConfig,
}

impl<S, F, A> IngestionPipeline<S, F, A>
where
    S: DocumentStore,
    F: ContentFetcher,
    A: DocumentAnalyzer,
{
    pub fn new(store: S, fetcher: F, analyzer: A) -> Self {
        Self {
            store,
            fetcher,
            analyzer,
            inflight: InflightRegistry::new(),
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Ingest one document. Returns a record in terminal state `completed`:
    /// either newly processed content or the pre-existing canonical record
    /// the URL deduplicated onto. Callers never receive a `duplicate`-status
    /// row.
    pub async fn ingest(
        &self,
        url: &str,
        metadata: DocumentMetadata,
    ) -> Result<Document, IngestError> {
        let parsed = Url::parse(url).map_err(|source| IngestError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;

        tracing::info!(url = %parsed, "Ingesting document");

        loop {
            if let Some(existing) = self.store.find_by_url(url).await? {
                tracing::debug!(
                    document_id = %existing.id,
                    status = existing.processing_status.as_str(),
                    "Document already known"
                );
                match existing.processing_status {
                    ProcessingStatus::Completed => {
                        self.store.increment_times_referenced(existing.id).await?;
                        tracing::info!(
                            document_id = %existing.id,
                            "Reusing completed document"
                        );
                        return self.reload(existing.id).await;
                    }
                    ProcessingStatus::Duplicate => {
                        return self.resolve_canonical(&existing).await;
                    }
                    ProcessingStatus::Processing => {
                        return self.wait_for_completion(existing.id, url).await;
                    }
                    ProcessingStatus::Failed | ProcessingStatus::Pending => {
                        let Some(guard) = self.inflight.try_acquire(existing.id) else {
                            return self.wait_for_completion(existing.id, url).await;
                        };
                        if self
                            .store
                            .try_claim_for_processing(existing.id, existing.processing_status)
                            .await?
                        {
                            tracing::info!(document_id = %existing.id, "Retrying document");
                            return self.process(guard, existing, &parsed).await;
                        }
                        // Lost the claim; someone else changed the row first.
                        drop(guard);
                        continue;
                    }
                }
            }

            let title = metadata
                .get("title")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| title_from_url(&parsed));
            let document = Document::new_processing(url.to_string(), title, metadata.clone());

            let Some(guard) = self.inflight.try_acquire(document.id) else {
                // Freshly minted id, so this cannot collide; re-enter the
                // lookup rather than inventing a wait on an uninserted row.
                continue;
            };
            if self.store.insert_new(&document).await? {
                tracing::info!(document_id = %document.id, url = %parsed, "Created document");
                return self.process(guard, document, &parsed).await;
            }
            // Another caller inserted this url first; re-enter the lookup.
            drop(guard);
        }
    }

    /// Fetch, hash, dedup, normalize, analyze and finalize under the local
    /// lock. The guard is held until the row reaches a terminal (or
    /// `failed`) state and its drop wakes local waiters.
    ///
    /// Every error after the claim marks the row `failed` (best effort)
    /// before propagating; a row left in `processing` with no owner can
    /// only time waiters out, never be retried.
    async fn process(
        &self,
        _guard: InflightGuard,
        document: Document,
        url: &Url,
    ) -> Result<Document, IngestError> {
        let id = document.id;
        let result = self.fetch_and_finalize(document, url).await;
        if let Err(error) = &result {
            tracing::warn!(document_id = %id, url = %url, error = %error, "Ingestion attempt failed");
            if let Err(mark_error) = self.store.mark_failed(id).await {
                tracing::error!(
                    document_id = %id,
                    error = %mark_error,
                    "Failed to mark document failed"
                );
            }
        }
        result
    }

    async fn fetch_and_finalize(
        &self,
        document: Document,
        url: &Url,
    ) -> Result<Document, IngestError> {
        let id = document.id;

        let bytes = self
            .fetcher
            .fetch(url)
            .await
            .map_err(|source| IngestError::Fetch {
                url: url.to_string(),
                source,
            })?;

        let content_hash = ContentHash::from_bytes(&bytes);

        // Same bytes reachable through a different URL: this row becomes a
        // duplicate marker and the caller gets the canonical record. The
        // lookup only matches completed rows, so chains cannot form.
        if let Some(canonical) = self.store.find_completed_by_hash(&content_hash, id).await? {
            tracing::info!(
                document_id = %id,
                canonical_id = %canonical.id,
                canonical_url = %canonical.url,
                content_hash = %content_hash,
                "Duplicate content detected"
            );
            self.store
                .mark_duplicate(id, canonical.id, &content_hash)
                .await?;
            self.store.increment_times_referenced(canonical.id).await?;
            return self.reload(canonical.id).await;
        }

        let normalized = normalize_pdf(&bytes).map_err(|source| IngestError::Normalize {
            url: url.to_string(),
            source,
        })?;

        let hints = AnalysisHints {
            title: Some(document.title.clone()),
            organization: document.organization.clone(),
        };
        let analysis = match self.analyzer.analyze(&normalized.markdown, &hints).await {
            Ok(analysis) => analysis,
            Err(error) => {
                // Non-fatal by policy: partial success over total failure.
                tracing::warn!(
                    document_id = %id,
                    error = %error,
                    "Analysis failed; completing with fallback analysis"
                );
                DocumentAnalysis::fallback(&normalized.markdown)
            }
        };

        self.store
            .complete(
                id,
                &CompletedFields {
                    content_hash,
                    markdown_content: normalized.markdown,
                    analysis,
                    processed_at: Utc::now(),
                },
            )
            .await?;

        tracing::info!(document_id = %id, url = %url, "Document processed");
        self.reload(id).await
    }

    /// Bounded wait for an ingestion owned by another caller. Wakes early on
    /// the local owner's completion notification and falls back to polling
    /// for owners in other processes. Never mutates the document except to
    /// count the reuse on success.
    async fn wait_for_completion(
        &self,
        id: DocumentId,
        url: &str,
    ) -> Result<Document, IngestError> {
        let started = Instant::now();
        tracing::debug!(document_id = %id, url = %url, "Waiting for in-flight ingestion");

        loop {
            let document = self.store.get(id).await?.ok_or_else(|| {
                IngestError::Consistency(format!("document {id} disappeared while waiting"))
            })?;

            match document.processing_status {
                ProcessingStatus::Completed => {
                    self.store.increment_times_referenced(id).await?;
                    return self.reload(id).await;
                }
                ProcessingStatus::Duplicate => {
                    return self.resolve_canonical(&document).await;
                }
                ProcessingStatus::Failed => {
                    return Err(IngestError::InflightFailed {
                        url: url.to_string(),
                    });
                }
                ProcessingStatus::Processing | ProcessingStatus::Pending => {}
            }

            let waited = started.elapsed();
            if waited >= self.config.max_wait {
                return Err(IngestError::WaitTimeout {
                    url: url.to_string(),
                    waited,
                });
            }

            match self.inflight.watch(id) {
                Some(notify) => {
                    let _ = tokio::time::timeout(self.config.poll_interval, notify.notified())
                        .await;
                }
                None => tokio::time::sleep(self.config.poll_interval).await,
            }
        }
    }

    /// Follow a `duplicate` row one hop to its canonical record and count
    /// the reuse. Anything other than a `completed` target is an invariant
    /// breach.
    async fn resolve_canonical(&self, duplicate: &Document) -> Result<Document, IngestError> {
        let canonical_id = duplicate.duplicate_of.ok_or_else(|| {
            IngestError::Consistency(format!(
                "document {} is `duplicate` but has no duplicate_of",
                duplicate.id
            ))
        })?;
        let canonical = self.store.get(canonical_id).await?.ok_or_else(|| {
            IngestError::Consistency(format!(
                "document {} points at missing canonical {canonical_id}",
                duplicate.id
            ))
        })?;
        if canonical.processing_status != ProcessingStatus::Completed {
            return Err(IngestError::Consistency(format!(
                "document {} points at canonical {} with status `{}`",
                duplicate.id,
                canonical.id,
                canonical.processing_status.as_str()
            )));
        }
        self.store.increment_times_referenced(canonical.id).await?;
        self.reload(canonical.id).await
    }

    async fn reload(&self, id: DocumentId) -> Result<Document, IngestError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| IngestError::Consistency(format!("document {id} disappeared")))
    }
}
