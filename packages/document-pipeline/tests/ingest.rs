//! End-to-end pipeline behavior against the in-memory store and mock
//! collaborators.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use document_pipeline::testing::{pdf_fixture, MockAnalyzer, MockFetcher};
use document_pipeline::types::{CompletedFields, DocumentId};
use document_pipeline::{
    ContentHash, Document, DocumentMetadata, DocumentStore, InMemoryDocumentStore, IngestError,
    IngestionPipeline, PipelineConfig, ProcessingStatus,
};

type TestPipeline = IngestionPipeline<InMemoryDocumentStore, MockFetcher, MockAnalyzer>;

fn pipeline(fetcher: MockFetcher, analyzer: MockAnalyzer) -> TestPipeline {
    IngestionPipeline::new(InMemoryDocumentStore::new(), fetcher, analyzer).with_config(
        PipelineConfig::default()
            .with_poll_interval(Duration::from_millis(20))
            .with_max_wait(Duration::from_secs(5)),
    )
}

/// Store wrapper that fails the first `n` completion updates, to exercise
/// error handling around the final atomic update.
struct FailingCompleteStore {
    inner: InMemoryDocumentStore,
    fail_completes: Mutex<u32>,
}

impl FailingCompleteStore {
    fn new(fail_completes: u32) -> Self {
        Self {
            inner: InMemoryDocumentStore::new(),
            fail_completes: Mutex::new(fail_completes),
        }
    }
}

#[async_trait]
impl DocumentStore for FailingCompleteStore {
    async fn find_by_url(&self, url: &str) -> Result<Option<Document>> {
        self.inner.find_by_url(url).await
    }

    async fn get(&self, id: DocumentId) -> Result<Option<Document>> {
        self.inner.get(id).await
    }

    async fn insert_new(&self, document: &Document) -> Result<bool> {
        self.inner.insert_new(document).await
    }

    async fn try_claim_for_processing(
        &self,
        id: DocumentId,
        from: ProcessingStatus,
    ) -> Result<bool> {
        self.inner.try_claim_for_processing(id, from).await
    }

    async fn find_completed_by_hash(
        &self,
        content_hash: &ContentHash,
        exclude: DocumentId,
    ) -> Result<Option<Document>> {
        self.inner.find_completed_by_hash(content_hash, exclude).await
    }

    async fn mark_failed(&self, id: DocumentId) -> Result<()> {
        self.inner.mark_failed(id).await
    }

    async fn mark_duplicate(
        &self,
        id: DocumentId,
        duplicate_of: DocumentId,
        content_hash: &ContentHash,
    ) -> Result<()> {
        self.inner.mark_duplicate(id, duplicate_of, content_hash).await
    }

    async fn complete(&self, id: DocumentId, fields: &CompletedFields) -> Result<()> {
        {
            let mut remaining = self.fail_completes.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                anyhow::bail!("completion update failed (simulated)");
            }
        }
        self.inner.complete(id, fields).await
    }

    async fn increment_times_referenced(&self, id: DocumentId) -> Result<()> {
        self.inner.increment_times_referenced(id).await
    }
}

fn meta(title: &str) -> DocumentMetadata {
    let mut metadata = DocumentMetadata::new();
    metadata.insert("title".into(), serde_json::Value::String(title.into()));
    metadata
}

#[tokio::test]
async fn sequential_ingests_reuse_the_first_result() {
    let url = "https://bis.org/report.pdf";
    let fetcher = MockFetcher::new().with_document(url, pdf_fixture("Report", "Body text"));
    let pipeline = pipeline(fetcher.clone(), MockAnalyzer::new());

    let first = pipeline.ingest(url, meta("BIS Report")).await.unwrap();
    assert_eq!(first.processing_status, ProcessingStatus::Completed);
    assert_eq!(first.times_referenced, 0);

    let second = pipeline.ingest(url, meta("BIS Report")).await.unwrap();
    let third = pipeline.ingest(url, meta("BIS Report")).await.unwrap();

    assert_eq!(second.id, first.id);
    assert_eq!(third.id, first.id);
    assert_eq!(third.times_referenced, 2);

    // The work happened exactly once.
    assert_eq!(fetcher.fetch_count(), 1);
    assert_eq!(pipeline.store().len(), 1);
}

#[tokio::test]
async fn concurrent_ingests_converge_without_a_second_fetch() {
    let url = "https://x/a.pdf";
    let fetcher = MockFetcher::new()
        .with_document(url, pdf_fixture("A", "Slow document"))
        .with_delay(Duration::from_millis(100));
    let pipeline = Arc::new(pipeline(fetcher.clone(), MockAnalyzer::new()));

    let first = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.ingest(url, meta("A")).await })
    };
    // Let the first caller create the row and start fetching.
    tokio::time::sleep(Duration::from_millis(30)).await;
    let second = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.ingest(url, meta("A")).await })
    };

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(fetcher.fetch_count(), 1, "second caller must not refetch");
    assert_eq!(pipeline.store().len(), 1);

    let stored = pipeline.store().get(first.id).await.unwrap().unwrap();
    assert_eq!(stored.processing_status, ProcessingStatus::Completed);
    assert_eq!(stored.times_referenced, 1);
}

#[tokio::test]
async fn many_concurrent_ingests_count_every_reuse() {
    let url = "https://x/popular.pdf";
    let fetcher = MockFetcher::new()
        .with_document(url, pdf_fixture("Popular", "Body"))
        .with_delay(Duration::from_millis(60));
    let pipeline = Arc::new(pipeline(fetcher.clone(), MockAnalyzer::new()));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let pipeline = Arc::clone(&pipeline);
        handles.push(tokio::spawn(
            async move { pipeline.ingest(url, meta("Popular")).await },
        ));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);

    assert_eq!(fetcher.fetch_count(), 1);
    assert_eq!(pipeline.store().len(), 1);
    let stored = pipeline.store().get(ids[0]).await.unwrap().unwrap();
    assert_eq!(stored.times_referenced, 4);
}

#[tokio::test]
async fn identical_bytes_across_urls_deduplicate_by_content() {
    let bytes = pdf_fixture("Shared", "Same bytes everywhere");
    let fetcher = MockFetcher::new()
        .with_document("https://bis.org/report.pdf", bytes.clone())
        .with_document("https://mirror.org/report.pdf", bytes.clone());
    let pipeline = pipeline(fetcher, MockAnalyzer::new());

    let original = pipeline
        .ingest("https://bis.org/report.pdf", meta("BIS Report"))
        .await
        .unwrap();
    assert_eq!(original.processing_status, ProcessingStatus::Completed);
    assert_eq!(
        original.content_hash,
        Some(ContentHash::from_bytes(&bytes))
    );

    // The mirror resolves to the canonical record, not its own row.
    let mirrored = pipeline
        .ingest("https://mirror.org/report.pdf", DocumentMetadata::new())
        .await
        .unwrap();
    assert_eq!(mirrored.id, original.id);
    assert_eq!(mirrored.times_referenced, 1);

    let all = pipeline.store().all();
    assert_eq!(all.len(), 2);
    let duplicate = all
        .iter()
        .find(|d| d.url == "https://mirror.org/report.pdf")
        .unwrap();
    assert_eq!(duplicate.processing_status, ProcessingStatus::Duplicate);
    assert_eq!(duplicate.duplicate_of, Some(original.id));
    assert_eq!(duplicate.content_hash, Some(ContentHash::from_bytes(&bytes)));
}

#[tokio::test]
async fn duplicates_never_chain() {
    let bytes = pdf_fixture("Shared", "Widely mirrored content");
    let fetcher = MockFetcher::new()
        .with_document("https://a.org/r.pdf", bytes.clone())
        .with_document("https://b.org/r.pdf", bytes.clone())
        .with_document("https://c.org/r.pdf", bytes.clone());
    let pipeline = pipeline(fetcher, MockAnalyzer::new());

    let canonical = pipeline.ingest("https://a.org/r.pdf", meta("R")).await.unwrap();
    pipeline
        .ingest("https://b.org/r.pdf", meta("R"))
        .await
        .unwrap();
    pipeline
        .ingest("https://c.org/r.pdf", meta("R"))
        .await
        .unwrap();

    for doc in pipeline.store().all() {
        if doc.processing_status == ProcessingStatus::Duplicate {
            let target_id = doc.duplicate_of.expect("duplicate must have a target");
            assert_eq!(target_id, canonical.id);
            let target = pipeline.store().get(target_id).await.unwrap().unwrap();
            assert_eq!(target.processing_status, ProcessingStatus::Completed);
        }
    }

    // Repeating an already-duplicate URL resolves the canonical record again.
    let again = pipeline.ingest("https://b.org/r.pdf", meta("R")).await.unwrap();
    assert_eq!(again.id, canonical.id);
}

#[tokio::test]
async fn analysis_failure_does_not_block_completion() {
    let url = "https://x/a.pdf";
    let fetcher = MockFetcher::new().with_document(url, pdf_fixture("A", "Body"));
    let analyzer = MockAnalyzer::new().with_failure();
    let pipeline = pipeline(fetcher, analyzer.clone());

    let document = pipeline.ingest(url, meta("A")).await.unwrap();

    assert_eq!(document.processing_status, ProcessingStatus::Completed);
    assert!(document.extracted_topics.is_empty());
    assert!(document.extracted_entities.is_empty());
    // Fallback summary is an excerpt of the markdown itself.
    assert!(document.baseline_summary.as_deref().unwrap().starts_with("# "));
    assert_eq!(analyzer.analyze_count(), 1);
}

#[tokio::test]
async fn retry_recovers_from_a_failed_fetch() {
    let url = "https://x/flaky.pdf";
    let fetcher = MockFetcher::new()
        .with_document(url, pdf_fixture("Flaky", "Body"))
        .with_failures(1);
    let pipeline = pipeline(fetcher.clone(), MockAnalyzer::new());

    let err = pipeline.ingest(url, meta("Flaky")).await.unwrap_err();
    assert!(matches!(err, IngestError::Fetch { .. }));

    let all = pipeline.store().all();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].processing_status, ProcessingStatus::Failed);

    let recovered = pipeline.ingest(url, meta("Flaky")).await.unwrap();
    assert_eq!(recovered.processing_status, ProcessingStatus::Completed);
    assert_eq!(recovered.id, all[0].id);
    assert_eq!(fetcher.fetch_count(), 2);
    assert_eq!(pipeline.store().len(), 1);
}

#[tokio::test]
async fn waiters_observing_a_failed_attempt_get_a_typed_error() {
    let url = "https://x/slow-fail.pdf";
    // No canned document: the fetch fails after the delay.
    let fetcher = MockFetcher::new().with_delay(Duration::from_millis(80));
    let pipeline = Arc::new(pipeline(fetcher.clone(), MockAnalyzer::new()));

    let owner = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.ingest(url, meta("S")).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    let waiter = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.ingest(url, meta("S")).await })
    };

    assert!(matches!(
        owner.await.unwrap(),
        Err(IngestError::Fetch { .. })
    ));
    assert!(matches!(
        waiter.await.unwrap(),
        Err(IngestError::InflightFailed { .. })
    ));
    // Only the owner fetched.
    assert_eq!(fetcher.fetch_count(), 1);
}

#[tokio::test]
async fn bounded_wait_times_out_without_touching_the_document() {
    let url = "https://x/very-slow.pdf";
    let fetcher = MockFetcher::new()
        .with_document(url, pdf_fixture("Slow", "Body"))
        .with_delay(Duration::from_millis(300));
    let pipeline = Arc::new(
        IngestionPipeline::new(InMemoryDocumentStore::new(), fetcher.clone(), MockAnalyzer::new())
            .with_config(
                PipelineConfig::default()
                    .with_poll_interval(Duration::from_millis(10))
                    .with_max_wait(Duration::from_millis(50)),
            ),
    );

    let owner = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.ingest(url, meta("Slow")).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    let err = pipeline.ingest(url, meta("Slow")).await.unwrap_err();
    assert!(matches!(err, IngestError::WaitTimeout { .. }));

    // The in-flight ingestion is unaffected by the waiter's timeout.
    let owned = owner.await.unwrap().unwrap();
    assert_eq!(owned.processing_status, ProcessingStatus::Completed);
    assert_eq!(fetcher.fetch_count(), 1);
}

#[tokio::test]
async fn bis_report_example_scenario() {
    let bytes = pdf_fixture("Annual Economic Report", "Global liquidity conditions tightened.");
    let fetcher = MockFetcher::new()
        .with_document("https://bis.org/report.pdf", bytes.clone())
        .with_document("https://mirror.org/report.pdf", bytes.clone());
    let pipeline = pipeline(fetcher, MockAnalyzer::new());

    let first = pipeline
        .ingest("https://bis.org/report.pdf", meta("BIS Report"))
        .await
        .unwrap();
    assert_eq!(first.url, "https://bis.org/report.pdf");
    assert_eq!(first.title, "BIS Report");
    assert_eq!(first.content_hash, Some(ContentHash::from_bytes(&bytes)));
    assert_eq!(first.processing_status, ProcessingStatus::Completed);

    let second = pipeline
        .ingest("https://mirror.org/report.pdf", DocumentMetadata::new())
        .await
        .unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.times_referenced, 1);

    let mirror_row = pipeline
        .store()
        .find_by_url("https://mirror.org/report.pdf")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mirror_row.processing_status, ProcessingStatus::Duplicate);
    assert_eq!(mirror_row.duplicate_of, Some(first.id));
}

#[tokio::test]
async fn store_failure_during_completion_leaves_the_row_retryable() {
    let url = "https://x/a.pdf";
    let fetcher = MockFetcher::new().with_document(url, pdf_fixture("A", "Body"));
    let pipeline = IngestionPipeline::new(
        FailingCompleteStore::new(1),
        fetcher.clone(),
        MockAnalyzer::new(),
    );

    let err = pipeline.ingest(url, meta("A")).await.unwrap_err();
    assert!(matches!(err, IngestError::Store(_)));

    // The attempt must not wedge the row in `processing`.
    let row = pipeline.store().find_by_url(url).await.unwrap().unwrap();
    assert_eq!(row.processing_status, ProcessingStatus::Failed);

    let recovered = pipeline.ingest(url, meta("A")).await.unwrap();
    assert_eq!(recovered.id, row.id);
    assert_eq!(recovered.processing_status, ProcessingStatus::Completed);
    assert_eq!(fetcher.fetch_count(), 2);
}

#[tokio::test]
async fn externally_seeded_pending_rows_are_claimed_and_processed() {
    let url = "https://x/seeded.pdf";
    let fetcher = MockFetcher::new().with_document(url, pdf_fixture("Seeded", "Body"));
    let pipeline = pipeline(fetcher.clone(), MockAnalyzer::new());

    let mut seeded =
        Document::new_processing(url.into(), "Seeded".into(), DocumentMetadata::new());
    seeded.processing_status = ProcessingStatus::Pending;
    assert!(pipeline.store().insert_new(&seeded).await.unwrap());

    let document = pipeline.ingest(url, DocumentMetadata::new()).await.unwrap();
    assert_eq!(document.id, seeded.id);
    assert_eq!(document.processing_status, ProcessingStatus::Completed);
    assert_eq!(fetcher.fetch_count(), 1);
    assert_eq!(pipeline.store().len(), 1);
}

#[tokio::test]
async fn untitled_ingests_derive_a_title_from_the_url() {
    let url = "https://bis.org/annual_economic-report.pdf";
    let fetcher = MockFetcher::new().with_document(url, pdf_fixture("Ignored", "Body"));
    let pipeline = pipeline(fetcher, MockAnalyzer::new());

    let document = pipeline.ingest(url, DocumentMetadata::new()).await.unwrap();
    assert_eq!(document.title, "annual economic report");
}

#[tokio::test]
async fn analyzer_receives_title_and_organization_hints() {
    let url = "https://x/a.pdf";
    let fetcher = MockFetcher::new().with_document(url, pdf_fixture("A", "Body"));
    let analyzer = MockAnalyzer::new();
    let pipeline = pipeline(fetcher, analyzer.clone());

    let mut metadata = meta("Stability Review");
    metadata.insert(
        "organization".into(),
        serde_json::Value::String("BIS".into()),
    );
    pipeline.ingest(url, metadata).await.unwrap();

    let calls = analyzer.analyze_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].title.as_deref(), Some("Stability Review"));
    assert_eq!(calls[0].organization.as_deref(), Some("BIS"));
}
