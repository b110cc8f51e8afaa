//! Mock collaborators for testing the pipeline without network or database.
//!
//! Mocks record their calls and can be cloned; clones share state, so tests
//! keep a handle for assertions after moving a mock into the pipeline.

use anyhow::Result;
use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document as PdfDocument, Object, Stream};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

use crate::traits::{AnalysisHints, ContentFetcher, DocumentAnalyzer};
use crate::types::DocumentAnalysis;

/// Build a minimal one-page PDF with the given Info title and body line.
/// Deterministic: identical arguments produce identical bytes.
pub fn pdf_fixture(title: &str, body: &str) -> Vec<u8> {
    let mut doc = PdfDocument::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![50.into(), 700.into()]),
            Operation::new("Tj", vec![Object::string_literal(body)]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        content.encode().expect("encode content"),
    ));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal(title),
        "Author" => Object::string_literal("Research Desk"),
    });
    doc.trailer.set("Info", info_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).expect("save pdf");
    buf
}

// =============================================================================
// Mock Content Fetcher
// =============================================================================

#[derive(Clone)]
pub struct MockFetcher {
    documents: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    fetch_calls: Arc<Mutex<Vec<String>>>,
    fail_next: Arc<Mutex<u32>>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            documents: Arc::new(Mutex::new(HashMap::new())),
            fetch_calls: Arc::new(Mutex::new(Vec::new())),
            fail_next: Arc::new(Mutex::new(0)),
            delay: Arc::new(Mutex::new(None)),
        }
    }

    /// Serve these bytes for this exact URL.
    pub fn with_document(self, url: &str, bytes: Vec<u8>) -> Self {
        self.documents.lock().unwrap().insert(url.to_string(), bytes);
        self
    }

    /// Fail the next `n` fetches before serving canned documents again.
    pub fn with_failures(self, n: u32) -> Self {
        *self.fail_next.lock().unwrap() = n;
        self
    }

    /// Sleep this long inside every fetch, to hold an ingestion in-flight.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    /// All URLs that were fetched, in call order.
    pub fn fetch_calls(&self) -> Vec<String> {
        self.fetch_calls.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_calls.lock().unwrap().len()
    }

    pub fn was_fetched(&self, url: &str) -> bool {
        self.fetch_calls.lock().unwrap().iter().any(|u| u == url)
    }
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentFetcher for MockFetcher {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>> {
        self.fetch_calls.lock().unwrap().push(url.to_string());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut fail_next = self.fail_next.lock().unwrap();
            if *fail_next > 0 {
                *fail_next -= 1;
                anyhow::bail!("fetch failed (simulated)");
            }
        }

        let documents = self.documents.lock().unwrap();
        match documents.get(url.as_str()) {
            Some(bytes) => Ok(bytes.clone()),
            None => anyhow::bail!("no canned document for {url}"),
        }
    }
}

// =============================================================================
// Mock Document Analyzer
// =============================================================================

#[derive(Clone)]
pub struct MockAnalyzer {
    responses: Arc<Mutex<Vec<DocumentAnalysis>>>,
    analyze_calls: Arc<Mutex<Vec<AnalysisHints>>>,
    always_fail: Arc<Mutex<bool>>,
}

impl MockAnalyzer {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            analyze_calls: Arc::new(Mutex::new(Vec::new())),
            always_fail: Arc::new(Mutex::new(false)),
        }
    }

    /// Queue an analysis to be returned (FIFO).
    pub fn with_response(self, analysis: DocumentAnalysis) -> Self {
        self.responses.lock().unwrap().push(analysis);
        self
    }

    /// Make every analyze call fail.
    pub fn with_failure(self) -> Self {
        *self.always_fail.lock().unwrap() = true;
        self
    }

    pub fn analyze_calls(&self) -> Vec<AnalysisHints> {
        self.analyze_calls.lock().unwrap().clone()
    }

    pub fn analyze_count(&self) -> usize {
        self.analyze_calls.lock().unwrap().len()
    }
}

impl Default for MockAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentAnalyzer for MockAnalyzer {
    async fn analyze(&self, _markdown: &str, hints: &AnalysisHints) -> Result<DocumentAnalysis> {
        self.analyze_calls.lock().unwrap().push(hints.clone());

        if *self.always_fail.lock().unwrap() {
            anyhow::bail!("analysis failed (simulated)");
        }

        let mut responses = self.responses.lock().unwrap();
        if !responses.is_empty() {
            return Ok(responses.remove(0));
        }

        Ok(DocumentAnalysis {
            summary: "Mock summary.".to_string(),
            topics: vec!["mock".to_string()],
            entities: HashMap::new(),
        })
    }
}
