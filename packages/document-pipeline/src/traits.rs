use anyhow::Result;
use async_trait::async_trait;
use url::Url;

use crate::types::DocumentAnalysis;

/// Retrieves raw bytes for a URL. No dedup logic lives here; failures are
/// fatal for the ingestion attempt.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>>;
}

/// Context passed alongside the text so the analyzer can anchor its output.
#[derive(Debug, Clone, Default)]
pub struct AnalysisHints {
    pub title: Option<String>,
    pub organization: Option<String>,
}

/// Extracts a structured summary/topics/entities from normalized text.
/// May fail or time out; the pipeline treats failure as non-fatal.
#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    async fn analyze(&self, markdown: &str, hints: &AnalysisHints) -> Result<DocumentAnalysis>;
}
