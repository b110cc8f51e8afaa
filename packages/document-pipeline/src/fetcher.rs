//! HTTP content fetcher for PDF documents.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

use crate::traits::ContentFetcher;

/// Default timeout for a single document download.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = "Mozilla/5.0 (compatible; DocumentPipelineBot/1.0)";

/// Downloads documents with reqwest. Carries a distinctive client identity
/// and enforces a timeout; non-2xx responses and empty bodies are errors.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Self::with_timeout(FETCH_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .context("HTTP request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("HTTP {} for {}", status, url);
        }

        let bytes = response
            .bytes()
            .await
            .context("Failed to read response body")?;

        if bytes.is_empty() {
            anyhow::bail!("Empty response body for {}", url);
        }

        tracing::debug!(url = %url, content_length = bytes.len(), "Fetched document");

        Ok(bytes.to_vec())
    }
}
