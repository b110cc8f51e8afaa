use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by [`IngestionPipeline::ingest`](crate::pipeline::IngestionPipeline::ingest).
///
/// Analysis failure is deliberately absent: the pipeline treats it as
/// non-fatal and completes the document with fallback analysis fields.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid document url `{url}`")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The remote resource could not be retrieved. The document row is left
    /// in `failed` and can be retried with another `ingest` call.
    #[error("failed to fetch `{url}`")]
    Fetch {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    /// The fetched bytes could not be converted to markdown. Marked `failed`
    /// and retryable, same as a fetch error.
    #[error("failed to normalize content from `{url}`")]
    Normalize {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    /// Waiting for another in-flight ingestion of the same URL exceeded the
    /// bounded wait. The in-flight attempt continues unaffected.
    #[error("timed out after {waited:?} waiting for in-flight ingestion of `{url}`")]
    WaitTimeout { url: String, waited: Duration },

    /// Another caller's in-flight attempt for this URL ended in `failed`.
    /// This caller did no work itself; re-invoking `ingest` triggers a retry.
    #[error("in-flight ingestion of `{url}` failed")]
    InflightFailed { url: String },

    /// An invariant the store is supposed to uphold was observed broken,
    /// e.g. a `duplicate` pointing at a non-`completed` record. Requires
    /// operator intervention.
    #[error("consistency violation: {0}")]
    Consistency(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
