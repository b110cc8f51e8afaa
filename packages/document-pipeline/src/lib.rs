//! Document ingestion and deduplication pipeline.
//!
//! Given a URL discovered upstream, the pipeline fetches the document once,
//! fingerprints its bytes, deduplicates by URL and by content hash, runs
//! best-effort LLM analysis and maintains a single canonical processed
//! record per unique piece of content, with reference counting for reuse.

pub mod analyzer;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod inflight;
pub mod normalizer;
pub mod pipeline;
pub mod store;
pub mod testing;
pub mod traits;
pub mod types;

// Re-exports for clean API
pub use analyzer::OpenAiAnalyzer;
pub use config::{Config, PipelineConfig};
pub use error::IngestError;
pub use fetcher::HttpFetcher;
pub use inflight::InflightRegistry;
pub use normalizer::{normalize_pdf, title_from_url, NormalizedDocument};
pub use pipeline::IngestionPipeline;
pub use store::{DocumentStore, InMemoryDocumentStore, PostgresDocumentStore};
pub use traits::{AnalysisHints, ContentFetcher, DocumentAnalyzer};
pub use types::{
    ContentHash, Document, DocumentAnalysis, DocumentId, DocumentMetadata, ProcessingStatus,
};
