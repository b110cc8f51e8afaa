use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// SHA-256 fingerprint of the raw downloaded bytes.
///
/// Two different URLs can serve byte-identical content, so the hash is a
/// lookup key for content identity rather than a unique constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// Wrap an already-hex-encoded digest read back from storage.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a document record.
///
/// Transitions are driven exclusively by the ingestion pipeline:
/// `completed` and `duplicate` are terminal; `failed` may be claimed back
/// into `processing` by a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Duplicate,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
            ProcessingStatus::Duplicate => "duplicate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ProcessingStatus::Pending),
            "processing" => Some(ProcessingStatus::Processing),
            "completed" => Some(ProcessingStatus::Completed),
            "failed" => Some(ProcessingStatus::Failed),
            "duplicate" => Some(ProcessingStatus::Duplicate),
            _ => None,
        }
    }
}

/// Caller-supplied context captured at discovery time. Opaque to the pipeline.
pub type DocumentMetadata = HashMap<String, serde_json::Value>;

/// Output of the analysis collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentAnalysis {
    pub summary: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub entities: HashMap<String, Vec<String>>,
}

impl DocumentAnalysis {
    /// Default analysis used when the collaborator is unavailable: a leading
    /// excerpt of the markdown stands in for the summary, topics and entities
    /// stay empty. Completion must not be blocked by analysis failure.
    pub fn fallback(markdown: &str) -> Self {
        let excerpt: String = markdown.chars().take(300).collect();
        let summary = if markdown.chars().count() > 300 {
            format!("{excerpt}...")
        } else {
            excerpt
        };
        Self {
            summary,
            topics: Vec::new(),
            entities: HashMap::new(),
        }
    }
}

/// The canonical, deduplicated record of one unique piece of content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    /// Canonical source location, unique across all documents.
    pub url: String,
    pub content_hash: Option<ContentHash>,
    pub title: String,
    pub organization: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub markdown_content: Option<String>,
    pub baseline_summary: Option<String>,
    pub extracted_topics: Vec<String>,
    pub extracted_entities: HashMap<String, Vec<String>>,
    pub processing_status: ProcessingStatus,
    /// Set only when `processing_status` is `duplicate`; always points at a
    /// `completed` document, never another duplicate.
    pub duplicate_of: Option<DocumentId>,
    /// Incremented every time this record is reused instead of reprocessed.
    pub times_referenced: i64,
    pub metadata: DocumentMetadata,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// A fresh record for a URL seen for the first time. Created directly in
    /// `processing`: the insert is the serialization point for concurrent
    /// callers, so the row must already look in-flight when it lands.
    pub fn new_processing(url: String, title: String, metadata: DocumentMetadata) -> Self {
        let organization = metadata
            .get("organization")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let published_at = metadata
            .get("published_at")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let now = Utc::now();
        Self {
            id: DocumentId::new(),
            url,
            content_hash: None,
            title,
            organization,
            published_at,
            markdown_content: None,
            baseline_summary: None,
            extracted_topics: Vec::new(),
            extracted_entities: HashMap::new(),
            processing_status: ProcessingStatus::Processing,
            duplicate_of: None,
            times_referenced: 0,
            metadata,
            processed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Fields persisted in the single atomic update that finalizes a document.
#[derive(Debug, Clone)]
pub struct CompletedFields {
    pub content_hash: ContentHash,
    pub markdown_content: String,
    pub analysis: DocumentAnalysis,
    pub processed_at: DateTime<Utc>,
}
