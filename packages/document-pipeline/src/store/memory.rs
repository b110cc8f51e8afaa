//! In-memory document store.
//!
//! Single-process stand-in for the Postgres store with the same atomicity
//! guarantees (every mutation happens under one mutex acquisition). Used by
//! the pipeline tests; also handy for examples and local experiments.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

use super::DocumentStore;
use crate::types::{
    CompletedFields, ContentHash, Document, DocumentId, ProcessingStatus,
};

#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: Mutex<HashMap<DocumentId, Document>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently stored.
    pub fn len(&self) -> usize {
        self.documents.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all rows, for test assertions.
    pub fn all(&self) -> Vec<Document> {
        self.documents.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn find_by_url(&self, url: &str) -> Result<Option<Document>> {
        Ok(self
            .documents
            .lock()
            .unwrap()
            .values()
            .find(|d| d.url == url)
            .cloned())
    }

    async fn get(&self, id: DocumentId) -> Result<Option<Document>> {
        Ok(self.documents.lock().unwrap().get(&id).cloned())
    }

    async fn insert_new(&self, document: &Document) -> Result<bool> {
        let mut documents = self.documents.lock().unwrap();
        if documents.values().any(|d| d.url == document.url) {
            return Ok(false);
        }
        documents.insert(document.id, document.clone());
        Ok(true)
    }

    async fn try_claim_for_processing(
        &self,
        id: DocumentId,
        from: ProcessingStatus,
    ) -> Result<bool> {
        let mut documents = self.documents.lock().unwrap();
        match documents.get_mut(&id) {
            Some(doc) if doc.processing_status == from => {
                doc.processing_status = ProcessingStatus::Processing;
                doc.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_completed_by_hash(
        &self,
        content_hash: &ContentHash,
        exclude: DocumentId,
    ) -> Result<Option<Document>> {
        let documents = self.documents.lock().unwrap();
        let mut matches: Vec<&Document> = documents
            .values()
            .filter(|d| {
                d.id != exclude
                    && d.processing_status == ProcessingStatus::Completed
                    && d.content_hash.as_ref() == Some(content_hash)
            })
            .collect();
        matches.sort_by_key(|d| d.created_at);
        Ok(matches.first().map(|d| (*d).clone()))
    }

    async fn mark_failed(&self, id: DocumentId) -> Result<()> {
        let mut documents = self.documents.lock().unwrap();
        if let Some(doc) = documents.get_mut(&id) {
            doc.processing_status = ProcessingStatus::Failed;
            doc.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_duplicate(
        &self,
        id: DocumentId,
        duplicate_of: DocumentId,
        content_hash: &ContentHash,
    ) -> Result<()> {
        let mut documents = self.documents.lock().unwrap();
        if let Some(doc) = documents.get_mut(&id) {
            doc.processing_status = ProcessingStatus::Duplicate;
            doc.duplicate_of = Some(duplicate_of);
            doc.content_hash = Some(content_hash.clone());
            doc.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn complete(&self, id: DocumentId, fields: &CompletedFields) -> Result<()> {
        let mut documents = self.documents.lock().unwrap();
        if let Some(doc) = documents.get_mut(&id) {
            doc.processing_status = ProcessingStatus::Completed;
            doc.content_hash = Some(fields.content_hash.clone());
            doc.markdown_content = Some(fields.markdown_content.clone());
            doc.baseline_summary = Some(fields.analysis.summary.clone());
            doc.extracted_topics = fields.analysis.topics.clone();
            doc.extracted_entities = fields.analysis.entities.clone();
            doc.processed_at = Some(fields.processed_at);
            doc.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn increment_times_referenced(&self, id: DocumentId) -> Result<()> {
        let mut documents = self.documents.lock().unwrap();
        if let Some(doc) = documents.get_mut(&id) {
            doc.times_referenced += 1;
            doc.updated_at = Utc::now();
        }
        Ok(())
    }
}
