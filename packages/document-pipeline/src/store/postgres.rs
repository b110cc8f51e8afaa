use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::DocumentStore;
use crate::types::{
    CompletedFields, ContentHash, Document, DocumentId, ProcessingStatus,
};

/// Migrations for the documents table, applied by binaries and tests.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub struct PostgresDocumentStore {
    pool: PgPool,
}

impl PostgresDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const DOCUMENT_COLUMNS: &str = "id, url, content_hash, title, organization, published_at, \
     markdown_content, baseline_summary, extracted_topics, extracted_entities, \
     processing_status, duplicate_of, times_referenced, metadata, \
     processed_at, created_at, updated_at";

fn document_from_row(row: &PgRow) -> Result<Document> {
    let status_raw: String = row.get("processing_status");
    let processing_status = ProcessingStatus::parse(&status_raw)
        .with_context(|| format!("Unknown processing_status `{status_raw}` in documents row"))?;

    Ok(Document {
        id: DocumentId(row.get("id")),
        url: row.get("url"),
        content_hash: row
            .get::<Option<String>, _>("content_hash")
            .map(ContentHash::from_hex),
        title: row.get("title"),
        organization: row.get("organization"),
        published_at: row.get("published_at"),
        markdown_content: row.get("markdown_content"),
        baseline_summary: row.get("baseline_summary"),
        extracted_topics: row.get("extracted_topics"),
        extracted_entities: serde_json::from_value(row.get("extracted_entities"))
            .unwrap_or_default(),
        processing_status,
        duplicate_of: row.get::<Option<Uuid>, _>("duplicate_of").map(DocumentId),
        times_referenced: row.get("times_referenced"),
        metadata: serde_json::from_value(row.get("metadata")).unwrap_or_default(),
        processed_at: row.get("processed_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn find_by_url(&self, url: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE url = $1"
        ))
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to find document by url")?;

        row.as_ref().map(document_from_row).transpose()
    }

    async fn get(&self, id: DocumentId) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get document")?;

        row.as_ref().map(document_from_row).transpose()
    }

    async fn insert_new(&self, document: &Document) -> Result<bool> {
        // The unique constraint on url is the serialization point for
        // concurrent creators; the loser sees zero rows affected.
        let result = sqlx::query(
            r#"
            INSERT INTO documents (
                id, url, content_hash, title, organization, published_at,
                markdown_content, baseline_summary, extracted_topics,
                extracted_entities, processing_status, duplicate_of,
                times_referenced, metadata, processed_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (url) DO NOTHING
            "#,
        )
        .bind(document.id.0)
        .bind(&document.url)
        .bind(document.content_hash.as_ref().map(|h| h.as_hex().to_string()))
        .bind(&document.title)
        .bind(&document.organization)
        .bind(document.published_at)
        .bind(&document.markdown_content)
        .bind(&document.baseline_summary)
        .bind(&document.extracted_topics)
        .bind(serde_json::to_value(&document.extracted_entities)?)
        .bind(document.processing_status.as_str())
        .bind(document.duplicate_of.map(|d| d.0))
        .bind(document.times_referenced)
        .bind(serde_json::to_value(&document.metadata)?)
        .bind(document.processed_at)
        .bind(document.created_at)
        .bind(document.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert document")?;

        Ok(result.rows_affected() == 1)
    }

    async fn try_claim_for_processing(
        &self,
        id: DocumentId,
        from: ProcessingStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET processing_status = 'processing', updated_at = now()
            WHERE id = $1 AND processing_status = $2
            "#,
        )
        .bind(id.0)
        .bind(from.as_str())
        .execute(&self.pool)
        .await
        .context("Failed to claim document for processing")?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_completed_by_hash(
        &self,
        content_hash: &ContentHash,
        exclude: DocumentId,
    ) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {DOCUMENT_COLUMNS} FROM documents
            WHERE content_hash = $1
              AND id <> $2
              AND processing_status = 'completed'
            ORDER BY created_at
            LIMIT 1
            "#
        ))
        .bind(content_hash.as_hex())
        .bind(exclude.0)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to find document by content hash")?;

        row.as_ref().map(document_from_row).transpose()
    }

    async fn mark_failed(&self, id: DocumentId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE documents
            SET processing_status = 'failed', updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .execute(&self.pool)
        .await
        .context("Failed to mark document failed")?;
        Ok(())
    }

    async fn mark_duplicate(
        &self,
        id: DocumentId,
        duplicate_of: DocumentId,
        content_hash: &ContentHash,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE documents
            SET processing_status = 'duplicate',
                duplicate_of = $2,
                content_hash = $3,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(duplicate_of.0)
        .bind(content_hash.as_hex())
        .execute(&self.pool)
        .await
        .context("Failed to mark document duplicate")?;
        Ok(())
    }

    async fn complete(&self, id: DocumentId, fields: &CompletedFields) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE documents
            SET processing_status = 'completed',
                content_hash = $2,
                markdown_content = $3,
                baseline_summary = $4,
                extracted_topics = $5,
                extracted_entities = $6,
                processed_at = $7,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(fields.content_hash.as_hex())
        .bind(&fields.markdown_content)
        .bind(&fields.analysis.summary)
        .bind(&fields.analysis.topics)
        .bind(serde_json::to_value(&fields.analysis.entities)?)
        .bind(fields.processed_at)
        .execute(&self.pool)
        .await
        .context("Failed to complete document")?;
        Ok(())
    }

    async fn increment_times_referenced(&self, id: DocumentId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE documents
            SET times_referenced = times_referenced + 1, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .execute(&self.pool)
        .await
        .context("Failed to increment reference count")?;
        Ok(())
    }
}
