//! Operator CLI: ingest a single document URL through the full pipeline.

use anyhow::{Context, Result};
use clap::Parser;
use document_pipeline::store::postgres::MIGRATOR;
use document_pipeline::{
    Config, DocumentMetadata, HttpFetcher, IngestionPipeline, OpenAiAnalyzer,
    PostgresDocumentStore,
};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ingest")]
#[command(about = "Fetch, deduplicate and analyze one document URL")]
struct Cli {
    /// URL of the document (PDF) to ingest
    url: String,

    /// Display title for the document
    #[arg(long)]
    title: Option<String>,

    /// Publishing organization
    #[arg(long)]
    organization: Option<String>,

    /// Analysis model override
    #[arg(long)]
    model: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,document_pipeline=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    MIGRATOR
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    let mut analyzer = OpenAiAnalyzer::new(&config.openai_api_key);
    if let Some(model) = cli.model {
        analyzer = analyzer.with_model(model);
    }

    let pipeline = IngestionPipeline::new(
        PostgresDocumentStore::new(pool),
        HttpFetcher::new()?,
        analyzer,
    );

    let mut metadata = DocumentMetadata::new();
    if let Some(title) = cli.title {
        metadata.insert("title".into(), serde_json::Value::String(title));
    }
    if let Some(organization) = cli.organization {
        metadata.insert(
            "organization".into(),
            serde_json::Value::String(organization),
        );
    }

    let document = pipeline.ingest(&cli.url, metadata).await?;

    tracing::info!(
        document_id = %document.id,
        status = document.processing_status.as_str(),
        times_referenced = document.times_referenced,
        "Ingestion finished"
    );
    println!("{}", serde_json::to_string_pretty(&document)?);

    Ok(())
}
