//! LLM-backed document analysis.
//!
//! Infrastructure implementation of [`DocumentAnalyzer`]. What to do with
//! the analysis (or its absence) is the pipeline's business; this module
//! only turns markdown into a summary/topics/entities triple.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rig::completion::Prompt;
use rig::providers::openai;

use crate::traits::{AnalysisHints, DocumentAnalyzer};
use crate::types::DocumentAnalysis;

/// How much of the document the model sees. Enough for a baseline summary;
/// full-text analysis is not worth the token cost here.
const ANALYSIS_EXCERPT_CHARS: usize = 2000;

const DEFAULT_MODEL: &str = openai::GPT_4O;

/// OpenAI implementation of [`DocumentAnalyzer`].
#[derive(Clone)]
pub struct OpenAiAnalyzer {
    client: openai::Client,
    model: String,
}

impl OpenAiAnalyzer {
    pub fn new(api_key: &str) -> Self {
        Self {
            client: openai::Client::new(api_key),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl DocumentAnalyzer for OpenAiAnalyzer {
    async fn analyze(&self, markdown: &str, hints: &AnalysisHints) -> Result<DocumentAnalysis> {
        let prompt = build_prompt(markdown, hints);

        tracing::debug!(
            prompt_length = prompt.len(),
            model = %self.model,
            "Requesting document analysis"
        );

        let agent = self
            .client
            .agent(&self.model)
            .preamble("You extract structured metadata from documents. Respond with JSON only.")
            .max_tokens(500)
            .build();

        let response = agent
            .prompt(prompt.as_str())
            .await
            .map_err(|e| {
                tracing::error!(error = %e, model = %self.model, "Analysis call failed");
                e
            })
            .context("Failed to call analysis model")?;

        parse_analysis_response(&response)
    }
}

fn build_prompt(markdown: &str, hints: &AnalysisHints) -> String {
    let excerpt: String = markdown.chars().take(ANALYSIS_EXCERPT_CHARS).collect();
    format!(
        r#"Analyze this document and extract key information:

Title: {title}
Organization: {organization}

First {chars} characters of content:
{excerpt}

Return ONLY valid JSON with:
{{
  "summary": "2-3 sentence executive summary",
  "topics": ["topic1", "topic2", "topic3"],
  "entities": {{
    "companies": ["Company A"],
    "technologies": ["Tech A"],
    "locations": ["Location A"],
    "people": ["Person A"]
  }}
}}"#,
        title = hints.title.as_deref().unwrap_or("Unknown"),
        organization = hints.organization.as_deref().unwrap_or("Unknown"),
        chars = ANALYSIS_EXCERPT_CHARS,
    )
}

/// Models wrap JSON in prose or code fences more often than not; take the
/// outermost brace-delimited block and parse that.
fn parse_analysis_response(response: &str) -> Result<DocumentAnalysis> {
    let start = response
        .find('{')
        .context("No JSON object in analysis response")?;
    let end = response
        .rfind('}')
        .context("No JSON object in analysis response")?;
    let block = &response[start..=end];
    serde_json::from_str(block).context("Analysis response was not the expected JSON shape")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json_response() {
        let response = r#"{"summary": "A report.", "topics": ["rates"], "entities": {"companies": ["BIS"]}}"#;
        let analysis = parse_analysis_response(response).unwrap();
        assert_eq!(analysis.summary, "A report.");
        assert_eq!(analysis.topics, vec!["rates"]);
        assert_eq!(analysis.entities["companies"], vec!["BIS"]);
    }

    #[test]
    fn parses_fenced_json_response() {
        let response = "Here you go:\n```json\n{\"summary\": \"S\", \"topics\": []}\n```";
        let analysis = parse_analysis_response(response).unwrap();
        assert_eq!(analysis.summary, "S");
        assert!(analysis.topics.is_empty());
        assert!(analysis.entities.is_empty());
    }

    #[test]
    fn rejects_response_without_json() {
        assert!(parse_analysis_response("I cannot analyze this document.").is_err());
    }

    #[test]
    fn prompt_includes_hints_and_excerpt() {
        let hints = AnalysisHints {
            title: Some("Annual Report".to_string()),
            organization: Some("BIS".to_string()),
        };
        let prompt = build_prompt("Document body text", &hints);
        assert!(prompt.contains("Title: Annual Report"));
        assert!(prompt.contains("Organization: BIS"));
        assert!(prompt.contains("Document body text"));
    }

    #[test]
    fn prompt_truncates_long_documents() {
        let markdown = "word ".repeat(2000);
        let prompt = build_prompt(&markdown, &AnalysisHints::default());
        // Excerpt is capped even though the source is far longer.
        assert!(prompt.len() < markdown.len());
    }

    #[tokio::test]
    #[ignore] // Requires API key
    async fn analyze_real_document() {
        let api_key = std::env::var("OPENAI_API_KEY")
            .expect("OPENAI_API_KEY must be set for integration tests");

        let analyzer = OpenAiAnalyzer::new(&api_key);
        let hints = AnalysisHints {
            title: Some("Test".to_string()),
            organization: None,
        };
        let analysis = analyzer
            .analyze("# Test\n\nCentral banks raised rates in 2024.", &hints)
            .await
            .expect("analysis should succeed");

        assert!(!analysis.summary.is_empty());
    }
}
