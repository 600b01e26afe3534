//! LLM collaborators.
//!
//! Both the NL-to-query step and the chart advisor are function-shaped
//! dependencies behind trait seams; the engine depends on their signatures
//! and fallback contracts, not on prompt engineering. [`LlmClient`] is the
//! bundled OpenAI-style implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chart::{ChartKind, ChartRecommendation};
use crate::entities::EntityDescriptor;
use crate::error::{InsightError, Result};
use crate::service_layer::Row;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedQuery {
    /// Target collection name; validated against the entity catalog before
    /// any request is built from it.
    pub resource: String,
    /// Raw OData query fragment, possibly empty.
    #[serde(default)]
    pub filter: String,
    #[serde(default)]
    pub confidence: f64,
}

#[async_trait]
pub trait QueryResolver: Send + Sync {
    async fn resolve_query(
        &self,
        question: &str,
        catalog: &[EntityDescriptor],
    ) -> Result<ResolvedQuery>;
}

#[async_trait]
pub trait ChartAdvisor: Send + Sync {
    async fn recommend_chart(&self, sample: &[Row], question: &str) -> Result<ChartRecommendation>;
}

pub struct LlmClient {
    api_key: String,
    model: String,
    base_url: String,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            api_key,
            model,
            base_url,
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            std::env::var("OPENAI_API_KEY").unwrap_or_else(|_| "dummy-api-key".to_string()),
            std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
        )
    }

    fn offline(&self) -> bool {
        self.api_key == "dummy-api-key"
    }

    async fn call_llm(&self, prompt: &str) -> Result<String> {
        let client = reqwest::Client::new();
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You are a precise JSON-only responder. Always return valid JSON, no other text."},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.1,
            "max_tokens": 500
        });

        let response = client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(Duration::from_secs(30))
            .json(&body)
            .send()
            .await
            .map_err(|e| InsightError::Llm(format!("LLM API call failed: {}", e)))?;

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| InsightError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| InsightError::Llm("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }
}

#[async_trait]
impl QueryResolver for LlmClient {
    async fn resolve_query(
        &self,
        question: &str,
        catalog: &[EntityDescriptor],
    ) -> Result<ResolvedQuery> {
        if self.offline() {
            // Offline mode: hand the catalog's keyword fallback an empty
            // candidate so resolution stays local.
            return Ok(ResolvedQuery {
                resource: String::new(),
                filter: String::new(),
                confidence: 0.0,
            });
        }

        let catalog_lines: Vec<String> = catalog
            .iter()
            .map(|entity| {
                format!(
                    "- {} ({}): {}",
                    entity.name,
                    entity.keywords.join(", "),
                    entity.description
                )
            })
            .collect();

        let prompt = format!(
            r#"You translate business questions into SAP Business One Service Layer queries.

Valid entities (name (keywords): description):
{}

User question: "{}"

Pick the single best entity and an OData query fragment for it. The fragment
may use $filter, $orderby and $top. Leave it empty when the question needs
the whole collection. Return JSON in this exact format:
{{
  "resource": "Orders",
  "filter": "$filter=DocStatus eq 'bost_Open'&$top=50",
  "confidence": 0.9
}}

Only return the JSON, no other text."#,
            catalog_lines.join("\n"),
            question
        );

        let response = self.call_llm(&prompt).await?;
        let resolved: ResolvedQuery = serde_json::from_str(extract_json(&response))
            .map_err(|e| InsightError::Llm(format!("Failed to parse resolver response: {}", e)))?;
        Ok(resolved)
    }
}

#[derive(Debug, Deserialize)]
struct ChartSuggestion {
    chart: String,
    #[serde(default)]
    x_field: Option<String>,
    #[serde(default)]
    y_field: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

#[async_trait]
impl ChartAdvisor for LlmClient {
    async fn recommend_chart(&self, sample: &[Row], question: &str) -> Result<ChartRecommendation> {
        if self.offline() {
            // Callers degrade to the local heuristic on any advisor error.
            return Err(InsightError::Llm("no API key configured".to_string()));
        }

        let sample_json = serde_json::to_string(sample)?;
        let prompt = format!(
            r#"Recommend a chart for this query result.

User question: "{}"

Sample rows:
{}

Return JSON in this exact format (chart is one of "bar", "line", "pie", "table"):
{{
  "chart": "bar",
  "x_field": "CardName",
  "y_field": "DocTotal",
  "reason": "totals per customer"
}}

Only return the JSON, no other text."#,
            question, sample_json
        );

        let response = self.call_llm(&prompt).await?;
        let suggestion: ChartSuggestion = serde_json::from_str(extract_json(&response))
            .map_err(|e| InsightError::Llm(format!("Failed to parse chart response: {}", e)))?;

        let chart = match suggestion.chart.to_lowercase().as_str() {
            "bar" => ChartKind::Bar,
            "line" => ChartKind::Line,
            "pie" => ChartKind::Pie,
            "table" | "grid" => ChartKind::Table,
            other => {
                return Err(InsightError::Llm(format!(
                    "advisor suggested unknown chart kind: {}",
                    other
                )))
            }
        };

        Ok(ChartRecommendation {
            chart,
            x_field: suggestion.x_field,
            y_field: suggestion.y_field,
            reason: suggestion.reason.unwrap_or_default(),
        })
    }
}

/// LLMs occasionally wrap the JSON in prose or code fences despite the
/// contract; keep just the outermost object.
fn extract_json(text: &str) -> &str {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end >= start => &text[start..=end],
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_unwraps_fences() {
        let text = "```json\n{\"resource\": \"Orders\"}\n```";
        assert_eq!(extract_json(text), "{\"resource\": \"Orders\"}");
        assert_eq!(extract_json("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(extract_json("no json here"), "no json here");
    }

    #[tokio::test]
    async fn offline_resolver_defers_to_catalog_fallback() {
        let client = LlmClient::new(
            "dummy-api-key".to_string(),
            "gpt-4o-mini".to_string(),
            "https://api.openai.com/v1".to_string(),
        );
        let resolved = client
            .resolve_query("open orders", crate::entities::ENTITY_CATALOG)
            .await
            .expect("offline resolution");
        assert!(resolved.resource.is_empty());
        assert_eq!(resolved.confidence, 0.0);
    }

    #[tokio::test]
    async fn offline_chart_advisor_reports_unavailable() {
        let client = LlmClient::new(
            "dummy-api-key".to_string(),
            "gpt-4o-mini".to_string(),
            "https://api.openai.com/v1".to_string(),
        );
        assert!(matches!(
            client.recommend_chart(&[], "anything").await,
            Err(InsightError::Llm(_))
        ));
    }
}
