//! The exposed request/response surface.
//!
//! One operation: a natural-language question plus connection credentials
//! in, resolved resource + rows + chart recommendation out, with each
//! failure category kept distinct for the caller.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::Authenticator;
use crate::cancel::CancelFlag;
use crate::chart::{self, ChartRecommendation};
use crate::config::{ConnectionConfig, FetcherConfig};
use crate::entities;
use crate::error::{InsightError, Result};
use crate::llm::{ChartAdvisor, QueryResolver, ResolvedQuery};
use crate::orchestrator::QueryOrchestrator;
use crate::post_filter;
use crate::service_layer::{FetchRequest, PaginatedFetcher, Row, ServiceLayerClient};
use crate::session::SessionCache;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightRequest {
    pub question: String,
    /// `{{name}}` placeholders in the question are replaced before
    /// resolution.
    #[serde(default)]
    pub variables: HashMap<String, String>,
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub row_limit: Option<u64>,
    #[serde(default = "default_paginate")]
    pub paginate: bool,
}

fn default_paginate() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct InsightResponse {
    pub resource: String,
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub total_hint: Option<u64>,
    pub chart: ChartRecommendation,
}

/// How many rows the chart advisor sees. The head of the result set, not a
/// random sample, so repeat queries stay deterministic.
const CHART_SAMPLE_ROWS: usize = 5;

pub struct InsightAssistant {
    resolver: Arc<dyn QueryResolver>,
    chart_advisor: Arc<dyn ChartAdvisor>,
    orchestrator: QueryOrchestrator,
    fetcher_config: FetcherConfig,
    session_cache: Arc<SessionCache>,
}

impl InsightAssistant {
    pub fn new(
        resolver: Arc<dyn QueryResolver>,
        chart_advisor: Arc<dyn ChartAdvisor>,
        session_cache: Arc<SessionCache>,
    ) -> Self {
        let authenticator = Arc::new(Authenticator::new(Arc::clone(&session_cache)));
        Self {
            resolver,
            chart_advisor,
            orchestrator: QueryOrchestrator::new(authenticator),
            fetcher_config: FetcherConfig::default(),
            session_cache,
        }
    }

    pub fn with_fetcher_config(mut self, config: FetcherConfig) -> Self {
        self.fetcher_config = config;
        self
    }

    pub fn session_cache(&self) -> &Arc<SessionCache> {
        &self.session_cache
    }

    pub async fn answer(
        &self,
        request: &InsightRequest,
        cancel: &CancelFlag,
    ) -> Result<InsightResponse> {
        let query_id = Uuid::new_v4();
        let question = apply_variables(&request.question, &request.variables);
        info!(%query_id, question = %question, "answering question");

        cancel.check()?;
        let resolved = match self
            .resolver
            .resolve_query(&question, entities::ENTITY_CATALOG)
            .await
        {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(%query_id, error = %e, "query resolver unavailable; falling back to keyword resolution");
                ResolvedQuery {
                    resource: String::new(),
                    filter: String::new(),
                    confidence: 0.0,
                }
            }
        };

        let entity = entities::resolve(&resolved.resource, &question).ok_or_else(|| {
            InsightError::QueryResolution(format!(
                "could not map the question to a known Service Layer entity (candidate: {:?})",
                resolved.resource
            ))
        })?;
        if !entity.name.eq_ignore_ascii_case(&resolved.resource) {
            info!(
                %query_id,
                candidate = %resolved.resource,
                resolved = entity.name,
                "resolver output corrected against the entity catalog"
            );
        }

        let fetch_request = FetchRequest {
            resource: entity.name.to_string(),
            filter: resolved.filter.clone(),
            row_limit: request.row_limit,
            paginate: request.paginate,
        };
        let predicates = post_filter::derive(entity.name, &question);

        let client = ServiceLayerClient::new(&request.connection)?;
        let fetcher = PaginatedFetcher::new(client, self.fetcher_config.clone());
        let result = self
            .orchestrator
            .execute(
                &request.connection,
                &fetcher,
                &fetch_request,
                &predicates,
                cancel,
            )
            .await?;

        cancel.check()?;
        let sample: Vec<Row> = result.rows.iter().take(CHART_SAMPLE_ROWS).cloned().collect();
        let chart = match self.chart_advisor.recommend_chart(&sample, &question).await {
            Ok(recommendation) => recommendation,
            Err(e) => {
                warn!(%query_id, error = %e, "chart advisor unavailable; using local heuristics");
                chart::recommend_local(&result.rows, &question)
            }
        };

        info!(
            %query_id,
            resource = entity.name,
            rows = result.rows.len(),
            "question answered"
        );
        Ok(InsightResponse {
            resource: entity.name.to_string(),
            row_count: result.rows.len(),
            total_hint: result.total_hint,
            rows: result.rows,
            chart,
        })
    }
}

fn apply_variables(question: &str, variables: &HashMap<String, String>) -> String {
    let mut text = question.to_string();
    for (name, value) in variables {
        text = text.replace(&format!("{{{{{}}}}}", name), value);
    }
    text
}
