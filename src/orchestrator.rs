//! Query Orchestrator
//!
//! Drives the paginated fetcher with a narrow retry policy:
//!
//! - a classified session failure triggers exactly one invalidate + forced
//!   re-login + refetch, never a loop;
//! - an invalid-property failure against a volatile-schema resource triggers
//!   exactly one degraded refetch with the filter stripped down to the
//!   caller's explicit row-limit clause.
//!
//! Every retry is a fresh, fully independent fetch; no partial result from a
//! failed attempt is ever reused.

use std::sync::Arc;

use tracing::warn;

use crate::auth::Authenticator;
use crate::cancel::CancelFlag;
use crate::config::ConnectionConfig;
use crate::entities;
use crate::error::{InsightError, Result};
use crate::error_classifier::{FailureClassifier, FailureKind};
use crate::post_filter::{self, RowPredicate};
use crate::service_layer::fetcher::extract_top_clause;
use crate::service_layer::{FetchRequest, PaginatedFetcher, RowSet};
use crate::session::ConnectionIdentity;

pub struct QueryOrchestrator {
    authenticator: Arc<Authenticator>,
    classifier: FailureClassifier,
}

impl QueryOrchestrator {
    pub fn new(authenticator: Arc<Authenticator>) -> Self {
        Self {
            authenticator,
            classifier: FailureClassifier::new(),
        }
    }

    pub async fn execute(
        &self,
        config: &ConnectionConfig,
        fetcher: &PaginatedFetcher,
        request: &FetchRequest,
        post_predicates: &[RowPredicate],
        cancel: &CancelFlag,
    ) -> Result<RowSet> {
        cancel.check()?;
        let token = self
            .authenticator
            .login(config, false)
            .await
            .map_err(|failure| InsightError::Auth(failure.to_string()))?;
        cancel.check()?;

        let mut outcome = fetcher.fetch(&token, request, cancel).await;

        let failure_kind = match &outcome {
            Err(InsightError::Cancelled) => return Err(InsightError::Cancelled),
            Err(error) => Some(self.classifier.classify(error)),
            Ok(_) => None,
        };
        match failure_kind {
            Some(FailureKind::SessionExpired) => {
                warn!(resource = %request.resource, "fetch hit a session problem; forcing re-login");
                let identity = ConnectionIdentity::from_config(config);
                self.authenticator.cache().invalidate(&identity);
                cancel.check()?;
                let fresh = self
                    .authenticator
                    .login(config, true)
                    .await
                    .map_err(|failure| InsightError::Auth(failure.to_string()))?;
                cancel.check()?;
                outcome = fetcher.fetch(&fresh, request, cancel).await;
            }
            Some(FailureKind::InvalidProperty)
                if entities::has_volatile_schema(&request.resource) =>
            {
                warn!(
                    resource = %request.resource,
                    "filter rejected on a volatile-schema resource; retrying without it"
                );
                let degraded = degraded_request(request);
                cancel.check()?;
                outcome = fetcher.fetch(&token, &degraded, cancel).await;
            }
            _ => {}
        }

        let mut result = outcome?;
        if !post_predicates.is_empty() {
            result.rows = post_filter::apply(result.rows, post_predicates);
        }
        Ok(result)
    }
}

/// Best-effort degraded query: keeps the caller's explicit row-limit clause,
/// drops everything else. The clause also feeds the row limit so paginated
/// mode honors it after the filter is stripped.
fn degraded_request(request: &FetchRequest) -> FetchRequest {
    let explicit_top = extract_top_clause(&request.filter);
    FetchRequest {
        resource: request.resource.clone(),
        filter: explicit_top
            .map(|top| format!("$top={}", top))
            .unwrap_or_default(),
        row_limit: request.row_limit.or(explicit_top),
        paginate: request.paginate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_request_keeps_only_the_row_limit_clause() {
        let request = FetchRequest {
            resource: "Activities".to_string(),
            filter: "$filter=StartDate ge '2026-01-01'&$top=25".to_string(),
            row_limit: None,
            paginate: true,
        };
        let degraded = degraded_request(&request);
        assert_eq!(degraded.filter, "$top=25");
        assert_eq!(degraded.row_limit, Some(25));

        let bare = degraded_request(&FetchRequest {
            resource: "Activities".to_string(),
            filter: "$filter=StartDate ge '2026-01-01'".to_string(),
            row_limit: Some(10),
            paginate: true,
        });
        assert_eq!(bare.filter, "");
        assert_eq!(bare.row_limit, Some(10));
    }
}
