//! Service Layer HTTP client and pagination engine.

pub mod fetcher;
pub mod response;

pub use fetcher::{FetchRequest, PaginatedFetcher, RowSet, StopReason};

use crate::auth::build_client;
use crate::config::{ConnectionConfig, FETCH_TIMEOUT_SECS};
use crate::error::{InsightError, Result};

/// One result record. Shape is determined by the upstream resource and is
/// unknown ahead of time; no assumptions beyond "object with named fields".
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Low-level authenticated GET access to one connection's Service Layer.
pub struct ServiceLayerClient {
    http: reqwest::Client,
    base_url: String,
}

impl ServiceLayerClient {
    pub fn new(config: &ConnectionConfig) -> Result<Self> {
        let http = build_client(config, FETCH_TIMEOUT_SECS)
            .map_err(|e| InsightError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: config.base_url(),
        })
    }

    /// Issues one GET against a collection, presenting the session token the
    /// way the Service Layer expects it: as the `B1SESSION` cookie.
    pub async fn get_raw(&self, token: &str, resource: &str, query: &str) -> Result<(u16, String)> {
        let url = if query.is_empty() {
            format!("{}/{}", self.base_url, resource)
        } else {
            format!("{}/{}?{}", self.base_url, resource, query)
        };

        let response = self
            .http
            .get(&url)
            .header("Cookie", format!("B1SESSION={}", token))
            .send()
            .await
            .map_err(|e| InsightError::Fetch {
                status: None,
                message: format!("request to {} failed: {}", resource, e),
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| InsightError::Fetch {
            status: Some(status),
            message: format!("failed to read response body: {}", e),
        })?;

        Ok((status, body))
    }
}
