//! Authenticator
//!
//! Performs the Service Layer login handshake, reusing cached sessions where
//! possible. Every failure path resolves to an [`AuthFailure`] value; callers
//! need to distinguish "no session" from "crashed", so nothing is allowed to
//! panic past this boundary.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::{ConnectionConfig, LOGIN_TIMEOUT_SECS};
use crate::session::{ConnectionIdentity, SessionCache};

#[derive(Debug, Clone)]
pub struct AuthFailure {
    pub status: Option<u16>,
    pub message: String,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (HTTP {})", self.message, status),
            None => write!(f, "{}", self.message),
        }
    }
}

pub struct Authenticator {
    cache: Arc<SessionCache>,
}

impl Authenticator {
    pub fn new(cache: Arc<SessionCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<SessionCache> {
        &self.cache
    }

    /// Returns a valid session token, from cache when possible.
    ///
    /// `force_new` skips the cache entirely, for callers that just watched a
    /// cached token get rejected upstream.
    pub async fn login(
        &self,
        config: &ConnectionConfig,
        force_new: bool,
    ) -> Result<String, AuthFailure> {
        let identity = ConnectionIdentity::from_config(config);

        if !force_new {
            if let Some(token) = self.cache.get(&identity) {
                debug!(company_db = %config.company_db, "reusing cached Service Layer session");
                return Ok(token);
            }
        }

        let client = match build_client(config, LOGIN_TIMEOUT_SECS) {
            Ok(client) => client,
            Err(e) => {
                return Err(AuthFailure {
                    status: None,
                    message: format!("failed to build HTTP client: {}", e),
                })
            }
        };

        let login_url = format!("{}/Login", config.base_url());
        let body = json!({
            "CompanyDB": config.company_db,
            "UserName": config.username,
            "Password": config.password,
        });

        let response = match client.post(&login_url).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                self.cache.invalidate(&identity);
                return Err(AuthFailure {
                    status: None,
                    message: format!("login request failed: {}", e),
                });
            }
        };

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            self.cache.invalidate(&identity);
            warn!(status = status.as_u16(), "Service Layer login rejected");
            return Err(AuthFailure {
                status: Some(status.as_u16()),
                message: login_error_message(&text),
            });
        }

        let token = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|v| {
                v.get("SessionId")
                    .and_then(|s| s.as_str())
                    .map(str::to_string)
            });

        match token {
            Some(token) => {
                self.cache.put(identity, token.clone());
                info!(company_db = %config.company_db, "Service Layer login succeeded");
                Ok(token)
            }
            None => {
                // A forced login that comes back token-less means the stored
                // credentials are truly invalid, not just the old session.
                if force_new {
                    self.cache.invalidate(&identity);
                }
                Err(AuthFailure {
                    status: Some(status.as_u16()),
                    message: "login response carried no session token".to_string(),
                })
            }
        }
    }
}

/// TLS relaxation is scoped to this one connection's client, never
/// process-global.
pub(crate) fn build_client(
    config: &ConnectionConfig,
    timeout_secs: u64,
) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(config.accept_invalid_certs)
        .timeout(Duration::from_secs(timeout_secs))
        .build()
}

fn login_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message/value")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                "login rejected with no response body".to_string()
            } else {
                trimmed.chars().take(300).collect()
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_error_message_prefers_nested_value() {
        let body = r#"{"error":{"code":-304,"message":{"value":"Wrong user name or password"}}}"#;
        assert_eq!(login_error_message(body), "Wrong user name or password");
    }

    #[test]
    fn login_error_message_falls_back_to_raw_body() {
        assert_eq!(login_error_message("gateway exploded"), "gateway exploded");
        assert_eq!(
            login_error_message("   "),
            "login rejected with no response body"
        );
    }
}
