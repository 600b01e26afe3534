use serde::{Deserialize, Serialize};

use crate::error::{InsightError, Result};

/// Sessions are valid for 30 minutes from creation, fixed policy.
pub const SESSION_TTL_SECS: u64 = 30 * 60;

/// Background hygiene sweep of the session cache. Lazy eviction on `get` is
/// already correct; the sweep only bounds memory.
pub const SESSION_SWEEP_INTERVAL_SECS: u64 = 5 * 60;

pub const LOGIN_TIMEOUT_SECS: u64 = 15;
pub const FETCH_TIMEOUT_SECS: u64 = 30;

/// One Service Layer connection. The password is carried here but is
/// deliberately not part of the session cache key (see `ConnectionIdentity`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub server_url: String,
    pub company_db: String,
    pub username: String,
    pub password: String,

    /// Accept self-signed certificates for this connection only. Target
    /// environments frequently run the Service Layer with self-signed TLS.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl ConnectionConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            server_url: require_env("B1_SERVER_URL")?,
            company_db: require_env("B1_COMPANY_DB")?,
            username: require_env("B1_USERNAME")?,
            password: require_env("B1_PASSWORD")?,
            accept_invalid_certs: std::env::var("B1_ACCEPT_INVALID_CERTS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        })
    }

    pub fn base_url(&self) -> String {
        normalize_server_url(&self.server_url)
    }
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| InsightError::Config(format!("{} is not set", name)))
}

/// Normalize the many surface forms users paste for the same logical server:
/// bare host, base with trailing slash, or the full login endpoint.
pub fn normalize_server_url(raw: &str) -> String {
    let mut url = raw.trim().trim_end_matches('/').to_string();
    for suffix in ["/Login", "/login"] {
        if url.ends_with(suffix) {
            url.truncate(url.len() - suffix.len());
        }
    }
    while url.ends_with('/') {
        url.pop();
    }
    let lower = url.to_lowercase();
    if lower.ends_with("/b1s/v1") || lower.ends_with("/b1s/v2") {
        url
    } else {
        format!("{}/b1s/v1", url)
    }
}

/// Pagination tuning. The tolerance and streak values are empirically chosen
/// against real Service Layer installations; they are named and overridable
/// rather than inlined.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Nominal page size requested via `$top`. The server may silently cap it.
    pub page_size: u64,

    /// Consecutive zero-row pages tolerated as transient glitches before the
    /// fetch is taken as end-of-data.
    pub empty_page_tolerance: u32,

    /// Consecutive identical non-zero page sizes before logging a likely
    /// server-imposed page cap. Never terminates pagination by itself.
    pub repeated_count_warn_streak: u32,

    /// Hard ceiling on total rows fetched, bounding worst-case cost against a
    /// misbehaving upstream.
    pub safety_row_ceiling: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            empty_page_tolerance: 3,
            repeated_count_warn_streak: 5,
            safety_row_ceiling: 100_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_trailing_slashes() {
        assert_eq!(
            normalize_server_url("https://b1.example.com:50000/b1s/v1/"),
            "https://b1.example.com:50000/b1s/v1"
        );
    }

    #[test]
    fn strips_login_suffix() {
        assert_eq!(
            normalize_server_url("https://b1.example.com:50000/b1s/v1/Login"),
            "https://b1.example.com:50000/b1s/v1"
        );
    }

    #[test]
    fn appends_service_layer_base_when_missing() {
        assert_eq!(
            normalize_server_url("https://b1.example.com:50000"),
            "https://b1.example.com:50000/b1s/v1"
        );
    }

    #[test]
    fn keeps_v2_base() {
        assert_eq!(
            normalize_server_url("https://b1.example.com:50000/b1s/v2"),
            "https://b1.example.com:50000/b1s/v2"
        );
    }

    #[test]
    fn equivalent_forms_normalize_identically() {
        let forms = [
            "https://b1.example.com:50000",
            "https://b1.example.com:50000/",
            "https://b1.example.com:50000/b1s/v1",
            "https://b1.example.com:50000/b1s/v1/",
            "https://b1.example.com:50000/b1s/v1/Login",
        ];
        for form in forms {
            assert_eq!(normalize_server_url(form), "https://b1.example.com:50000/b1s/v1");
        }
    }
}
