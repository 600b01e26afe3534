//! Scripted Service Layer stand-in for integration tests.
//!
//! Plain HTTP over tokio, same as the real upstream speaks it: a `/Login`
//! endpoint that issues session tokens and collection endpoints that serve
//! slices of a canned dataset according to `$skip`/`$top`. Behavior knobs
//! simulate the upstream's known misfeatures (missing counts, silent page
//! caps, 401s for stale sessions, invalid-property rejections).

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use b1_insight::chart::ChartRecommendation;
use b1_insight::entities::EntityDescriptor;
use b1_insight::error::{InsightError, Result as InsightResult};
use b1_insight::llm::{ChartAdvisor, QueryResolver, ResolvedQuery};
use b1_insight::service_layer::Row;

#[derive(Debug, Clone)]
pub struct MockBehavior {
    pub dataset_size: u64,
    /// Include `@odata.count` when the request asks for an inline count.
    pub report_count: bool,
    /// Silently cap page sizes below what was requested.
    pub page_cap: Option<u64>,
    /// Reject every login with 401.
    pub reject_login: bool,
    /// Respond 400 invalid-property to any data request whose query contains
    /// this marker.
    pub fail_filters_containing: Option<String>,
    /// Delay before answering the first data request, so tests can cancel
    /// mid-flight deterministically.
    pub first_page_delay_ms: u64,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            dataset_size: 0,
            report_count: true,
            page_cap: None,
            reject_login: false,
            fail_filters_containing: None,
            first_page_delay_ms: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataRequest {
    pub resource: String,
    pub skip: u64,
    pub top: Option<u64>,
    pub raw_query: String,
}

pub struct MockServiceLayer {
    pub server_url: String,
    pub login_count: Arc<AtomicUsize>,
    pub data_requests: Arc<Mutex<Vec<DataRequest>>>,
}

impl MockServiceLayer {
    pub async fn start(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock listener");
        let addr = listener.local_addr().expect("mock local addr");

        let login_count = Arc::new(AtomicUsize::new(0));
        let data_requests = Arc::new(Mutex::new(Vec::new()));
        let valid_tokens = Arc::new(Mutex::new(HashSet::new()));
        let behavior = Arc::new(behavior);

        {
            let login_count = Arc::clone(&login_count);
            let data_requests = Arc::clone(&data_requests);
            let valid_tokens = Arc::clone(&valid_tokens);
            tokio::spawn(async move {
                loop {
                    let (stream, _) = match listener.accept().await {
                        Ok(accepted) => accepted,
                        Err(_) => break,
                    };
                    let login_count = Arc::clone(&login_count);
                    let data_requests = Arc::clone(&data_requests);
                    let valid_tokens = Arc::clone(&valid_tokens);
                    let behavior = Arc::clone(&behavior);
                    tokio::spawn(async move {
                        handle_connection(stream, behavior, login_count, data_requests, valid_tokens)
                            .await;
                    });
                }
            });
        }

        Self {
            server_url: format!("http://{}", addr),
            login_count,
            data_requests,
        }
    }

    pub fn logins(&self) -> usize {
        self.login_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<DataRequest> {
        self.data_requests.lock().expect("requests lock").clone()
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    behavior: Arc<MockBehavior>,
    login_count: Arc<AtomicUsize>,
    data_requests: Arc<Mutex<Vec<DataRequest>>>,
    valid_tokens: Arc<Mutex<HashSet<String>>>,
) {
    let request = match read_request(&mut stream).await {
        Ok(request) => request,
        Err(_) => return,
    };

    let response = route(
        &request,
        &behavior,
        &login_count,
        &data_requests,
        &valid_tokens,
    )
    .await;
    let _ = stream.write_all(response.as_bytes()).await;
}

async fn route(
    request: &str,
    behavior: &MockBehavior,
    login_count: &AtomicUsize,
    data_requests: &Mutex<Vec<DataRequest>>,
    valid_tokens: &Mutex<HashSet<String>>,
) -> String {
    let request_line = request.lines().next().unwrap_or_default();
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return http_response(400, "Bad Request", "{}");
    }
    let method = parts[0];
    let target = parts[1];
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, query),
        None => (target, ""),
    };

    if method == "POST" && path == "/b1s/v1/Login" {
        if behavior.reject_login {
            return http_response(
                401,
                "Unauthorized",
                &json!({"error": {"code": -304, "message": {"value": "Wrong user name or password"}}})
                    .to_string(),
            );
        }
        let n = login_count.fetch_add(1, Ordering::SeqCst) + 1;
        let token = format!("mock-session-{}", n);
        valid_tokens
            .lock()
            .expect("tokens lock")
            .insert(token.clone());
        return http_response(
            200,
            "OK",
            &json!({"SessionId": token, "Version": "1000191", "SessionTimeout": 30}).to_string(),
        );
    }

    if method == "GET" {
        if let Some(resource) = path.strip_prefix("/b1s/v1/") {
            // record every data request, rejected ones included; tests
            // assert on what was issued, not just what succeeded
            let skip = query_param_u64(query, "$skip").unwrap_or(0);
            let top = query_param_u64(query, "$top");
            let is_first = {
                let mut requests = data_requests.lock().expect("requests lock");
                requests.push(DataRequest {
                    resource: resource.to_string(),
                    skip,
                    top,
                    raw_query: query.to_string(),
                });
                requests.len() == 1
            };
            if is_first && behavior.first_page_delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(
                    behavior.first_page_delay_ms,
                ))
                .await;
            }

            let token = cookie_session(request);
            let valid = token
                .as_ref()
                .map(|t| valid_tokens.lock().expect("tokens lock").contains(t))
                .unwrap_or(false);
            if !valid {
                return http_response(
                    401,
                    "Unauthorized",
                    &json!({"error": {"code": 301, "message": {"value": "Invalid session or session already timeout."}}})
                        .to_string(),
                );
            }

            if let Some(marker) = &behavior.fail_filters_containing {
                if query.contains(marker) {
                    return http_response(
                        400,
                        "Bad Request",
                        &json!({"error": {"code": -1029, "message": {"value": format!("Property '{}' of '{}' is invalid", marker, resource)}}})
                            .to_string(),
                    );
                }
            }

            let mut effective_top = top.unwrap_or(20);
            if let Some(cap) = behavior.page_cap {
                effective_top = effective_top.min(cap);
            }
            let start = skip.min(behavior.dataset_size);
            let end = (skip + effective_top).min(behavior.dataset_size);
            let rows: Vec<serde_json::Value> = (start..end).map(|i| dataset_row(i)).collect();

            let mut body = serde_json::Map::new();
            if behavior.report_count && query.contains("$inlinecount") {
                body.insert("@odata.count".to_string(), json!(behavior.dataset_size));
            }
            body.insert("value".to_string(), json!(rows));
            return http_response(200, "OK", &serde_json::Value::Object(body).to_string());
        }
    }

    http_response(404, "Not Found", "{}")
}

fn dataset_row(index: u64) -> serde_json::Value {
    json!({
        "DocEntry": index + 1,
        "CardCode": format!("C{:05}", index + 1),
        "DocDate": format!("2026-01-{:02}", (index % 28) + 1),
        "DocTotal": ((index + 1) * 10) as f64,
    })
}

fn cookie_session(request: &str) -> Option<String> {
    for line in request.lines() {
        let (key, value) = match line.split_once(':') {
            Some(split) => split,
            None => continue,
        };
        if !key.trim().eq_ignore_ascii_case("cookie") {
            continue;
        }
        for cookie in value.split(';') {
            if let Some((name, token)) = cookie.trim().split_once('=') {
                if name == "B1SESSION" {
                    return Some(token.trim().to_string());
                }
            }
        }
    }
    None
}

fn query_param_u64(query: &str, name: &str) -> Option<u64> {
    for part in query.split('&') {
        if let Some(value) = part.strip_prefix(name) {
            if let Some(digits) = value.strip_prefix('=') {
                return digits.parse().ok();
            }
        }
    }
    None
}

async fn read_request(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if let Some(header_end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&buffer[..header_end]);
            let content_length = headers
                .lines()
                .find_map(|line| {
                    let (key, value) = line.split_once(':')?;
                    if key.trim().eq_ignore_ascii_case("content-length") {
                        value.trim().parse::<usize>().ok()
                    } else {
                        None
                    }
                })
                .unwrap_or(0);
            if buffer.len() >= header_end + 4 + content_length {
                break;
            }
        }
    }
    Ok(String::from_utf8_lossy(&buffer).to_string())
}

fn http_response(status: u16, status_text: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        status_text,
        body.len(),
        body
    )
}

// ---------------------------------------------------------------------------
// Collaborator stubs
// ---------------------------------------------------------------------------

pub struct StubResolver {
    pub resource: String,
    pub filter: String,
}

#[async_trait::async_trait]
impl QueryResolver for StubResolver {
    async fn resolve_query(
        &self,
        _question: &str,
        _catalog: &[EntityDescriptor],
    ) -> InsightResult<ResolvedQuery> {
        Ok(ResolvedQuery {
            resource: self.resource.clone(),
            filter: self.filter.clone(),
            confidence: 1.0,
        })
    }
}

/// Always-unavailable advisor, forcing the local heuristic fallback.
pub struct OfflineChartAdvisor;

#[async_trait::async_trait]
impl ChartAdvisor for OfflineChartAdvisor {
    async fn recommend_chart(
        &self,
        _sample: &[Row],
        _question: &str,
    ) -> InsightResult<ChartRecommendation> {
        Err(InsightError::Llm("advisor offline".to_string()))
    }
}
