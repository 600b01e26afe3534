//! HTTP API server for b1-insight
//! Simple HTTP server using tokio and basic HTTP handling

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use b1_insight::assistant::{InsightAssistant, InsightRequest};
use b1_insight::cancel::CancelFlag;
use b1_insight::entities;
use b1_insight::error::InsightError;
use b1_insight::llm::LlmClient;
use b1_insight::session::SessionCache;

const MAX_REQUEST_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    if std::env::var("OPENAI_API_KEY").is_ok() {
        println!("✅ OpenAI API key found - LLM query resolution enabled");
    } else {
        println!("⚠️  OpenAI API key not found - keyword resolution and local chart heuristics only");
    }

    let cache = Arc::new(SessionCache::new());
    SessionCache::spawn_sweeper(Arc::clone(&cache));

    let llm = Arc::new(LlmClient::from_env());
    let assistant = Arc::new(InsightAssistant::new(llm.clone(), llm, cache));

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    println!("✅ b1-insight API listening on port {}", port);

    loop {
        let (stream, _addr) = listener.accept().await?;
        let assistant = Arc::clone(&assistant);
        tokio::spawn(handle_connection(stream, assistant));
    }
}

async fn handle_connection(mut stream: TcpStream, assistant: Arc<InsightAssistant>) {
    let request = match read_request(&mut stream).await {
        Ok(request) => request,
        Err(e) => {
            eprintln!("Failed to read from stream: {}", e);
            return;
        }
    };

    let response = handle_request(&request, &assistant).await;
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        eprintln!("Failed to write response: {}", e);
    }
}

/// Reads headers plus a Content-Length-delimited body; query payloads easily
/// exceed one read.
async fn read_request(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if buffer.len() > MAX_REQUEST_BYTES {
            break;
        }
        if let Some(header_end) = find_header_end(&buffer) {
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

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}

async fn handle_request(request: &str, assistant: &Arc<InsightAssistant>) -> String {
    let request_line = match request.lines().next() {
        Some(line) => line,
        None => return create_response(400, "Bad Request", "{}"),
    };
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return create_response(400, "Bad Request", "{}");
    }

    let method = parts[0];
    let mut path = parts[1];
    if let Some(query_start) = path.find('?') {
        path = &path[..query_start];
    }
    let path = path.trim_end_matches('/');
    let path = if path.is_empty() { "/" } else { path };

    match (method, path) {
        ("GET", "/api/health") => create_response(
            200,
            "OK",
            r#"{"status":"ok","service":"b1-insight-api"}"#,
        ),
        ("GET", "/api/entities") => {
            let entities_json = serde_json::json!({
                "entities": entities::ENTITY_CATALOG.iter().map(|entity| {
                    serde_json::json!({
                        "name": entity.name,
                        "description": entity.description,
                        "keywords": entity.keywords,
                    })
                }).collect::<Vec<_>>()
            });
            create_response(200, "OK", &entities_json.to_string())
        }
        ("POST", "/api/query") => {
            let body_start = request.find("\r\n\r\n").unwrap_or(request.len());
            let body = request[body_start..].trim();

            let json_str = match body.find('{') {
                Some(json_start) => &body[json_start..],
                None => {
                    return create_response(
                        400,
                        "Bad Request",
                        r#"{"error":"request body must be JSON"}"#,
                    )
                }
            };

            let parsed: InsightRequest = match serde_json::from_str(json_str) {
                Ok(parsed) => parsed,
                Err(e) => {
                    return create_response(
                        400,
                        "Bad Request",
                        &serde_json::json!({"error": format!("invalid request body: {}", e)})
                            .to_string(),
                    )
                }
            };

            match assistant.answer(&parsed, &CancelFlag::new()).await {
                Ok(response) => create_response(
                    200,
                    "OK",
                    &serde_json::to_string(&response).unwrap_or_else(|_| {
                        r#"{"error":"failed to serialize response"}"#.to_string()
                    }),
                ),
                Err(e) => {
                    let (status, status_text, category) = match &e {
                        InsightError::Auth(_) => (401, "Unauthorized", "auth"),
                        InsightError::QueryResolution(_) => {
                            (422, "Unprocessable Entity", "resolution")
                        }
                        InsightError::Cancelled => (499, "Client Closed Request", "cancelled"),
                        _ => (502, "Bad Gateway", "fetch"),
                    };
                    eprintln!("❌ query failed: {}", e);
                    create_response(
                        status,
                        status_text,
                        &serde_json::json!({"error": e.to_string(), "category": category})
                            .to_string(),
                    )
                }
            }
        }
        ("OPTIONS", _) => create_response(200, "OK", ""),
        _ => create_response(
            404,
            "Not Found",
            &serde_json::json!({"error": format!("endpoint not found: {} {}", method, path)})
                .to_string(),
        ),
    }
}

fn create_response(status: u16, status_text: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {}",
        status,
        status_text,
        body.len(),
        body
    )
}
