use thiserror::Error;

#[derive(Error, Debug)]
pub enum InsightError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Service Layer request failed: {message}")]
    Fetch {
        status: Option<u16>,
        message: String,
    },

    #[error("Query cancelled")]
    Cancelled,

    #[error("Malformed Service Layer response: {0}")]
    MalformedResponse(String),

    #[error("Could not resolve query: {0}")]
    QueryResolution(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, InsightError>;
