use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use b1_insight::assistant::{InsightAssistant, InsightRequest};
use b1_insight::cancel::CancelFlag;
use b1_insight::config::ConnectionConfig;
use b1_insight::llm::LlmClient;
use b1_insight::session::SessionCache;

#[derive(Parser)]
#[command(name = "b1-insight")]
#[command(about = "Ask natural-language questions against a SAP Business One Service Layer")]
struct Args {
    /// The question in natural language
    question: String,

    /// Service Layer base URL (or set B1_SERVER_URL)
    #[arg(long)]
    server_url: Option<String>,

    /// Company database (or set B1_COMPANY_DB)
    #[arg(long)]
    company_db: Option<String>,

    /// User name (or set B1_USERNAME)
    #[arg(long)]
    username: Option<String>,

    /// Password (or set B1_PASSWORD)
    #[arg(long)]
    password: Option<String>,

    /// Accept self-signed TLS certificates for this connection
    #[arg(long)]
    accept_invalid_certs: bool,

    /// Maximum number of rows to fetch
    #[arg(long)]
    limit: Option<u64>,

    /// Issue a single request instead of paginating
    #[arg(long)]
    no_paginate: bool,
}

fn flag_or_env(flag: Option<String>, flag_name: &str, env_name: &str) -> Result<String> {
    flag.or_else(|| std::env::var(env_name).ok())
        .ok_or_else(|| anyhow::anyhow!("{} or {} is required", flag_name, env_name))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let connection = ConnectionConfig {
        server_url: flag_or_env(args.server_url, "--server-url", "B1_SERVER_URL")?,
        company_db: flag_or_env(args.company_db, "--company-db", "B1_COMPANY_DB")?,
        username: flag_or_env(args.username, "--username", "B1_USERNAME")?,
        password: flag_or_env(args.password, "--password", "B1_PASSWORD")?,
        accept_invalid_certs: args.accept_invalid_certs
            || std::env::var("B1_ACCEPT_INVALID_CERTS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
    };

    info!("Query: {}", args.question);

    let llm = Arc::new(LlmClient::from_env());
    let assistant = InsightAssistant::new(llm.clone(), llm, Arc::new(SessionCache::new()));

    let request = InsightRequest {
        question: args.question,
        variables: Default::default(),
        connection,
        row_limit: args.limit,
        paginate: !args.no_paginate,
    };

    let response = assistant.answer(&request, &CancelFlag::new()).await?;

    println!("\nResource: {}", response.resource);
    match response.total_hint {
        Some(total) => println!("Rows: {} (upstream total {})", response.row_count, total),
        None => println!("Rows: {}", response.row_count),
    }
    for row in response.rows.iter().take(20) {
        println!("{}", serde_json::to_string(row)?);
    }
    if response.row_count > 20 {
        println!("... {} more rows", response.row_count - 20);
    }

    println!("\nSuggested chart: {:?}", response.chart.chart);
    if let (Some(x), Some(y)) = (&response.chart.x_field, &response.chart.y_field) {
        println!("Axes: {} vs {}", x, y);
    }
    if !response.chart.reason.is_empty() {
        println!("Why: {}", response.chart.reason);
    }

    Ok(())
}
