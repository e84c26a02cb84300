use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use dq_rules::{api, config, db, generator, metrics};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dq_rules=info".parse()?)
        )
        .init();

    info!("Starting dq-rules v{}", env!("CARGO_PKG_VERSION"));

    let cfg = config::load()?;
    info!("Configuration loaded");

    // One HTTP client shared by the BigQuery store and the Vertex AI generator
    let mut http = reqwest::Client::builder()
        .user_agent(concat!("dq-rules/", env!("CARGO_PKG_VERSION")));
    if let Some(secs) = cfg.gcp.request_timeout_secs {
        http = http.timeout(Duration::from_secs(secs));
    }
    let http = http.build().context("Failed to create HTTP client")?;

    let store = db::init(&cfg, http.clone()).await?;
    let generator: generator::SharedGenerator = Arc::new(
        generator::vertex::VertexGenerator::new(http, &cfg.gcp, &cfg.generator),
    );
    info!("SQL generator: Vertex AI model {}", cfg.generator.model);

    let metrics = Arc::new(metrics::RuleMetrics::default());

    api::serve(cfg, store, generator, metrics).await
}
