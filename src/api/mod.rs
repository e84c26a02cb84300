use anyhow::Result;
use axum::Router;
use axum::http::{Method, HeaderValue, header};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use std::sync::Arc;
use crate::config::Config;
use crate::db::SharedStore;
use crate::generator::SharedGenerator;
use crate::metrics::RuleMetrics;

pub mod flash;
pub mod handlers;
pub mod router;
pub mod views;

pub struct AppState {
    pub store: SharedStore,
    pub generator: SharedGenerator,
    pub metrics: Arc<RuleMetrics>,
    /// Recorded as `source_project_id` / `source_dataset_id` on new rules.
    pub project_id: String,
    pub dataset_id: String,
}

pub async fn serve(
    cfg: Config,
    store: SharedStore,
    generator: SharedGenerator,
    metrics: Arc<RuleMetrics>,
) -> Result<()> {
    let bind_addr = format!("{}:{}", cfg.server.bind, cfg.server.port);
    let state = Arc::new(AppState {
        store,
        generator,
        metrics,
        project_id: cfg.gcp.project_id.clone(),
        dataset_id: cfg.gcp.dataset_id.clone(),
    });
    let cors = build_cors_layer(&cfg.server.cors_allowed_origins);
    let app = build_app(state, cors);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Rule manager listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    if origins.is_empty() {
        tracing::warn!("No valid CORS origins configured; CORS will block all cross-origin requests");
        return CorsLayer::new();
    }

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

pub fn build_app(state: Arc<AppState>, cors: CorsLayer) -> Router {
    Router::new()
        .merge(router::routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
