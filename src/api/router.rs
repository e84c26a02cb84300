use axum::{routing::{get, post}, Router};
use std::sync::Arc;
use super::AppState;
use super::handlers;

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        // Health (public)
        .route("/health", get(handlers::health::health_check))
        // Rule forms
        .route("/", get(handlers::rules::home))
        .route("/create", get(handlers::rules::create_form).post(handlers::rules::create))
        .route("/read", get(handlers::rules::read))
        .route("/update_form", get(handlers::rules::update_form))
        .route("/update", post(handlers::rules::update))
        .route("/delete_form", get(handlers::rules::delete_form))
        .route("/delete", post(handlers::rules::delete))
        // Prometheus metrics (public)
        .route("/metrics", get(handlers::metrics::prometheus_metrics))
        .with_state(state)
}
