use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use crate::AppState;

pub mod api;

/// Full application router with state attached.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(api::routes(&state))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
