use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::config::AppConfig;
use crate::web::{AppState, evaluate, keys, reports, rubrics};

const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(state.config());

    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .merge(evaluate::router())
        .merge(reports::router())
        .merge(rubrics::router())
        .merge(keys::router())
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    if config.cors_allow_any_origin() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn root() -> impl IntoResponse {
    Json(json!({ "message": "AI Essay Grader Backend is running" }))
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}
