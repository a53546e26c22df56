use axum::{
    Form, Json, Router,
    extract::State,
    http::StatusCode,
    routing::post,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::web::{ApiMessage, AppState, json_error};

const MIN_KEY_LEN: usize = 20;

pub fn router() -> Router<AppState> {
    Router::new().route("/verify-api-key", post(verify_api_key))
}

#[derive(Deserialize)]
struct VerifyForm {
    api_key: String,
}

/// `POST /verify-api-key` — round-trips a model-listing call to check that a
/// caller-supplied key can actually drive evaluations.
async fn verify_api_key(
    State(state): State<AppState>,
    Form(form): Form<VerifyForm>,
) -> Result<Json<Value>, (StatusCode, Json<ApiMessage>)> {
    let key = form.api_key.trim();
    if key.len() < MIN_KEY_LEN {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "API key is too short or appears invalid.",
        ));
    }

    match state.gemini().verify_key(key).await {
        Ok(models) => {
            info!(models, "API key verified");
            Ok(Json(json!({
                "status": "success",
                "message": "API key is valid and can generate content.",
            })))
        }
        Err(err) => {
            warn!(%err, "API key verification failed");
            Err(json_error(
                StatusCode::BAD_REQUEST,
                "Invalid API key or connection error. Please check the key and try again.",
            ))
        }
    }
}
