use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};

use crate::server::AppState;

/// GET /v1/status
pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("GET /v1/status");
    match state.engine.snapshot().await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(e) => {
            tracing::error!("Status unavailable: {}", e);
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

/// GET /v1/prompts
pub async fn get_prompts(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("GET /v1/prompts");
    Json(state.deck.clone())
}
