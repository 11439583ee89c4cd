use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::{configs::ServerConfig, server::AppState};

/// Whether `headers` satisfy the configured password. No password means an
/// open server.
pub fn authorized(headers: &HeaderMap, config: &ServerConfig) -> Result<(), &'static str> {
    let Some(password) = config.password.as_deref() else {
        return Ok(());
    };

    match headers.get("authorization").and_then(|h| h.to_str().ok()) {
        Some(auth) if auth == password => Ok(()),
        Some(_) => Err("Invalid password"),
        None => Err("Missing Authorization header"),
    }
}

pub async fn check_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    match authorized(req.headers(), &state.config.server) {
        Ok(()) => Ok(next.run(req).await),
        Err(reason) => {
            warn!("Authorization failed: {}", reason);
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

pub async fn add_response_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    response
        .headers_mut()
        .insert("Promptwave-Api-Version", HeaderValue::from_static("1"));
    response
}
