use std::sync::Arc;

use axum::{Router, middleware, routing::get};

use crate::{
    server::AppState,
    transport::{
        middleware::{add_response_headers, check_auth},
        routes,
        websocket_server::websocket_handler,
    },
};

const API_V1: &str = "/v1";

pub fn router(state: Arc<AppState>) -> Router {
    let v1_routes = Router::new()
        .route("/ws", get(websocket_handler))
        .route("/status", get(routes::get_status))
        .route("/prompts", get(routes::get_prompts));

    Router::new()
        .nest(API_V1, v1_routes)
        .layer(middleware::from_fn_with_state(state.clone(), check_auth))
        .layer(middleware::from_fn(add_response_headers))
        .with_state(state)
}
