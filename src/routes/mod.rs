use axum::{Router, middleware};
use std::sync::Arc;

use crate::middleware::connection_limit_middleware;
use crate::state::AppState;

pub mod api;
pub mod calls;
pub mod ws;

/// Combine all routes with their state.
///
/// The media WebSocket carries the connection limit layer. Cross-cutting
/// layers (CORS, rate limiting, security headers) are added by the binary.
pub fn create_router(state: Arc<AppState>) -> Router {
    let ws_routes = ws::create_ws_router().layer(middleware::from_fn_with_state(
        Arc::clone(&state),
        connection_limit_middleware,
    ));

    api::create_api_router()
        .merge(calls::create_calls_router())
        .merge(ws_routes)
        .with_state(state)
}
