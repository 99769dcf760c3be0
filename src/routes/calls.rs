use axum::{Router, routing::post};
use tower_http::trace::TraceLayer;

use crate::handlers::calls;
use crate::state::AppState;
use std::sync::Arc;

/// Create the call automation webhook router
///
/// Event Grid and call automation deliver JSON arrays of events; neither
/// carries bearer tokens, so these routes sit outside any auth layer.
pub fn create_calls_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/calls/incoming", post(calls::incoming_call))
        .route("/calls/callbacks/{context_id}", post(calls::call_callback))
        .layer(TraceLayer::new_for_http())
}
