//! Connection limit middleware for the media WebSocket
//!
//! Enforces:
//! - Global maximum WebSocket connections
//! - Per-IP connection limits
//!
//! # Example
//!
//! ```ignore
//! use axum::Router;
//! use voice_call_bridge::middleware::connection_limit_middleware;
//!
//! let app = Router::new()
//!     .route("/ws", get(ws_call_handler))
//!     .layer(axum::middleware::from_fn_with_state(
//!         state.clone(),
//!         connection_limit_middleware,
//!     ));
//! ```

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::state::{AppState, ConnectionLimitError};

/// A reserved WebSocket slot.
///
/// Inserted into the request extensions by the middleware. Clones share the
/// slot, which is returned when the last clone is dropped, so a rejected
/// upgrade releases it with the request and an accepted one when the
/// session ends.
#[derive(Clone, Debug)]
pub struct ConnectionPermit {
    inner: Arc<PermitInner>,
}

#[derive(Debug)]
struct PermitInner {
    state: Arc<AppState>,
    ip: IpAddr,
}

impl ConnectionPermit {
    pub fn ip(&self) -> IpAddr {
        self.inner.ip
    }
}

impl Drop for PermitInner {
    fn drop(&mut self) {
        self.state.release_connection(self.ip);
    }
}

/// Middleware that enforces connection limits for WebSocket upgrades.
///
/// Returns 503 when the global limit is reached and 429 when the per-IP
/// limit is reached. Requests without an `Upgrade: websocket` header pass
/// through unchecked.
pub async fn connection_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let is_ws_upgrade = request
        .headers()
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if !is_ws_upgrade {
        return next.run(request).await;
    }

    let client_ip = addr.ip();
    match state.try_acquire_connection(client_ip) {
        Ok(()) => {
            let permit = ConnectionPermit {
                inner: Arc::new(PermitInner {
                    state: Arc::clone(&state),
                    ip: client_ip,
                }),
            };
            request.extensions_mut().insert(permit);
            next.run(request).await
        }
        Err(ConnectionLimitError::GlobalLimitReached) => {
            tracing::warn!(ip = %client_ip, "Rejecting connection: global limit reached");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Server at capacity. Please try again later.",
            )
                .into_response()
        }
        Err(ConnectionLimitError::PerIpLimitReached) => {
            tracing::warn!(ip = %client_ip, "Rejecting connection: per-IP limit reached");
            (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many connections from your IP address.",
            )
                .into_response()
        }
    }
}
