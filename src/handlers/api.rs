use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;
use std::sync::Arc;

use crate::core::SessionInfo;
use crate::errors::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_sessions: usize,
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        active_sessions: state.sessions.len(),
    })
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub count: usize,
    pub sessions: Vec<SessionInfo>,
}

/// List live call sessions, oldest first.
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<SessionsResponse> {
    let sessions = state.sessions.list();
    Json(SessionsResponse {
        count: sessions.len(),
        sessions,
    })
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> AppResult<Json<SessionInfo>> {
    state
        .sessions
        .get(&session_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))
}
