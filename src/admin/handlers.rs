use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::bosh::session::{SessionSnapshot, TerminationReason};
use crate::http::server::AppState;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub sessions: usize,
    pub open_connections: u64,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        sessions: state.registry().len(),
        open_connections: state.connections.active_count(),
    })
}

pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSnapshot>> {
    Json(state.registry().snapshot())
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(sid): Path<String>,
) -> Result<Json<SessionSnapshot>, StatusCode> {
    state
        .registry()
        .lookup_raw(&sid)
        .map(|session| Json(session.snapshot()))
        .map_err(|_| StatusCode::NOT_FOUND)
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(sid): Path<String>,
) -> StatusCode {
    let registry = state.registry();
    let Ok(session) = registry.lookup_raw(&sid) else {
        return StatusCode::NOT_FOUND;
    };

    match registry.terminate(session.id(), TerminationReason::Administrative) {
        Ok(undelivered) => {
            tracing::info!(
                session_id = %session.id(),
                undelivered = undelivered.len(),
                "Session terminated by administrator"
            );
            StatusCode::NO_CONTENT
        }
        Err(_) => StatusCode::NOT_FOUND,
    }
}
