use super::state::AppState;
use crate::error::Error;
use crate::session::SessionInfo;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RoomQuery {
    pub room_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
}

impl StatusResponse {
    fn success(message: impl Into<String>) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
        }
    }
}

fn error_response(err: &Error) -> Response {
    let code = match err {
        Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Conflict(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        code,
        Json(StatusResponse {
            status: err.status().to_string(),
            message: err.to_string(),
        }),
    )
        .into_response()
}

fn require_room_id(query: RoomQuery) -> Result<String, Error> {
    match query.room_id.as_deref().map(str::trim) {
        Some(room_id) if !room_id.is_empty() => Ok(room_id.to_string()),
        _ => Err(Error::InvalidRequest("room_id is required".to_string())),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /start?room_id=ID
/// Join a room and start recording its audio tracks
pub async fn start_session(
    State(state): State<AppState>,
    Query(query): Query<RoomQuery>,
) -> Response {
    let room_id = match require_room_id(query) {
        Ok(room_id) => room_id,
        Err(e) => return error_response(&e),
    };

    info!("Start requested for room {}", room_id);

    let credentials = match state.platform.credentials() {
        Ok(credentials) => credentials,
        Err(e) => {
            error!("Cannot start room {}: {}", room_id, e);
            return error_response(&e);
        }
    };

    match state.registry.start(&room_id, credentials).await {
        Ok(session) => {
            info!(
                "Session {} active for room {}",
                session.session_id, session.room_id
            );
            (
                StatusCode::OK,
                Json(StatusResponse::success("Room joined successfully")),
            )
                .into_response()
        }
        Err(e) => {
            match &e {
                Error::Conflict(_) => warn!("Start for room {} rejected: {}", room_id, e),
                _ => error!("Failed to start room {}: {}", room_id, e),
            }
            error_response(&e)
        }
    }
}

/// GET /stop?room_id=ID
/// Leave a room; the session is removed whatever the outcome
pub async fn stop_session(
    State(state): State<AppState>,
    Query(query): Query<RoomQuery>,
) -> Response {
    let room_id = match require_room_id(query) {
        Ok(room_id) => room_id,
        Err(e) => return error_response(&e),
    };

    info!("Stop requested for room {}", room_id);

    match state.registry.stop(&room_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(StatusResponse::success(format!(
                "Room {} stopped successfully",
                room_id
            ))),
        )
            .into_response(),
        Err(e) => {
            if matches!(e, Error::NotFound(_)) {
                info!("Room {} not found", room_id);
            } else {
                error!("Failed to stop room {}: {}", room_id, e);
            }
            error_response(&e)
        }
    }
}

/// GET /sessions
/// Registered sessions and their worker state
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.registry.list())
}

/// GET /healthz
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}
