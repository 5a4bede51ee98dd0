//! Error taxonomy for the session core.
//!
//! Collaborators (room client, tracks, codec, HTTP clients) report `anyhow::Error`;
//! everything that crosses the registry boundary is translated into [`Error`] so the
//! request layer can map it onto a status code without inspecting strings.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed request (e.g. empty room id).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Required configuration is missing. Raised before any network call.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A session for this room is already registered.
    #[error("Session for room {0} is already active")]
    Conflict(String),

    /// No session registered for this room.
    #[error("No active session for room {0}")]
    NotFound(String),

    /// The platform rejected the join, or the join raised.
    #[error("Failed to join room {room_id}: {reason}")]
    Join { room_id: String, reason: String },

    /// A bounded wait expired. Background work may still be running.
    #[error("Timed out after {timeout_ms}ms waiting for {operation}")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// The target scheduler is gone; nothing was submitted.
    #[error("Session scheduler has already stopped")]
    SchedulerStopped,

    /// Leaving the room failed. The registry entry is removed regardless.
    #[error("Failed to leave room {room_id}: {reason}")]
    Leave { room_id: String, reason: String },

    /// Track or codec failure while recording.
    #[error("Recording error: {0}")]
    Recording(String),

    /// Upload retries exhausted.
    #[error("Upload failed: {0}")]
    Upload(String),

    /// Webhook delivery failed.
    #[error("Webhook delivery failed: {0}")]
    Webhook(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short machine-readable status used in JSON responses.
    pub fn status(&self) -> &'static str {
        match self {
            Error::Conflict(_) => "already_running",
            Error::NotFound(_) => "not_found",
            _ => "error",
        }
    }
}
