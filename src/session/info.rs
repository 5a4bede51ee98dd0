use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Worker lifecycle: `Created → Joining → Active → Leaving → Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Created,
    Joining,
    Active,
    Leaving,
    Closed,
}

/// Snapshot of a registered session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Room the session is joined to
    pub room_id: String,

    /// Unique identifier of this session's worker
    pub session_id: String,

    /// Peer id the bot joined with
    pub local_peer_id: String,

    /// Current worker state
    pub state: WorkerState,

    /// When the session was started
    pub created_at: DateTime<Utc>,
}
