use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::config::SessionTimeouts;
use super::info::{SessionInfo, WorkerState};
use super::worker::{self, RecordingContext, WorkerHandle};
use crate::error::{Error, Result};
use crate::room::{PlatformCredentials, RoomClient};

/// A registered session. Owned exclusively by the registry.
struct SessionHandle {
    room_id: String,
    local_peer_id: String,
    created_at: DateTime<Utc>,
    worker: WorkerHandle,
}

impl SessionHandle {
    fn info(&self) -> SessionInfo {
        SessionInfo {
            room_id: self.room_id.clone(),
            session_id: self.worker.session_id().to_string(),
            local_peer_id: self.local_peer_id.clone(),
            state: self.worker.state(),
            created_at: self.created_at,
        }
    }
}

/// Per-room slot. Holding its lock serializes lifecycle operations for that room.
type Slot = Arc<tokio::sync::Mutex<Option<SessionHandle>>>;

/// Process-wide map from room id to its session.
///
/// Starting a room that already has a registered session is rejected with
/// [`Error::Conflict`]; the existing session is left untouched. Operations on
/// different rooms never wait on each other.
pub struct SessionRegistry {
    client: Arc<dyn RoomClient>,
    recording: RecordingContext,
    timeouts: SessionTimeouts,
    slots: Mutex<HashMap<String, Slot>>,
}

impl SessionRegistry {
    pub fn new(
        client: Arc<dyn RoomClient>,
        recording: RecordingContext,
        timeouts: SessionTimeouts,
    ) -> Self {
        Self {
            client,
            recording,
            timeouts,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn timeouts(&self) -> &SessionTimeouts {
        &self.timeouts
    }

    /// Join `room_id` on a fresh worker.
    ///
    /// Waits up to the join timeout for the outcome. Nothing is registered on
    /// failure or timeout; a timed-out worker leaves the room on its own once its
    /// join completes.
    pub async fn start(&self, room_id: &str, credentials: PlatformCredentials) -> Result<SessionInfo> {
        let room_id = validate_room_id(room_id)?;
        let slot = self.slot(room_id);

        let result = self.start_in_slot(room_id, credentials, &slot).await;

        self.release_slot(room_id, slot);
        result
    }

    async fn start_in_slot(
        &self,
        room_id: &str,
        credentials: PlatformCredentials,
        slot: &Slot,
    ) -> Result<SessionInfo> {
        let mut entry = slot.lock().await;
        if entry.as_ref().map(|h| h.worker.state()) == Some(WorkerState::Closed) {
            if let Some(stale) = entry.take() {
                info!("Reaping closed session for room {}", room_id);
                if let Err(e) = stale.worker.stop(&self.timeouts).await {
                    warn!("Closed session for room {} did not shut down cleanly: {}", room_id, e);
                }
            }
        }
        if entry.is_some() {
            warn!("Session for room {} is already active", room_id);
            return Err(Error::Conflict(room_id.to_string()));
        }

        info!("Starting session for room {}", room_id);

        let (worker, joined) = worker::spawn(
            room_id.to_string(),
            Arc::clone(&self.client),
            credentials,
            self.recording.clone(),
        )?;

        match joined.wait(self.timeouts.join, "room join").await {
            Ok(Ok(joined)) => {
                let handle = SessionHandle {
                    room_id: room_id.to_string(),
                    local_peer_id: joined.local_peer_id,
                    created_at: Utc::now(),
                    worker,
                };
                let info = handle.info();
                *entry = Some(handle);
                info!("Room {} joined successfully", room_id);
                Ok(info)
            }
            Ok(Err(reason)) => Err(Error::Join {
                room_id: room_id.to_string(),
                reason,
            }),
            Err(Error::SchedulerStopped) => Err(Error::Join {
                room_id: room_id.to_string(),
                reason: "session worker exited before reporting".to_string(),
            }),
            Err(e) => {
                warn!("Abandoning session worker for room {}: {}", room_id, e);
                Err(e)
            }
        }
    }

    /// Leave `room_id` and tear its worker down.
    ///
    /// The registry entry is removed as soon as the stop is attempted, whatever
    /// the outcome of the leave.
    pub async fn stop(&self, room_id: &str) -> Result<()> {
        let room_id = validate_room_id(room_id)?;
        let Some(slot) = self.existing_slot(room_id) else {
            return Err(Error::NotFound(room_id.to_string()));
        };

        let result = async {
            let mut entry = slot.lock().await;
            let Some(handle) = entry.take() else {
                return Err(Error::NotFound(room_id.to_string()));
            };

            info!("Stopping session for room {}", room_id);
            let result = handle.worker.stop(&self.timeouts).await;
            match &result {
                Ok(()) => info!("Room {} stopped successfully", room_id),
                Err(e) => error!("Stopping room {} failed: {}", room_id, e),
            }
            result
        }
        .await;

        self.release_slot(room_id, slot);
        result
    }

    /// Best-effort stop of every registered session, used on process shutdown.
    /// Sessions that exceed their bounds are abandoned.
    pub async fn stop_all(&self) {
        let rooms: Vec<String> = self.slots.lock().keys().cloned().collect();
        if rooms.is_empty() {
            return;
        }

        info!("Stopping {} active sessions", rooms.len());
        let stops = rooms.iter().map(|room_id| async move {
            match self.stop(room_id).await {
                Ok(()) | Err(Error::NotFound(_)) => {}
                Err(e) => warn!("Shutdown stop for room {} failed: {}", room_id, e),
            }
        });
        futures::future::join_all(stops).await;
    }

    /// Whether a session is registered for `room_id`. Waits for any in-flight
    /// operation on that room.
    pub async fn contains(&self, room_id: &str) -> bool {
        let Some(slot) = self.existing_slot(room_id) else {
            return false;
        };
        let registered = slot.lock().await.is_some();
        registered
    }

    pub async fn get(&self, room_id: &str) -> Option<SessionInfo> {
        let slot = self.existing_slot(room_id)?;
        let entry = slot.lock().await;
        entry.as_ref().map(SessionHandle::info)
    }

    /// Snapshot of registered sessions. Rooms with an operation in flight are skipped.
    pub fn list(&self) -> Vec<SessionInfo> {
        let slots = self.slots.lock();
        let mut sessions: Vec<SessionInfo> = slots
            .values()
            .filter_map(|slot| slot.try_lock().ok().and_then(|e| e.as_ref().map(SessionHandle::info)))
            .collect();
        sessions.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        sessions
    }

    fn slot(&self, room_id: &str) -> Slot {
        let mut slots = self.slots.lock();
        Arc::clone(slots.entry(room_id.to_string()).or_default())
    }

    fn existing_slot(&self, room_id: &str) -> Option<Slot> {
        self.slots.lock().get(room_id).cloned()
    }

    /// Drop the map entry when nobody else holds the slot and it is empty
    fn release_slot(&self, room_id: &str, slot: Slot) {
        let mut slots = self.slots.lock();
        // Clones are only handed out under the map lock: map + ours means idle.
        if Arc::strong_count(&slot) != 2 {
            return;
        }
        let empty = slot.try_lock().map(|entry| entry.is_none()).unwrap_or(false);
        if empty {
            slots.remove(room_id);
        }
    }
}

fn validate_room_id(room_id: &str) -> Result<&str> {
    let room_id = room_id.trim();
    if room_id.is_empty() {
        return Err(Error::InvalidRequest("room_id must not be empty".to_string()));
    }
    Ok(room_id)
}
