//! Real-time room contract
//!
//! The transport (signalling, SFU negotiation, token issuance) lives behind
//! [`RoomClient`] and [`RoomConnection`]. A session worker joins through the client,
//! then drains [`RoomEvent`]s from the connection one at a time.

pub mod memory;

use anyhow::Result;
use tokio::sync::mpsc;

use crate::audio::{MediaKind, MediaTrack};

pub use memory::{MemoryRoomHub, TrackPublisher};

/// Display name the bot joins rooms with
pub const BOT_DISPLAY_NAME: &str = "Recorder-Bot";

/// Platform credential pair used to mint join tokens
#[derive(Clone)]
pub struct PlatformCredentials {
    project_id: String,
    api_key: String,
}

impl PlatformCredentials {
    pub fn new(project_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            api_key: api_key.into(),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl std::fmt::Debug for PlatformCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformCredentials")
            .field("project_id", &self.project_id)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Local subscription to a remote participant's track
pub struct Consumer {
    pub id: String,
    pub remote_peer_id: String,
    pub kind: MediaKind,
    /// `None` when the track is not ready
    pub track: Option<Box<dyn MediaTrack>>,
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.id)
            .field("remote_peer_id", &self.remote_peer_id)
            .field("kind", &self.kind)
            .field("has_track", &self.track.is_some())
            .finish()
    }
}

/// Events delivered to a joined connection, in arrival order
#[derive(Debug)]
pub enum RoomEvent {
    NewConsumer(Consumer),
    ConsumerClosed { consumer_id: String },
    RoomClosed,
}

/// Entry point to the real-time platform
#[async_trait::async_trait]
pub trait RoomClient: Send + Sync {
    /// Mint a token for `room_id` and connect. Resolves once the room is joined.
    async fn join(
        &self,
        room_id: &str,
        credentials: &PlatformCredentials,
    ) -> Result<Box<dyn RoomConnection>>;
}

/// A joined room. Invalidated by `leave`.
#[async_trait::async_trait]
pub trait RoomConnection: Send {
    fn local_peer_id(&self) -> &str;

    /// Take the event stream. Returns `None` after the first call.
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<RoomEvent>>;

    async fn leave(&mut self) -> Result<()>;
}
