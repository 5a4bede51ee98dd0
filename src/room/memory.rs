//! In-process room backend.
//!
//! Rooms exist implicitly once a connection joins them. The hub side can publish
//! tracks into a room, close consumers and close the room, which is enough to drive
//! a session end to end without a network transport.

use anyhow::{bail, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{
    Consumer, PlatformCredentials, RoomClient, RoomConnection, RoomEvent, BOT_DISPLAY_NAME,
};
use crate::audio::{AudioFrame, ChannelTrack, MediaKind};

const TRACK_BUFFER_FRAMES: usize = 256;

#[derive(Default)]
struct HubState {
    /// room_id → peer_id → event sender
    rooms: HashMap<String, HashMap<String, mpsc::UnboundedSender<RoomEvent>>>,
    rejected: HashSet<String>,
    join_delay: Duration,
    leave_delay: Duration,
    fail_leave: bool,
    joins: usize,
    next_id: u64,
}

impl HubState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }
}

#[derive(Clone, Default)]
pub struct MemoryRoomHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryRoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client handing out connections to this hub
    pub fn client(&self) -> Arc<dyn RoomClient> {
        Arc::new(MemoryRoomClient { hub: self.clone() })
    }

    /// Refuse future joins to `room_id`
    pub fn reject_room(&self, room_id: &str) {
        self.state.lock().rejected.insert(room_id.to_string());
    }

    pub fn set_join_delay(&self, delay: Duration) {
        self.state.lock().join_delay = delay;
    }

    pub fn set_leave_delay(&self, delay: Duration) {
        self.state.lock().leave_delay = delay;
    }

    pub fn set_fail_leave(&self, fail: bool) {
        self.state.lock().fail_leave = fail;
    }

    /// Number of connections currently joined to `room_id`
    pub fn connection_count(&self, room_id: &str) -> usize {
        self.state
            .lock()
            .rooms
            .get(room_id)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    /// Total successful joins since the hub was created
    pub fn join_count(&self) -> usize {
        self.state.lock().joins
    }

    /// Publish a remote participant's track to every connection in `room_id`
    pub fn publish_track(
        &self,
        room_id: &str,
        remote_peer_id: &str,
        kind: MediaKind,
    ) -> Result<TrackPublisher> {
        let mut state = self.state.lock();
        let consumer_id = state.next_id("consumer");

        let Some(peers) = state.rooms.get(room_id) else {
            bail!("room {} has no connections", room_id);
        };

        let mut senders = Vec::with_capacity(peers.len());
        for events in peers.values() {
            let (tx, track) = ChannelTrack::channel(consumer_id.clone(), kind, TRACK_BUFFER_FRAMES);
            let consumer = Consumer {
                id: consumer_id.clone(),
                remote_peer_id: remote_peer_id.to_string(),
                kind,
                track: Some(Box::new(track)),
            };
            if events.send(RoomEvent::NewConsumer(consumer)).is_ok() {
                senders.push(tx);
            }
        }

        debug!(
            "Published {} track {} from {} to room {}",
            kind, consumer_id, remote_peer_id, room_id
        );

        Ok(TrackPublisher {
            consumer_id,
            senders,
        })
    }

    /// Close a consumer on every connection in `room_id`
    pub fn close_consumer(&self, room_id: &str, consumer_id: &str) {
        let state = self.state.lock();
        if let Some(peers) = state.rooms.get(room_id) {
            for events in peers.values() {
                let _ = events.send(RoomEvent::ConsumerClosed {
                    consumer_id: consumer_id.to_string(),
                });
            }
        }
    }

    /// Close the room from the platform side
    pub fn close_room(&self, room_id: &str) {
        let mut state = self.state.lock();
        if let Some(peers) = state.rooms.remove(room_id) {
            info!("Closing room {} ({} connections)", room_id, peers.len());
            for events in peers.values() {
                let _ = events.send(RoomEvent::RoomClosed);
            }
        }
    }

    fn remove_peer(&self, room_id: &str, peer_id: &str) {
        let mut state = self.state.lock();
        if let Some(peers) = state.rooms.get_mut(room_id) {
            peers.remove(peer_id);
            if peers.is_empty() {
                state.rooms.remove(room_id);
            }
        }
    }
}

/// Hub-side handle feeding frames into a published track.
/// Dropping it (or calling `end`) ends the track.
pub struct TrackPublisher {
    consumer_id: String,
    senders: Vec<mpsc::Sender<AudioFrame>>,
}

impl TrackPublisher {
    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    pub async fn send(&self, frame: AudioFrame) -> Result<()> {
        for tx in &self.senders {
            if tx.send(frame.clone()).await.is_err() {
                bail!("track {} is no longer consumed", self.consumer_id);
            }
        }
        Ok(())
    }

    /// End the track
    pub fn end(self) {}
}

struct MemoryRoomClient {
    hub: MemoryRoomHub,
}

#[async_trait::async_trait]
impl RoomClient for MemoryRoomClient {
    async fn join(
        &self,
        room_id: &str,
        credentials: &PlatformCredentials,
    ) -> Result<Box<dyn RoomConnection>> {
        if credentials.project_id().is_empty() || credentials.api_key().is_empty() {
            bail!("invalid platform credentials");
        }

        let delay = self.hub.state.lock().join_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.hub.state.lock();
        if state.rejected.contains(room_id) {
            bail!("room {} rejected the join", room_id);
        }

        let peer_id = state.next_id("peer");
        let (tx, rx) = mpsc::unbounded_channel();
        state
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(peer_id.clone(), tx);
        state.joins += 1;

        debug!("Peer {} ({}) joined room {}", peer_id, BOT_DISPLAY_NAME, room_id);

        Ok(Box::new(MemoryConnection {
            hub: self.hub.clone(),
            room_id: room_id.to_string(),
            peer_id,
            events: Some(rx),
        }))
    }
}

struct MemoryConnection {
    hub: MemoryRoomHub,
    room_id: String,
    peer_id: String,
    events: Option<mpsc::UnboundedReceiver<RoomEvent>>,
}

#[async_trait::async_trait]
impl RoomConnection for MemoryConnection {
    fn local_peer_id(&self) -> &str {
        &self.peer_id
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<RoomEvent>> {
        self.events.take()
    }

    async fn leave(&mut self) -> Result<()> {
        let (delay, fail) = {
            let state = self.hub.state.lock();
            (state.leave_delay, state.fail_leave)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail {
            bail!("platform refused leave for room {}", self.room_id);
        }

        self.hub.remove_peer(&self.room_id, &self.peer_id);
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.hub.remove_peer(&self.room_id, &self.peer_id);
    }
}
