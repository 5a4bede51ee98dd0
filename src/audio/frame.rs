use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Media kind of a remote track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Decoded audio frame (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Presentation timestamp in milliseconds since the track started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Number of samples per channel
    pub fn sample_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }
}

/// A live, non-restartable sequence of frames from one remote participant.
///
/// Implementations are provided by the room transport. `recv` must suspend
/// cooperatively; it never blocks the scheduler thread.
#[async_trait::async_trait]
pub trait MediaTrack: Send {
    /// Track identifier for logging
    fn id(&self) -> &str;

    fn kind(&self) -> MediaKind;

    /// Await the next frame.
    ///
    /// Returns `Ok(None)` once the remote side has ended the track. Any later call
    /// keeps returning `Ok(None)`.
    async fn recv(&mut self) -> Result<Option<AudioFrame>>;
}

/// Track fed from an in-process channel. The track ends when every sender is dropped.
pub struct ChannelTrack {
    id: String,
    kind: MediaKind,
    rx: mpsc::Receiver<AudioFrame>,
}

impl ChannelTrack {
    pub fn new(id: impl Into<String>, kind: MediaKind, rx: mpsc::Receiver<AudioFrame>) -> Self {
        Self {
            id: id.into(),
            kind,
            rx,
        }
    }

    /// Create a bounded channel and the track reading from it
    pub fn channel(
        id: impl Into<String>,
        kind: MediaKind,
        capacity: usize,
    ) -> (mpsc::Sender<AudioFrame>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(id, kind, rx))
    }
}

#[async_trait::async_trait]
impl MediaTrack for ChannelTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    async fn recv(&mut self) -> Result<Option<AudioFrame>> {
        Ok(self.rx.recv().await)
    }
}
