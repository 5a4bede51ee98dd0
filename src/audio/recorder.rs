use anyhow::{bail, Result};
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::container::{Container, OutputFormat};
use super::encoder::{PcmEncoder, StreamParams};
use super::frame::{MediaKind, MediaTrack};

/// Recorder lifecycle. Transitions are monotonic: nothing leaves `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderState {
    Idle,
    Recording,
    Stopped,
}

/// What moved the recorder to `Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Explicit `stop()`
    Requested,
    /// The track signalled that no more frames will arrive
    EndOfStream,
    /// Track, codec or mux failure
    Failed,
}

#[derive(Debug, Clone, Copy)]
pub struct RecorderSettings {
    pub format: OutputFormat,
    pub stream: StreamParams,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            format: OutputFormat::Wav,
            stream: StreamParams::default(),
        }
    }
}

/// Summary handed to completion listeners
#[derive(Debug, Clone, Serialize)]
pub struct CompletedRecording {
    pub track_id: String,
    pub output_path: PathBuf,
    pub reason: StopReason,
    /// Frames received from the track
    pub frames: usize,
    /// Samples written to the container
    pub samples: usize,
    pub error: Option<String>,
}

impl CompletedRecording {
    /// True when the output file was closed cleanly and nothing failed
    pub fn is_finalized(&self) -> bool {
        self.error.is_none()
    }

    /// The failure that ended this recording, if any
    pub fn result(&self) -> crate::error::Result<()> {
        match &self.error {
            Some(msg) => Err(crate::error::Error::Recording(msg.clone())),
            None => Ok(()),
        }
    }
}

type CompletionListener = Box<dyn FnOnce(&CompletedRecording) + Send>;

struct ActiveOutput {
    container: Container,
    encoder: PcmEncoder,
}

struct Inner {
    state: RecorderState,
    output: Option<ActiveOutput>,
    frames: usize,
    listeners: Vec<CompletionListener>,
    completed: Option<CompletedRecording>,
}

struct Shared {
    track_id: String,
    kind: MediaKind,
    output_path: PathBuf,
    settings: RecorderSettings,
    inner: Mutex<Inner>,
}

/// Output handed over by the transition to `Stopped`
struct Closing {
    output: Option<ActiveOutput>,
    frames: usize,
    listeners: Vec<CompletionListener>,
}

/// Records one inbound audio track to a file.
///
/// Natural end of stream and `stop()` converge on a single flush path: the encoder
/// is flushed, trailing packets are muxed, and the container is closed. Whichever
/// path moves the engine to `Stopped` owns the output and runs that path once.
pub struct RecorderEngine {
    shared: Arc<Shared>,
    track: Option<Box<dyn MediaTrack>>,
    task: Option<JoinHandle<()>>,
}

impl RecorderEngine {
    pub fn new(
        track: Box<dyn MediaTrack>,
        output_path: impl Into<PathBuf>,
        settings: RecorderSettings,
    ) -> Self {
        let shared = Shared {
            track_id: track.id().to_string(),
            kind: track.kind(),
            output_path: output_path.into(),
            settings,
            inner: Mutex::new(Inner {
                state: RecorderState::Idle,
                output: None,
                frames: 0,
                listeners: Vec::new(),
                completed: None,
            }),
        };

        Self {
            shared: Arc::new(shared),
            track: Some(track),
            task: None,
        }
    }

    pub fn track_id(&self) -> &str {
        &self.shared.track_id
    }

    pub fn output_path(&self) -> &Path {
        &self.shared.output_path
    }

    pub async fn state(&self) -> RecorderState {
        self.shared.inner.lock().await.state
    }

    /// Register a listener fired once when the recording completes.
    ///
    /// Listeners run synchronously in registration order. Registering after
    /// completion fires the listener immediately.
    pub async fn on_completed<F>(&self, listener: F)
    where
        F: FnOnce(&CompletedRecording) + Send + 'static,
    {
        let mut inner = self.shared.inner.lock().await;
        if let Some(summary) = inner.completed.clone() {
            drop(inner);
            listener(&summary);
            return;
        }
        inner.listeners.push(Box::new(listener));
    }

    /// Start recording in a background task. No-op unless `Idle`.
    pub async fn start(&mut self) {
        {
            let mut inner = self.shared.inner.lock().await;
            if inner.state != RecorderState::Idle {
                return;
            }
            inner.state = RecorderState::Recording;
        }

        let Some(track) = self.track.take() else {
            return;
        };

        info!(
            "Starting {} recording of track {} to {:?}",
            self.shared.kind, self.shared.track_id, self.shared.output_path
        );

        let shared = Arc::clone(&self.shared);
        self.task = Some(tokio::spawn(async move {
            let outcome = AssertUnwindSafe(shared.record(track)).catch_unwind().await;

            let (reason, failure) = match outcome {
                Ok(Ok(())) => (StopReason::EndOfStream, None),
                Ok(Err(e)) => {
                    error!("Recording of track {} failed: {:#}", shared.track_id, e);
                    (StopReason::Failed, Some(format!("{:#}", e)))
                }
                Err(_) => {
                    error!("Recording task for track {} panicked", shared.track_id);
                    (StopReason::Failed, Some("recording task panicked".to_string()))
                }
            };

            if let Some(closing) = shared.begin_stop().await {
                let summary = shared.flush(closing.output, closing.frames, reason, failure);
                shared.notify(summary, closing.listeners).await;
            }
        }));
    }

    /// Stop recording. Idempotent.
    ///
    /// Flushes and closes the output, cancels the background task, then fires the
    /// completion listeners. If the track already ended on its own, waits for that
    /// path to finish instead.
    pub async fn stop(&mut self) {
        let Some(closing) = self.shared.begin_stop().await else {
            if let Some(task) = self.task.take() {
                if let Err(e) = task.await {
                    if !e.is_cancelled() {
                        warn!("Recording task for track {} failed: {}", self.shared.track_id, e);
                    }
                }
            }
            return;
        };

        info!("Stopping recording of track {}", self.shared.track_id);

        let summary = self
            .shared
            .flush(closing.output, closing.frames, StopReason::Requested, None);

        if let Some(task) = self.task.take() {
            task.abort();
            match task.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => warn!("Recording task for track {} failed: {}", self.shared.track_id, e),
            }
        }

        self.shared.notify(summary, closing.listeners).await;
    }
}

impl Shared {
    async fn record(&self, mut track: Box<dyn MediaTrack>) -> Result<()> {
        if track.kind() != MediaKind::Audio {
            bail!("cannot record {} track {}", track.kind(), self.track_id);
        }

        // Open under the lock so a concurrent stop either sees the output or
        // prevents it from being created.
        {
            let mut inner = self.inner.lock().await;
            if inner.state != RecorderState::Recording {
                return Ok(());
            }
            let mut container = Container::open(&self.output_path, self.settings.format)?;
            let encoder = container.add_stream(track.kind(), self.settings.stream)?;
            inner.output = Some(ActiveOutput { container, encoder });
        }

        loop {
            let frame = match track.recv().await? {
                Some(frame) => frame,
                None => {
                    warn!(
                        "No more frames available on track {}, finishing recording",
                        self.track_id
                    );
                    return Ok(());
                }
            };

            let mut inner = self.inner.lock().await;
            let Inner { output, frames, .. } = &mut *inner;
            let Some(output) = output.as_mut() else {
                // Stopped while awaiting the frame
                return Ok(());
            };

            for packet in output.encoder.encode(Some(&frame))? {
                output.container.mux(&packet)?;
            }
            *frames += 1;
        }
    }

    /// Move to `Stopped`, taking ownership of the output. `None` if already stopped.
    async fn begin_stop(&self) -> Option<Closing> {
        let mut inner = self.inner.lock().await;
        if inner.state == RecorderState::Stopped {
            return None;
        }
        inner.state = RecorderState::Stopped;

        Some(Closing {
            output: inner.output.take(),
            frames: inner.frames,
            listeners: std::mem::take(&mut inner.listeners),
        })
    }

    /// Flush buffered encoder state, write the remaining packets, close the container.
    fn flush(
        &self,
        output: Option<ActiveOutput>,
        frames: usize,
        reason: StopReason,
        mut failure: Option<String>,
    ) -> CompletedRecording {
        let mut samples = 0;

        if let Some(ActiveOutput {
            mut container,
            mut encoder,
        }) = output
        {
            let tail = encoder.encode(None).and_then(|packets| {
                packets
                    .iter()
                    .try_for_each(|packet| container.mux(packet))
            });
            if let Err(e) = tail {
                error!("Failed to flush encoder for track {}: {:#}", self.track_id, e);
                failure.get_or_insert_with(|| format!("{:#}", e));
            }

            info!("Closing container {:?}", self.output_path);
            match container.close() {
                Ok(written) => samples = written,
                Err(e) => {
                    error!("Failed to close container {:?}: {:#}", self.output_path, e);
                    failure.get_or_insert_with(|| format!("{:#}", e));
                }
            }
        } else if failure.is_none() {
            failure = Some("recording stopped before any output was opened".to_string());
        }

        CompletedRecording {
            track_id: self.track_id.clone(),
            output_path: self.output_path.clone(),
            reason,
            frames,
            samples,
            error: failure,
        }
    }

    async fn notify(&self, summary: CompletedRecording, mut listeners: Vec<CompletionListener>) {
        {
            let mut inner = self.inner.lock().await;
            listeners.append(&mut inner.listeners);
            inner.completed = Some(summary.clone());
        }

        info!(
            "Recording of track {} completed ({:?}, {} frames, {} samples)",
            summary.track_id, summary.reason, summary.frames, summary.samples
        );

        for listener in listeners {
            listener(&summary);
        }
    }
}
