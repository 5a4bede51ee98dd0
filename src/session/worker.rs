use futures::FutureExt;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tracing::{error, info, warn};

use super::bridge::{self, Completion, Pending, SchedulerInbox, SchedulerPort};
use super::config::SessionTimeouts;
use super::info::WorkerState;
use crate::audio::{MediaKind, OutputFormat, RecorderEngine, RecorderSettings};
use crate::delivery::{DeliveryJob, DeliveryPipeline};
use crate::error::Error;
use crate::room::{Consumer, PlatformCredentials, RoomClient, RoomConnection, RoomEvent};

/// Work the registry can hand to a running worker
#[derive(Debug)]
pub enum WorkerCommand {
    /// Leave the room and shut the scheduler down
    Leave(Completion<Result<(), String>>),
}

/// Join result reported back to the spawning caller
pub type JoinOutcome = Result<JoinedRoom, String>;

#[derive(Debug, Clone)]
pub struct JoinedRoom {
    pub local_peer_id: String,
}

/// Everything a worker needs to record the tracks it receives
#[derive(Clone)]
pub struct RecordingContext {
    pub recordings_dir: PathBuf,
    pub settings: RecorderSettings,
    /// Receives finalized recordings; `None` keeps files local
    pub delivery: Option<DeliveryPipeline>,
}

impl RecordingContext {
    pub fn new(recordings_dir: impl Into<PathBuf>, settings: RecorderSettings) -> Self {
        Self {
            recordings_dir: recordings_dir.into(),
            settings,
            delivery: None,
        }
    }

    pub fn with_delivery(mut self, delivery: DeliveryPipeline) -> Self {
        self.delivery = Some(delivery);
        self
    }
}

/// Registry-side handle to a worker thread.
///
/// Dropping the handle abandons the worker: it notices its port is gone and
/// leaves the room on its own.
pub struct WorkerHandle {
    room_id: String,
    session_id: String,
    thread: Option<std::thread::JoinHandle<()>>,
    port: SchedulerPort<WorkerCommand>,
    kill: Option<oneshot::Sender<()>>,
    exited: oneshot::Receiver<()>,
    state: watch::Receiver<WorkerState>,
}

/// Spawn a worker thread for `room_id` and start joining.
///
/// Returns the handle plus the pending join outcome; the caller decides how long
/// to wait for it.
pub fn spawn(
    room_id: String,
    client: Arc<dyn RoomClient>,
    credentials: PlatformCredentials,
    recording: RecordingContext,
) -> Result<(WorkerHandle, Pending<JoinOutcome>), Error> {
    let session_id = uuid::Uuid::new_v4().to_string();
    let (port, inbox) = bridge::scheduler_channel();
    let (join_done, joined) = bridge::completion();
    let (kill_tx, kill_rx) = oneshot::channel::<()>();
    let (exit_tx, exit_rx) = oneshot::channel::<()>();
    let (state_tx, state_rx) = watch::channel(WorkerState::Created);

    let worker = SessionWorker {
        room_id: room_id.clone(),
        client,
        credentials,
        recording,
        state: Arc::new(state_tx),
        recorders: HashMap::new(),
    };

    let thread_room = room_id.clone();
    let thread = std::thread::Builder::new()
        .name(format!("session-{}", &session_id[..8]))
        .spawn(move || {
            // Dropped last, when the thread returns
            let _exited = exit_tx;
            run_thread(thread_room, worker, join_done, inbox, kill_rx);
        })
        .map_err(|e| Error::Internal(format!("failed to spawn session worker: {}", e)))?;

    info!("Spawned session worker {} for room {}", session_id, room_id);

    Ok((
        WorkerHandle {
            room_id,
            session_id,
            thread: Some(thread),
            port,
            kill: Some(kill_tx),
            exited: exit_rx,
            state: state_rx,
        },
        joined,
    ))
}

fn run_thread(
    room_id: String,
    worker: SessionWorker,
    join_done: Completion<JoinOutcome>,
    inbox: SchedulerInbox<WorkerCommand>,
    kill: oneshot::Receiver<()>,
) {
    let state = Arc::clone(&worker.state);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to build scheduler for room {}: {}", room_id, e);
            state.send_replace(WorkerState::Closed);
            join_done.complete(Err(format!("failed to build scheduler: {}", e)));
            return;
        }
    };

    runtime.block_on(async {
        let forced = async move {
            // Only an explicit kill forces shutdown; a dropped sender is not one.
            if kill.await.is_err() {
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            _ = worker.run(join_done, inbox) => {}
            _ = forced => {
                warn!("Forcing shutdown of session scheduler for room {}", room_id);
            }
        }
    });

    // Cancels anything still scheduled; the runtime is never reused.
    drop(runtime);
    state.send_replace(WorkerState::Closed);
    info!("Session scheduler for room {} closed", room_id);
}

impl WorkerHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Leave the room and wind the worker down.
    ///
    /// The leave round trip is bounded by `timeouts.leave`; past it the scheduler is
    /// forced to stop. The thread join is bounded by `timeouts.thread_join`; past it
    /// the thread is abandoned and finishes on its own.
    pub async fn stop(mut self, timeouts: &SessionTimeouts) -> Result<(), Error> {
        let leave = match self.port.submit(WorkerCommand::Leave) {
            Ok(pending) => match pending.wait(timeouts.leave, "room leave").await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(reason)) => Err(Error::Leave {
                    room_id: self.room_id.clone(),
                    reason,
                }),
                Err(Error::SchedulerStopped) => {
                    info!("Session for room {} already closed", self.room_id);
                    Ok(())
                }
                Err(e) => {
                    warn!("Leave for room {} did not complete: {}", self.room_id, e);
                    self.force_shutdown();
                    Err(e)
                }
            },
            Err(Error::SchedulerStopped) => {
                info!("Session for room {} already closed", self.room_id);
                Ok(())
            }
            Err(e) => Err(e),
        };

        self.join_thread(timeouts.thread_join).await;
        leave
    }

    fn force_shutdown(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }

    async fn join_thread(&mut self, timeout: Duration) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        match tokio::time::timeout(timeout, &mut self.exited).await {
            Ok(_) => match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => error!("Session worker for room {} panicked", self.room_id),
                Err(e) => error!("Failed to join session worker for room {}: {}", self.room_id, e),
            },
            Err(_) => {
                warn!(
                    "Session worker for room {} did not exit within {:?}; abandoning it",
                    self.room_id, timeout
                );
            }
        }
    }
}

/// Owns the room connection and recorders for one room. Lives on its own thread.
struct SessionWorker {
    room_id: String,
    client: Arc<dyn RoomClient>,
    credentials: PlatformCredentials,
    recording: RecordingContext,
    state: Arc<watch::Sender<WorkerState>>,
    recorders: HashMap<String, RecorderEngine>,
}

impl SessionWorker {
    async fn run(
        mut self,
        join_done: Completion<JoinOutcome>,
        mut inbox: SchedulerInbox<WorkerCommand>,
    ) {
        self.set_state(WorkerState::Joining);

        let joined = AssertUnwindSafe(self.client.join(&self.room_id, &self.credentials))
            .catch_unwind()
            .await;

        let mut connection = match joined {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                error!("Failed to join room {}: {:#}", self.room_id, e);
                self.set_state(WorkerState::Closed);
                join_done.complete(Err(format!("{:#}", e)));
                return;
            }
            Err(_) => {
                error!("Join for room {} panicked", self.room_id);
                self.set_state(WorkerState::Closed);
                join_done.complete(Err("join panicked".to_string()));
                return;
            }
        };

        let Some(mut events) = connection.take_events() else {
            error!("Connection for room {} has no event stream", self.room_id);
            let _ = self.leave(connection).await;
            self.set_state(WorkerState::Closed);
            join_done.complete(Err("connection has no event stream".to_string()));
            return;
        };

        self.set_state(WorkerState::Active);
        let joined = JoinedRoom {
            local_peer_id: connection.local_peer_id().to_string(),
        };

        if !join_done.complete(Ok(joined)) {
            warn!(
                "Joined room {} after the caller stopped waiting; leaving",
                self.room_id
            );
            let _ = self.leave(connection).await;
            return;
        }

        info!("Successfully joined room {}", self.room_id);

        let reply = loop {
            tokio::select! {
                command = inbox.recv() => match command {
                    Some(WorkerCommand::Leave(reply)) => {
                        info!("Leave requested for room {}", self.room_id);
                        break Some(reply);
                    }
                    None => {
                        warn!("Session handle for room {} dropped; leaving", self.room_id);
                        break None;
                    }
                },
                event = events.recv() => match event {
                    Some(RoomEvent::RoomClosed) | None => {
                        info!("Room {} closed", self.room_id);
                        break None;
                    }
                    Some(event) => {
                        let dispatched = AssertUnwindSafe(self.dispatch(event)).catch_unwind().await;
                        if dispatched.is_err() {
                            error!("Event handler for room {} panicked", self.room_id);
                        }
                    }
                },
            }
        };

        inbox.close();
        let result = self.leave(connection).await;

        if let Some(reply) = reply {
            reply.complete(result.clone());
        }
        // Leave requests that raced the shutdown get the same answer
        while let Some(WorkerCommand::Leave(reply)) = inbox.recv().await {
            reply.complete(result.clone());
        }
    }

    async fn dispatch(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::NewConsumer(consumer) => self.on_new_consumer(consumer).await,
            RoomEvent::ConsumerClosed { consumer_id } => self.on_consumer_closed(&consumer_id).await,
            RoomEvent::RoomClosed => {}
        }
    }

    async fn on_new_consumer(&mut self, consumer: Consumer) {
        info!(
            "New consumer {} from peer {} ({})",
            consumer.id, consumer.remote_peer_id, consumer.kind
        );

        if consumer.kind != MediaKind::Audio {
            info!(
                "Skipping {} consumer {} from peer {}: only audio is recorded",
                consumer.kind, consumer.id, consumer.remote_peer_id
            );
            return;
        }

        let Some(track) = consumer.track else {
            warn!("Track for consumer {} not found or not ready", consumer.id);
            return;
        };

        let file_name = recording_file_name(&consumer.remote_peer_id, self.recording.settings.format);
        let output_path = self.recording.recordings_dir.join(&file_name);
        info!("Recording consumer {} to {}", consumer.id, file_name);

        let mut recorder = RecorderEngine::new(track, output_path, self.recording.settings);

        if let Some(delivery) = self.recording.delivery.clone() {
            let peer_id = consumer.remote_peer_id.clone();
            let object_key = format!("recordings/{}", file_name);
            recorder
                .on_completed(move |recording| {
                    if let Err(e) = recording.result() {
                        warn!(
                            "Recording {:?} did not finalize, skipping upload: {}",
                            recording.output_path, e
                        );
                        return;
                    }
                    delivery.submit(DeliveryJob {
                        peer_id,
                        local_path: recording.output_path.clone(),
                        object_key,
                    });
                })
                .await;
        }

        recorder.start().await;

        if let Some(mut previous) = self.recorders.insert(consumer.id, recorder) {
            previous.stop().await;
        }
    }

    async fn on_consumer_closed(&mut self, consumer_id: &str) {
        info!("Consumer {} closed", consumer_id);
        if let Some(mut recorder) = self.recorders.remove(consumer_id) {
            recorder.stop().await;
            info!("Recorder for consumer {} stopped", consumer_id);
        }
    }

    /// Stop every recorder, then leave and release the connection.
    async fn leave(&mut self, mut connection: Box<dyn RoomConnection>) -> Result<(), String> {
        self.set_state(WorkerState::Leaving);

        let recorders = std::mem::take(&mut self.recorders);
        for (_, mut recorder) in recorders {
            recorder.stop().await;
        }

        let result = match AssertUnwindSafe(connection.leave()).catch_unwind().await {
            Ok(Ok(())) => {
                info!("Room {} left successfully", self.room_id);
                Ok(())
            }
            Ok(Err(e)) => {
                error!("Error leaving room {}: {:#}", self.room_id, e);
                Err(format!("{:#}", e))
            }
            Err(_) => {
                error!("Leave for room {} panicked", self.room_id);
                Err("leave panicked".to_string())
            }
        };

        drop(connection);
        result
    }

    fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
    }
}

/// `{peer}-{random}.{ext}`, with the peer id reduced to filesystem-safe characters
pub fn recording_file_name(remote_peer_id: &str, format: OutputFormat) -> String {
    let peer: String = remote_peer_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(4)
        .map(char::from)
        .collect();

    format!("{}-{}.{}", peer, suffix, format.extension())
}
