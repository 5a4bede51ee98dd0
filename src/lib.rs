pub mod audio;
pub mod config;
pub mod delivery;
pub mod error;
pub mod http;
pub mod room;
pub mod session;

pub use audio::{
    AudioFrame, ChannelTrack, CompletedRecording, MediaKind, MediaTrack, OutputFormat,
    RecorderEngine, RecorderSettings, RecorderState, StopReason,
};
pub use config::Config;
pub use delivery::{
    DeliveryJob, DeliveryOutcome, DeliveryPipeline, ObjectStorageUploader, UploadGateway,
    WebhookNotifier,
};
pub use error::{Error, Result};
pub use http::{create_router, AppState};
pub use room::{MemoryRoomHub, PlatformCredentials, RoomClient, RoomConnection, RoomEvent};
pub use session::{RecordingContext, SessionInfo, SessionRegistry, SessionTimeouts, WorkerState};
