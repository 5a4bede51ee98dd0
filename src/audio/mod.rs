//! Per-track audio recording
//!
//! - `frame`: decoded frames and the live track contract
//! - `encoder`: PCM packetizer with explicit flush
//! - `container`: WAV container writer
//! - `recorder`: the recorder state machine tying them together

pub mod container;
pub mod encoder;
pub mod frame;
pub mod recorder;

pub use container::{Container, OutputFormat};
pub use encoder::{Packet, PcmEncoder, StreamParams};
pub use frame::{AudioFrame, ChannelTrack, MediaKind, MediaTrack};
pub use recorder::{CompletedRecording, RecorderEngine, RecorderSettings, RecorderState, StopReason};
