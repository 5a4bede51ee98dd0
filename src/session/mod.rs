//! Room session lifecycle
//!
//! This module owns everything between a start request and the final leave:
//! - `registry`: room id → session map, serialized per room
//! - `worker`: one thread + single-threaded scheduler per joined room
//! - `bridge`: bounded cross-thread handoff into a worker's scheduler
//! - `config` / `info`: timeouts and session snapshots

pub mod bridge;
mod config;
mod info;
mod registry;
pub mod worker;

pub use config::SessionTimeouts;
pub use info::{SessionInfo, WorkerState};
pub use registry::SessionRegistry;
pub use worker::{recording_file_name, RecordingContext};
