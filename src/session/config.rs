use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::SessionTimeoutConfig;

/// Bounded waits applied to a session lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionTimeouts {
    /// How long `start` waits for the join outcome
    /// Default: 5 seconds
    pub join: Duration,

    /// How long `stop` waits for the leave round trip before forcing shutdown
    /// Default: 10 seconds
    pub leave: Duration,

    /// How long `stop` waits for the worker thread to exit
    /// Default: 5 seconds
    pub thread_join: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            join: Duration::from_secs(5),
            leave: Duration::from_secs(10),
            thread_join: Duration::from_secs(5),
        }
    }
}

impl From<&SessionTimeoutConfig> for SessionTimeouts {
    fn from(cfg: &SessionTimeoutConfig) -> Self {
        Self {
            join: Duration::from_millis(cfg.join_timeout_ms),
            leave: Duration::from_millis(cfg.leave_timeout_ms),
            thread_join: Duration::from_millis(cfg.thread_join_timeout_ms),
        }
    }
}
