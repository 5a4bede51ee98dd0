use crate::config::PlatformConfig;
use crate::session::SessionRegistry;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Active room sessions
    pub registry: Arc<SessionRegistry>,

    /// Platform credentials, resolved on every start so a missing value is
    /// reported to the caller rather than at boot
    pub platform: Arc<PlatformConfig>,
}

impl AppState {
    pub fn new(registry: Arc<SessionRegistry>, platform: PlatformConfig) -> Self {
        Self {
            registry,
            platform: Arc::new(platform),
        }
    }
}
