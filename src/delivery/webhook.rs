use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::config::{non_blank, WebhookConfig};
use crate::error::Error;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Body posted when a recording is available
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct WebhookPayload {
    #[serde(rename = "peerId")]
    pub peer_id: String,
    pub recording_file_url: String,
}

/// Posts recording notifications to the configured endpoint.
///
/// Built once at startup from configuration and shared; there is no global
/// instance to re-initialize.
#[derive(Debug)]
pub struct WebhookNotifier {
    client: Client,
    endpoint: String,
    secret: Option<String>,
}

impl WebhookNotifier {
    pub fn new(endpoint: impl Into<String>, secret: Option<String>) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build webhook client: {}", e)))?;

        let endpoint = endpoint.into();
        info!("Webhook notifier initialised: {}", endpoint);

        Ok(Self {
            client,
            endpoint,
            secret,
        })
    }

    /// `None` when no webhook URL is configured
    pub fn from_config(cfg: &WebhookConfig) -> Result<Option<Self>, Error> {
        match non_blank(&cfg.url) {
            Some(url) => Self::new(url, non_blank(&cfg.secret)).map(Some),
            None => Ok(None),
        }
    }

    /// Deliver one notification. Delivery errors are returned to the caller.
    pub async fn notify(&self, peer_id: &str, file_url: &str) -> Result<(), Error> {
        let payload = WebhookPayload {
            peer_id: peer_id.to_string(),
            recording_file_url: file_url.to_string(),
        };

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(secret) = &self.secret {
            request = request.header("x-api-key", secret);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Webhook(e.to_string()))?;
        response
            .error_for_status()
            .map_err(|e| Error::Webhook(e.to_string()))?;

        info!("Webhook delivered for peer {}", peer_id);
        Ok(())
    }
}
