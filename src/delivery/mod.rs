//! Post-recording delivery: upload the file, then notify the webhook.
//!
//! The pipeline runs on the process runtime, outside any session worker, so a
//! session leaving a room never cancels an upload that is already under way.

pub mod sigv4;
mod upload;
mod webhook;

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub use upload::{ObjectStorageUploader, UploadGateway, MAX_UPLOAD_ATTEMPTS};
pub use webhook::{WebhookNotifier, WebhookPayload};

/// A finalized recording waiting to be delivered
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    pub peer_id: String,
    pub local_path: PathBuf,
    pub object_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Uploaded and the webhook accepted the notification
    Delivered { url: String },
    /// Uploaded; no webhook configured
    Uploaded { url: String },
    /// Upload failed; the webhook was not called
    UploadFailed(String),
    /// Uploaded, but the notification was not delivered
    WebhookFailed { url: String, reason: String },
}

/// Handle for submitting finished recordings
#[derive(Clone)]
pub struct DeliveryPipeline {
    tx: mpsc::UnboundedSender<DeliveryJob>,
}

impl DeliveryPipeline {
    /// Start the pipeline on the current runtime. It runs until every handle is dropped.
    pub fn spawn(
        uploader: Arc<dyn UploadGateway>,
        notifier: Option<Arc<WebhookNotifier>>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<DeliveryJob>();

        let task = tokio::spawn(async move {
            let mut in_flight = tokio::task::JoinSet::new();

            while let Some(job) = rx.recv().await {
                let uploader = Arc::clone(&uploader);
                let notifier = notifier.clone();
                in_flight.spawn(async move {
                    deliver(&job, uploader.as_ref(), notifier.as_deref()).await;
                });

                // Reap finished deliveries without waiting
                while in_flight.try_join_next().is_some() {}
            }

            while in_flight.join_next().await.is_some() {}
            info!("Delivery pipeline stopped");
        });

        (Self { tx }, task)
    }

    pub fn submit(&self, job: DeliveryJob) {
        info!("Queueing {:?} for upload", job.local_path);
        if self.tx.send(job).is_err() {
            error!("Delivery pipeline is not running; recording will stay local");
        }
    }
}

/// Upload one recording and, if that succeeds, notify the webhook.
///
/// A webhook failure never re-triggers the upload.
pub async fn deliver(
    job: &DeliveryJob,
    uploader: &dyn UploadGateway,
    notifier: Option<&WebhookNotifier>,
) -> DeliveryOutcome {
    info!("Uploading {:?} as {}", job.local_path, job.object_key);

    let url = match uploader.upload(&job.local_path, &job.object_key).await {
        Ok(url) => url,
        Err(e) => {
            error!("Error uploading {:?}: {}", job.local_path, e);
            return DeliveryOutcome::UploadFailed(e.to_string());
        }
    };

    let Some(notifier) = notifier else {
        return DeliveryOutcome::Uploaded { url };
    };

    match notifier.notify(&job.peer_id, &url).await {
        Ok(()) => DeliveryOutcome::Delivered { url },
        Err(e) => {
            warn!("Webhook for {} failed: {}", job.peer_id, e);
            DeliveryOutcome::WebhookFailed {
                url,
                reason: e.to_string(),
            }
        }
    }
}
