use anyhow::{bail, Context};
use chrono::Utc;
use reqwest::{Client, Url};
use std::path::Path;
use std::time::Duration;
use tracing::{error, info, warn};

use super::sigv4::{encode_key, RequestSigner};
use crate::config::{non_blank, StorageConfig};
use crate::error::Error;

/// Attempts made before an upload is reported as failed
pub const MAX_UPLOAD_ATTEMPTS: usize = 3;

/// Object storage collaborator
#[async_trait::async_trait]
pub trait UploadGateway: Send + Sync {
    /// Upload `local_path` under `remote_key` and return its public URL.
    async fn upload(&self, local_path: &Path, remote_key: &str) -> Result<String, Error>;
}

/// Resolved storage settings; every field is present
struct StorageTarget {
    endpoint: String,
    bucket: String,
    access_key_id: String,
    access_key_secret: String,
    custom_domain: Option<String>,
}

/// S3-compatible uploader (Cloudflare R2 by default)
pub struct ObjectStorageUploader {
    client: Client,
    config: StorageConfig,
    retry_delay: Duration,
}

impl ObjectStorageUploader {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            retry_delay: Duration::from_millis(500),
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    fn target(&self) -> Result<StorageTarget, Error> {
        let cfg = &self.config;
        let endpoint = match (non_blank(&cfg.endpoint), non_blank(&cfg.account_id)) {
            (Some(endpoint), _) => endpoint.trim_end_matches('/').to_string(),
            (None, Some(account_id)) => format!("https://{}.r2.cloudflarestorage.com", account_id),
            (None, None) => {
                return Err(Error::Configuration(
                    "storage account_id (or endpoint) is not set".to_string(),
                ))
            }
        };

        match (
            non_blank(&cfg.access_key_id),
            non_blank(&cfg.access_key_secret),
            non_blank(&cfg.bucket),
        ) {
            (Some(access_key_id), Some(access_key_secret), Some(bucket)) => Ok(StorageTarget {
                endpoint,
                bucket,
                access_key_id,
                access_key_secret,
                custom_domain: non_blank(&cfg.custom_domain),
            }),
            _ => Err(Error::Configuration(
                "storage access_key_id, access_key_secret and bucket must all be set".to_string(),
            )),
        }
    }

    async fn put_object(
        &self,
        target: &StorageTarget,
        remote_key: &str,
        body: &[u8],
    ) -> anyhow::Result<()> {
        let path = format!("/{}/{}", target.bucket, encode_key(remote_key));
        let url = Url::parse(&format!("{}{}", target.endpoint, path))
            .with_context(|| format!("Invalid storage endpoint: {}", target.endpoint))?;

        let Some(host) = url.host_str() else {
            bail!("storage endpoint has no host: {}", target.endpoint);
        };
        let host = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        let signer = RequestSigner {
            access_key_id: &target.access_key_id,
            secret_access_key: &target.access_key_secret,
            region: "auto",
            service: "s3",
        };
        let signed = signer.sign("PUT", &host, url.path(), body, Utc::now());

        let response = self
            .client
            .put(url)
            .header("authorization", signed.authorization)
            .header("x-amz-date", signed.amz_date)
            .header("x-amz-content-sha256", signed.content_sha256)
            .body(body.to_vec())
            .send()
            .await
            .context("Failed to send upload request")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            bail!("storage returned {}: {}", status, detail);
        }

        Ok(())
    }

    fn public_url(target: &StorageTarget, remote_key: &str) -> String {
        match &target.custom_domain {
            Some(domain) => format!("https://{}/{}", domain, remote_key),
            None => format!("{}/{}/{}", target.endpoint, target.bucket, remote_key),
        }
    }
}

#[async_trait::async_trait]
impl UploadGateway for ObjectStorageUploader {
    async fn upload(&self, local_path: &Path, remote_key: &str) -> Result<String, Error> {
        // Fails before any network call when unconfigured
        let target = self.target()?;

        let body = tokio::fs::read(local_path)
            .await
            .map_err(|e| Error::Upload(format!("failed to read {:?}: {}", local_path, e)))?;

        let mut last_error = String::new();
        for attempt in 1..=MAX_UPLOAD_ATTEMPTS {
            match self.put_object(&target, remote_key, &body).await {
                Ok(()) => {
                    let url = Self::public_url(&target, remote_key);
                    info!("Uploaded {:?} to {}", local_path, url);
                    return Ok(url);
                }
                Err(e) => {
                    warn!(
                        "Upload attempt {}/{} for {} failed: {:#}",
                        attempt, MAX_UPLOAD_ATTEMPTS, remote_key, e
                    );
                    last_error = format!("{:#}", e);
                    if attempt < MAX_UPLOAD_ATTEMPTS {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        error!("Unable to upload {} after {} attempts", remote_key, MAX_UPLOAD_ATTEMPTS);
        Err(Error::Upload(format!(
            "unable to upload {} after {} attempts: {}",
            remote_key, MAX_UPLOAD_ATTEMPTS, last_error
        )))
    }
}
