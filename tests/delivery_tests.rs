// Integration tests for recording delivery
//
// Object storage and the webhook endpoint are stood in for by wiremock servers.

use anyhow::Result;
use room_recorder::config::{StorageConfig, WebhookConfig};
use room_recorder::delivery::{
    deliver, DeliveryJob, DeliveryOutcome, ObjectStorageUploader, UploadGateway, WebhookNotifier,
};
use room_recorder::Error;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn storage_config(endpoint: &str) -> StorageConfig {
    StorageConfig {
        account_id: None,
        access_key_id: Some("AKID".to_string()),
        access_key_secret: Some("secret".to_string()),
        bucket: Some("bucket".to_string()),
        custom_domain: None,
        endpoint: Some(endpoint.to_string()),
    }
}

fn uploader(config: StorageConfig) -> ObjectStorageUploader {
    ObjectStorageUploader::new(config).with_retry_delay(Duration::from_millis(10))
}

fn recording(dir: &TempDir) -> Result<PathBuf> {
    let path = dir.path().join("alice-abcd.wav");
    std::fs::write(&path, b"RIFF....WAVE")?;
    Ok(path)
}

struct StaticUploader {
    result: Result<String, String>,
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl UploadGateway for StaticUploader {
    async fn upload(&self, _local_path: &Path, _remote_key: &str) -> Result<String, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone().map_err(Error::Upload)
    }
}

#[tokio::test]
async fn test_upload_puts_signed_object() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/bucket/recordings/alice-abcd.wav"))
        .and(header_exists("authorization"))
        .and(header_exists("x-amz-date"))
        .and(header_exists("x-amz-content-sha256"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new()?;
    let file = recording(&dir)?;

    let url = uploader(storage_config(&server.uri()))
        .upload(&file, "recordings/alice-abcd.wav")
        .await?;
    assert_eq!(url, format!("{}/bucket/recordings/alice-abcd.wav", server.uri()));

    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].body, b"RIFF....WAVE".to_vec());
    let authorization = requests[0]
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(authorization.starts_with("AWS4-HMAC-SHA256 Credential=AKID/"));
    assert!(authorization.contains("/auto/s3/aws4_request"));

    Ok(())
}

#[tokio::test]
async fn test_upload_returns_custom_domain_url() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = TempDir::new()?;
    let file = recording(&dir)?;
    let config = StorageConfig {
        custom_domain: Some("media.example.com".to_string()),
        ..storage_config(&server.uri())
    };

    let url = uploader(config)
        .upload(&file, "recordings/alice-abcd.wav")
        .await?;
    assert_eq!(url, "https://media.example.com/recordings/alice-abcd.wav");

    Ok(())
}

#[tokio::test]
async fn test_upload_retries_then_succeeds() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new()?;
    let file = recording(&dir)?;

    uploader(storage_config(&server.uri()))
        .upload(&file, "recordings/alice-abcd.wav")
        .await?;

    Ok(())
}

#[tokio::test]
async fn test_upload_gives_up_after_three_attempts() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let dir = TempDir::new()?;
    let file = recording(&dir)?;

    let result = uploader(storage_config(&server.uri()))
        .upload(&file, "recordings/alice-abcd.wav")
        .await;
    assert!(matches!(result, Err(Error::Upload(_))));

    Ok(())
}

#[tokio::test]
async fn test_upload_without_configuration_fails_fast() -> Result<()> {
    let result = uploader(StorageConfig::default())
        .upload(Path::new("/nonexistent/alice.wav"), "recordings/alice.wav")
        .await;
    assert!(matches!(result, Err(Error::Configuration(_))));

    let partial = StorageConfig {
        bucket: None,
        ..storage_config("http://127.0.0.1:9")
    };
    let result = uploader(partial)
        .upload(Path::new("/nonexistent/alice.wav"), "recordings/alice.wav")
        .await;
    assert!(matches!(result, Err(Error::Configuration(_))));

    Ok(())
}

#[tokio::test]
async fn test_webhook_posts_payload_with_api_key() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/recording"))
        .and(header("x-api-key", "s3cret"))
        .and(body_json(json!({
            "peerId": "alice",
            "recording_file_url": "https://media.example.com/recordings/alice-abcd.wav"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::from_config(&WebhookConfig {
        url: Some(format!("{}/hooks/recording", server.uri())),
        secret: Some("s3cret".to_string()),
    })?
    .expect("webhook configured");

    notifier
        .notify("alice", "https://media.example.com/recordings/alice-abcd.wav")
        .await?;

    Ok(())
}

#[tokio::test]
async fn test_webhook_error_status_is_reported() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(server.uri(), None)?;
    let result = notifier.notify("alice", "https://example.com/a.wav").await;
    assert!(matches!(result, Err(Error::Webhook(_))));

    Ok(())
}

#[tokio::test]
async fn test_unconfigured_webhook_is_absent() -> Result<()> {
    let notifier = WebhookNotifier::from_config(&WebhookConfig {
        url: Some("   ".to_string()),
        secret: None,
    })?;
    assert!(notifier.is_none());
    Ok(())
}

#[tokio::test]
async fn test_failed_upload_skips_webhook() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let notifier = WebhookNotifier::new(server.uri(), Some("s3cret".to_string()))?;

    let uploader = StaticUploader {
        result: Err("storage unavailable".to_string()),
        calls: AtomicUsize::new(0),
    };
    let job = DeliveryJob {
        peer_id: "alice".to_string(),
        local_path: PathBuf::from("/tmp/alice.wav"),
        object_key: "recordings/alice.wav".to_string(),
    };

    let outcome = deliver(&job, &uploader, Some(&notifier)).await;
    assert!(matches!(outcome, DeliveryOutcome::UploadFailed(_)));
    assert_eq!(uploader.calls.load(Ordering::SeqCst), 1);

    Ok(())
}

#[tokio::test]
async fn test_webhook_failure_does_not_retry_upload() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    let notifier = WebhookNotifier::new(server.uri(), None)?;

    let uploader = StaticUploader {
        result: Ok("https://cdn.test/recordings/alice.wav".to_string()),
        calls: AtomicUsize::new(0),
    };
    let job = DeliveryJob {
        peer_id: "alice".to_string(),
        local_path: PathBuf::from("/tmp/alice.wav"),
        object_key: "recordings/alice.wav".to_string(),
    };

    let outcome = deliver(&job, &uploader, Some(&notifier)).await;
    assert!(matches!(outcome, DeliveryOutcome::WebhookFailed { .. }));
    assert_eq!(uploader.calls.load(Ordering::SeqCst), 1);

    let outcome = deliver(&job, &uploader, None).await;
    assert_eq!(
        outcome,
        DeliveryOutcome::Uploaded {
            url: "https://cdn.test/recordings/alice.wav".to_string()
        }
    );

    Ok(())
}
