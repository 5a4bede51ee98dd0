use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;

use crate::audio::{OutputFormat, RecorderSettings, StreamParams};
use crate::error::Error;
use crate::room::PlatformCredentials;

/// Environment variable prefix, e.g. `ROOM_RECORDER__PLATFORM__API_KEY`.
pub const ENV_PREFIX: &str = "ROOM_RECORDER";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub platform: PlatformConfig,
    pub recording: RecordingConfig,
    pub session: SessionTimeoutConfig,
    pub webhook: WebhookConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "room-recorder".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Real-time platform credential pair. Both halves are optional here so that a
/// missing value is reported per request instead of aborting startup.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub project_id: Option<String>,
    pub api_key: Option<String>,
}

impl std::fmt::Debug for PlatformConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformConfig")
            .field("project_id", &self.project_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl PlatformConfig {
    /// Resolve the credential pair, failing before any network call if either half
    /// is absent or blank.
    pub fn credentials(&self) -> Result<PlatformCredentials, Error> {
        match (non_blank(&self.project_id), non_blank(&self.api_key)) {
            (Some(project_id), Some(api_key)) => Ok(PlatformCredentials::new(project_id, api_key)),
            _ => Err(Error::Configuration(
                "platform project_id and api_key must both be set".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Directory recordings are written to before upload
    pub recordings_path: PathBuf,
    /// Container format (file extension)
    pub format: String,
    /// Encoded stream sample rate
    pub sample_rate: u32,
    /// Encoded stream channel count
    pub channels: u16,
    /// Samples per encoded packet (20ms at 48kHz by default)
    pub packet_samples: usize,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            recordings_path: PathBuf::from("recordings"),
            format: "wav".to_string(),
            sample_rate: 48000,
            channels: 1,
            packet_samples: 960,
        }
    }
}

impl RecordingConfig {
    /// Encoder and container settings for new recorders
    pub fn settings(&self) -> Result<RecorderSettings, Error> {
        let format: OutputFormat = self
            .format
            .parse()
            .map_err(|e: anyhow::Error| Error::Configuration(e.to_string()))?;

        if self.sample_rate == 0 || self.channels == 0 || self.channels > 2 || self.packet_samples == 0 {
            return Err(Error::Configuration(format!(
                "unsupported stream parameters: {} Hz, {} channels, {} samples per packet",
                self.sample_rate, self.channels, self.packet_samples
            )));
        }

        Ok(RecorderSettings {
            format,
            stream: StreamParams {
                sample_rate: self.sample_rate,
                channels: self.channels,
                packet_samples: self.packet_samples,
            },
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionTimeoutConfig {
    pub join_timeout_ms: u64,
    pub leave_timeout_ms: u64,
    pub thread_join_timeout_ms: u64,
}

impl Default for SessionTimeoutConfig {
    fn default() -> Self {
        Self {
            join_timeout_ms: 5_000,
            leave_timeout_ms: 10_000,
            thread_join_timeout_ms: 5_000,
        }
    }
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub url: Option<String>,
    pub secret: Option<String>,
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("url", &self.url)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage account identity; determines the default endpoint
    pub account_id: Option<String>,
    pub access_key_id: Option<String>,
    pub access_key_secret: Option<String>,
    pub bucket: Option<String>,
    /// Public domain used for returned URLs
    pub custom_domain: Option<String>,
    /// Overrides `https://{account_id}.r2.cloudflarestorage.com`
    pub endpoint: Option<String>,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("account_id", &self.account_id)
            .field("access_key_id", &self.access_key_id)
            .field(
                "access_key_secret",
                &self.access_key_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("bucket", &self.bucket)
            .field("custom_domain", &self.custom_domain)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl Config {
    /// Load configuration from an optional file layered under the environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

pub(crate) fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.session.join_timeout_ms, 5_000);
        assert_eq!(cfg.session.leave_timeout_ms, 10_000);
        assert_eq!(cfg.session.thread_join_timeout_ms, 5_000);
        assert_eq!(cfg.recording.format, "wav");
        assert_eq!(cfg.service.http.port, 8000);
    }

    #[test]
    fn test_missing_credentials_is_configuration_error() {
        let platform = PlatformConfig {
            project_id: Some("project".to_string()),
            api_key: Some("   ".to_string()),
        };
        assert!(matches!(platform.credentials(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_credentials_resolve() {
        let platform = PlatformConfig {
            project_id: Some("project".to_string()),
            api_key: Some("key".to_string()),
        };
        let creds = platform.credentials().unwrap();
        assert_eq!(creds.project_id(), "project");
        assert_eq!(creds.api_key(), "key");
    }

    #[test]
    fn test_recording_settings() {
        let settings = RecordingConfig::default().settings().unwrap();
        assert_eq!(settings.format, OutputFormat::Wav);
        assert_eq!(settings.stream.sample_rate, 48_000);
        assert_eq!(settings.stream.packet_samples, 960);
    }

    #[test]
    fn test_unknown_format_is_configuration_error() {
        let recording = RecordingConfig {
            format: "mp3".to_string(),
            ..RecordingConfig::default()
        };
        assert!(matches!(recording.settings(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let platform = PlatformConfig {
            project_id: Some("project".to_string()),
            api_key: Some("super-secret".to_string()),
        };
        let rendered = format!("{:?}", platform);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("REDACTED"));
    }
}
