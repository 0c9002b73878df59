//! Service configuration (YAML v1 + `AVATAR_*` environment overrides)
//!
//! ```yaml
//! version: 1
//! log_level: info
//! storage:
//!   sqlite_path: /var/lib/avatar/jobs.db
//!   s3:
//!     bucket: avatar-render
//!     region: us-east-1
//! scheduler:
//!   poll_interval_secs: 30
//!   abandon_after_secs: 1200
//! ```
//!
//! Every section is optional and falls back to its defaults.

use avatar_storage::S3Config;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const SUPPORTED_VERSIONS: &[u32] = &[1];

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Unsupported version
    #[error("Unsupported configuration version {found}. Supported versions: {}", supported.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", "))]
    UnsupportedVersion { found: u32, supported: Vec<u32> },

    /// Range validation error
    #[error("Invalid value for field '{field}': {value}. {hint}")]
    Range {
        field: String,
        value: String,
        hint: String,
    },

    /// Environment override could not be parsed
    #[error("Invalid environment override {var}={value}")]
    InvalidEnv { var: String, value: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

fn range(field: &str, value: impl std::fmt::Display, hint: &str) -> ConfigError {
    ConfigError::Range {
        field: field.to_string(),
        value: value.to_string(),
        hint: hint.to_string(),
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Schema version (always 1 for v1)
    pub version: u32,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub speech: SpeechConfig,

    #[serde(default)]
    pub video: VideoConfig,

    #[serde(default)]
    pub merge: MergeConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            version: 1,
            log_level: default_log_level(),
            storage: StorageConfig::default(),
            speech: SpeechConfig::default(),
            video: VideoConfig::default(),
            merge: MergeConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StorageConfig {
    /// SQLite metadata store location
    pub sqlite_path: PathBuf,

    pub s3: S3Config,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("avatar-jobs.db"),
            s3: S3Config::default(),
        }
    }
}

/// Speech gateway settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SpeechConfig {
    /// Stock neural voice endpoint
    pub endpoint: String,

    pub voice_id: String,

    pub sample_rate: String,

    /// Voice cloning endpoint; cloned mode is rejected when unset
    pub clone_endpoint: Option<String>,

    pub timeout_secs: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8081/synthesize".to_string(),
            voice_id: "Joanna".to_string(),
            sample_rate: "24000".to_string(),
            clone_endpoint: None,
            timeout_secs: 60,
        }
    }
}

/// Video generation backend settings and capabilities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct VideoConfig {
    pub endpoint: String,

    pub model_id: String,

    /// Clip lengths the backend accepts
    pub supported_durations: Vec<u32>,

    pub fps: u32,

    pub dimension: String,

    pub timeout_secs: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8082".to_string(),
            model_id: "amazon.nova-reel-v1:0".to_string(),
            supported_durations: vec![6],
            fps: 24,
            dimension: "1280x720".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MergeConfig {
    pub ffmpeg_path: PathBuf,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
        }
    }
}

/// Job orchestrator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OrchestratorConfig {
    pub min_duration_secs: u32,

    pub max_duration_secs: u32,

    /// Used when the caller gives no duration hint
    pub default_duration_secs: u32,

    /// Non-empty listings without a media object tolerated before
    /// `FAILED(discovery_failed)`
    pub max_discovery_misses: u32,

    /// Re-read/re-evaluate rounds after a lost conditional update
    pub condition_retries: u32,

    pub presign_ttl_secs: u64,

    /// Suffix identifying the raw video object, matched case-insensitively
    pub media_suffix: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            min_duration_secs: 5,
            max_duration_secs: 120,
            default_duration_secs: 18,
            max_discovery_misses: 5,
            condition_retries: 3,
            presign_ttl_secs: 3600,
            media_suffix: ".mp4".to_string(),
        }
    }
}

impl OrchestratorConfig {
    pub fn presign_ttl(&self) -> Duration {
        Duration::from_secs(self.presign_ttl_secs)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.min_duration_secs == 0 {
            return Err(range(
                "orchestrator.min_duration_secs",
                self.min_duration_secs,
                "must be positive",
            ));
        }
        if !(self.min_duration_secs..=self.max_duration_secs)
            .contains(&self.default_duration_secs)
        {
            return Err(range(
                "orchestrator.default_duration_secs",
                self.default_duration_secs,
                &format!(
                    "must lie in {}..={}",
                    self.min_duration_secs, self.max_duration_secs
                ),
            ));
        }
        if self.presign_ttl_secs == 0 {
            return Err(range("orchestrator.presign_ttl_secs", 0, "must be positive"));
        }
        if self.media_suffix.is_empty() {
            return Err(range("orchestrator.media_suffix", "\"\"", "must not be empty"));
        }
        Ok(())
    }
}

/// Polling driver settings. Retry interval and abandonment budget are owned
/// here, not by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SchedulerConfig {
    pub poll_interval_secs: u64,

    /// Jobs older than this are forced to `FAILED(timeout)`
    pub abandon_after_secs: u64,

    /// Reconciliation cycles in flight per sweep
    pub max_concurrent: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            abandon_after_secs: 20 * 60,
            max_concurrent: num_cpus::get(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn abandon_after(&self) -> Duration {
        Duration::from_secs(self.abandon_after_secs)
    }
}

impl ServiceConfig {
    /// Load a YAML v1 file (without env overrides)
    pub fn from_yaml(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let config: ServiceConfig = serde_yaml::from_str(content)?;

        // Version check
        if !SUPPORTED_VERSIONS.contains(&config.version) {
            return Err(ConfigError::UnsupportedVersion {
                found: config.version,
                supported: SUPPORTED_VERSIONS.to_vec(),
            });
        }

        Ok(config)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// File (or defaults), then process environment, then validation
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_yaml(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `AVATAR_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("AVATAR_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = lookup("AVATAR_SQLITE_PATH") {
            self.storage.sqlite_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("AVATAR_S3_BUCKET") {
            self.storage.s3.bucket = v;
        }
        if let Some(v) = lookup("AVATAR_S3_REGION") {
            self.storage.s3.region = v;
        }
        if let Some(v) = lookup("AVATAR_S3_ENDPOINT") {
            self.storage.s3.endpoint = Some(v);
        }
        if let Some(v) = lookup("AVATAR_SPEECH_ENDPOINT") {
            self.speech.endpoint = v;
        }
        if let Some(v) = lookup("AVATAR_VOICE_CLONE_ENDPOINT") {
            self.speech.clone_endpoint = Some(v);
        }
        if let Some(v) = lookup("AVATAR_VIDEO_ENDPOINT") {
            self.video.endpoint = v;
        }
        if let Some(v) = lookup("AVATAR_FFMPEG_PATH") {
            self.merge.ffmpeg_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("AVATAR_POLL_INTERVAL_SECS") {
            self.scheduler.poll_interval_secs = parse_env("AVATAR_POLL_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("AVATAR_ABANDON_AFTER_SECS") {
            self.scheduler.abandon_after_secs = parse_env("AVATAR_ABANDON_AFTER_SECS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.orchestrator.validate()?;

        if self.video.supported_durations.is_empty() {
            return Err(range(
                "video.supported_durations",
                "[]",
                "list at least one clip length",
            ));
        }
        if self.video.supported_durations.contains(&0) || self.video.fps == 0 {
            return Err(range(
                "video",
                format!(
                    "durations={:?} fps={}",
                    self.video.supported_durations, self.video.fps
                ),
                "durations and fps must be positive",
            ));
        }
        if self.scheduler.poll_interval_secs == 0 {
            return Err(range("scheduler.poll_interval_secs", 0, "must be positive"));
        }
        if self.scheduler.abandon_after_secs < self.scheduler.poll_interval_secs {
            return Err(range(
                "scheduler.abandon_after_secs",
                self.scheduler.abandon_after_secs,
                "must be at least one poll interval",
            ));
        }
        if self.scheduler.max_concurrent == 0 {
            return Err(range("scheduler.max_concurrent", 0, "must be positive"));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(var: &str, value: &str) -> ConfigResult<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
    })
}
