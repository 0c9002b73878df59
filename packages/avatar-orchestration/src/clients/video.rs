//! Video generation client
//!
//! Dispatches an asynchronous image-conditioned generation operation and
//! reports its status later. A status query never fails: transport problems
//! come back as [`OperationStatus::Unavailable`], an explicit retry signal.

use async_trait::async_trait;
use avatar_storage::{GestureMode, OperationHandle, VideoSpec};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::VideoConfig;

#[derive(Error, Debug)]
pub enum VideoClientError {
    #[error("video backend rejected dispatch: {0}")]
    Rejected(String),

    #[error("video backend unreachable: {0}")]
    Transport(String),

    #[error("invalid video backend response: {0}")]
    InvalidResponse(String),

    #[error("invalid video backend endpoint: {0}")]
    Endpoint(String),
}

impl VideoClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, VideoClientError::Transport(_))
    }
}

/// Status of a dispatched operation, as seen by one poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    /// Submitted or still running
    InProgress,
    /// Backend reports success; output may still be materializing
    Completed { output_location: Option<String> },
    /// Backend explicitly reports failure
    Failed { reason: String },
    /// Backend could not be queried this time
    Unavailable { detail: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    /// Inferred from the key extension; anything but jpg/jpeg is png
    pub fn from_key(key: &str) -> Self {
        let ext = key
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "jpg" | "jpeg" => ImageFormat::Jpeg,
            _ => ImageFormat::Png,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
        }
    }
}

/// Conditioning image sent inline with the dispatch request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub format: ImageFormat,
    pub bytes: Vec<u8>,
}

impl ImagePayload {
    pub fn new(key: &str, bytes: Vec<u8>) -> Self {
        Self {
            format: ImageFormat::from_key(key),
            bytes,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "format": self.format.as_str(),
            "source": { "bytes": BASE64.encode(&self.bytes) },
        })
    }
}

#[derive(Debug, Clone)]
pub struct VideoRequest {
    pub job_id: Uuid,
    pub image: ImagePayload,
    pub prompt: String,
    /// Parameters after clamping to backend capabilities
    pub spec: VideoSpec,
    /// Where the backend should write its output
    pub output_location: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReceipt {
    pub handle: OperationHandle,
    /// Configuration echoed back by the backend, when it reports one
    pub configured: Option<VideoSpec>,
}

/// Video generation collaborator
#[async_trait]
pub trait VideoGenerator: Send + Sync {
    async fn dispatch(&self, request: &VideoRequest) -> Result<DispatchReceipt, VideoClientError>;

    async fn poll_status(&self, handle: &OperationHandle) -> OperationStatus;
}

/// What the backend accepts; requests are clamped to this
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoCapabilities {
    pub supported_durations: Vec<u32>,
    pub fps: u32,
    pub dimension: String,
}

impl VideoCapabilities {
    pub fn from_config(config: &VideoConfig) -> Self {
        let mut supported_durations = config.supported_durations.clone();
        supported_durations.sort_unstable();
        supported_durations.dedup();
        Self {
            supported_durations,
            fps: config.fps,
            dimension: config.dimension.clone(),
        }
    }

    /// Largest supported duration not above `requested`, else the smallest
    pub fn clamp(&self, requested_secs: u32) -> VideoSpec {
        let duration_secs = self
            .supported_durations
            .iter()
            .rev()
            .find(|d| **d <= requested_secs)
            .or_else(|| self.supported_durations.first())
            .copied()
            .unwrap_or(requested_secs);

        VideoSpec {
            duration_secs,
            fps: self.fps,
            dimension: self.dimension.clone(),
        }
    }
}

pub fn build_prompt(gesture_mode: GestureMode) -> String {
    let gestures = match gesture_mode {
        GestureMode::Subtle => "subtle natural hand gestures, minimal movement",
        GestureMode::Expressive => "clear expressive hand gestures, dynamic movement",
    };
    format!(
        "Medium shot of a professional presenter looking directly into the camera, \
         {}, calm confident body language, slight head movement and occasional nods \
         while speaking, natural facial expressions with subtle smile, professional demeanor.",
        gestures
    )
}

// ═══════════════════════════════════════════════════════════════════════════
// HTTP gateway
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DispatchResponse {
    invocation_arn: String,
    #[serde(default)]
    video_generation_config: Option<GenerationConfigEcho>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfigEcho {
    duration_seconds: u32,
    fps: u32,
    dimension: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    failure_message: Option<String>,
    #[serde(default)]
    output_data_config: Option<OutputDataConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutputDataConfig {
    #[serde(default)]
    s3_output_data_config: Option<S3OutputDataConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct S3OutputDataConfig {
    #[serde(default)]
    s3_uri: Option<String>,
}

fn map_status(response: StatusResponse) -> OperationStatus {
    let status = response
        .status
        .unwrap_or_default()
        .to_ascii_lowercase()
        .replace('_', "");

    match status.as_str() {
        "completed" => OperationStatus::Completed {
            output_location: response
                .output_data_config
                .and_then(|c| c.s3_output_data_config)
                .and_then(|c| c.s3_uri),
        },
        "failed" => OperationStatus::Failed {
            reason: response
                .failure_message
                .unwrap_or_else(|| "backend reported failure".to_string()),
        },
        "" | "inprogress" | "submitted" => OperationStatus::InProgress,
        other => {
            warn!("Unrecognized operation status '{}', treating as in progress", other);
            OperationStatus::InProgress
        }
    }
}

/// HTTP gateway in front of the async video generation backend
pub struct HttpVideoGenerator {
    http: reqwest::Client,
    config: VideoConfig,
}

impl HttpVideoGenerator {
    pub fn new(config: VideoConfig) -> Result<Self, VideoClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VideoClientError::Transport(e.to_string()))?;
        Ok(Self { http, config })
    }

    fn url(&self, segments: &[&str]) -> Result<reqwest::Url, VideoClientError> {
        let mut url = reqwest::Url::parse(&self.config.endpoint)
            .map_err(|e| VideoClientError::Endpoint(format!("{}: {}", self.config.endpoint, e)))?;
        url.path_segments_mut()
            .map_err(|_| VideoClientError::Endpoint(self.config.endpoint.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request_body(&self, request: &VideoRequest) -> serde_json::Value {
        json!({
            "modelId": self.config.model_id,
            "clientRequestToken": request.job_id.to_string(),
            "modelInput": {
                "taskType": "TEXT_VIDEO",
                "textToVideoParams": {
                    "text": request.prompt,
                    "images": [request.image.to_json()],
                },
                "videoGenerationConfig": {
                    "durationSeconds": request.spec.duration_secs,
                    "fps": request.spec.fps,
                    "dimension": request.spec.dimension,
                },
            },
            "outputDataConfig": {
                "s3OutputDataConfig": { "s3Uri": request.output_location },
            },
        })
    }
}

#[async_trait]
impl VideoGenerator for HttpVideoGenerator {
    async fn dispatch(&self, request: &VideoRequest) -> Result<DispatchReceipt, VideoClientError> {
        let url = self.url(&["async-invoke"])?;
        debug!(
            "Dispatching video generation for job {} ({}s, {} fps, {})",
            request.job_id, request.spec.duration_secs, request.spec.fps, request.spec.dimension
        );

        let response = self
            .http
            .post(url)
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|e| VideoClientError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(VideoClientError::Transport(format!("dispatch returned {}", status)));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(VideoClientError::Rejected(format!("{}: {}", status, text)));
        }

        let body: DispatchResponse = response
            .json()
            .await
            .map_err(|e| VideoClientError::InvalidResponse(e.to_string()))?;

        Ok(DispatchReceipt {
            handle: OperationHandle::new(body.invocation_arn),
            configured: body.video_generation_config.map(|c| VideoSpec {
                duration_secs: c.duration_seconds,
                fps: c.fps,
                dimension: c.dimension,
            }),
        })
    }

    async fn poll_status(&self, handle: &OperationHandle) -> OperationStatus {
        let url = match self.url(&["async-invoke", handle.as_str()]) {
            Ok(url) => url,
            Err(e) => {
                return OperationStatus::Unavailable {
                    detail: e.to_string(),
                }
            }
        };

        let response = match self.http.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                return OperationStatus::Unavailable {
                    detail: e.to_string(),
                }
            }
        };

        let status = response.status();
        if !status.is_success() {
            return OperationStatus::Unavailable {
                detail: format!("status query for {} returned {}", handle, status),
            };
        }

        match response.json::<StatusResponse>().await {
            Ok(body) => map_status(body),
            Err(e) => OperationStatus::Unavailable {
                detail: format!("undecodable status for {}: {}", handle, e),
            },
        }
    }
}
