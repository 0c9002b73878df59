//! Domain layer for the avatar render job store
//!
//! # Domain Models
//!
//! - `Job`: one request to produce a combined audio/video artifact
//! - `JobStatus`: closed lifecycle enum (`PENDING → READY → COMPLETED`, `FAILED` absorbing)
//! - `Failure`: machine-readable reason plus diagnostic detail
//! - `ArtifactKey` / `OperationHandle`: opaque references into the artifact
//!   store and the video backend
//!
//! # Port Traits
//!
//! - `JobStore`: metadata store with conditional (optimistic) updates
//! - `ObjectStore`: artifact store addressed by opaque keys
//!
//! # Examples
//!
//! ```rust,ignore
//! use avatar_storage::domain::{JobStatus, JobStore, UpdateOutcome};
//!
//! async fn mark(store: &dyn JobStore, mut job: Job) -> Result<()> {
//!     job.status = JobStatus::Ready;
//!     match store.update_job(JobStatus::Pending, &job).await? {
//!         UpdateOutcome::Updated => {}
//!         UpdateOutcome::ConditionFailed { current } => { /* re-read and re-evaluate */ }
//!     }
//!     Ok(())
//! }
//! ```

pub mod layout;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::{Result, StorageError};

// ═══════════════════════════════════════════════════════════════════════════
// Domain Models
// ═══════════════════════════════════════════════════════════════════════════

/// Persisted job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Ready,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Ready => "READY",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "READY" => Ok(JobStatus::Ready),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            _ => Err(StorageError::serialization(format!(
                "Invalid job status: {}",
                s
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether `next` is a forward move from `self`.
    ///
    /// `PENDING → PENDING` is allowed (bookkeeping writes such as discovery
    /// misses); terminal states allow nothing.
    pub fn allows(&self, next: JobStatus) -> bool {
        match self {
            JobStatus::Pending => matches!(
                next,
                JobStatus::Pending | JobStatus::Ready | JobStatus::Failed
            ),
            JobStatus::Ready => matches!(next, JobStatus::Completed | JobStatus::Failed),
            JobStatus::Completed | JobStatus::Failed => false,
        }
    }

    /// Non-terminal states the scheduler keeps reconciling
    pub fn active() -> &'static [JobStatus] {
        &[JobStatus::Pending, JobStatus::Ready]
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Speech synthesis mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceMode {
    /// Stock neural voice
    #[default]
    Standard,
    /// Owner's cloned voice (requires uploaded voice samples)
    Cloned,
}

impl VoiceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceMode::Standard => "standard",
            VoiceMode::Cloned => "cloned",
        }
    }

    /// Parse a caller-supplied mode. `polly` is accepted as a legacy alias
    /// for `standard`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "standard" | "polly" => Some(VoiceMode::Standard),
            "cloned" => Some(VoiceMode::Cloned),
            _ => None,
        }
    }
}

impl fmt::Display for VoiceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Presenter gesture style requested from the video backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GestureMode {
    #[default]
    Subtle,
    Expressive,
}

impl GestureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GestureMode::Subtle => "subtle",
            GestureMode::Expressive => "expressive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "subtle" => Some(GestureMode::Subtle),
            "expressive" => Some(GestureMode::Expressive),
            _ => None,
        }
    }
}

impl fmt::Display for GestureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Machine-readable failure cause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Video backend explicitly reported failure
    GenerationFailed,
    /// Backend reported success but no matching artifact appeared
    DiscoveryFailed,
    /// Audio/video combination failed
    MergeFailed,
    /// Metadata record vanished while the job was being reconciled
    JobNotFound,
    /// Abandoned by the scheduler's timeout budget
    Timeout,
    /// Unexpected fault during a reconciliation cycle
    Internal,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::GenerationFailed => "generation_failed",
            FailureReason::DiscoveryFailed => "discovery_failed",
            FailureReason::MergeFailed => "merge_failed",
            FailureReason::JobNotFound => "job_not_found",
            FailureReason::Timeout => "timeout",
            FailureReason::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure diagnostic, set only on transition into `FAILED`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub reason: FailureReason,
    pub detail: String,
}

impl Failure {
    pub fn new(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

/// Opaque artifact store key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactKey(String);

impl ArtifactKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArtifactKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Opaque token identifying a dispatched video-generation operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationHandle(String);

impl OperationHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Video parameters the backend was actually configured with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSpec {
    pub duration_secs: u32,
    pub fps: u32,
    pub dimension: String,
}

/// Validated caller inputs recorded on the job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInputs {
    pub owner_id: String,
    pub image_ref: ArtifactKey,
    pub voice_mode: VoiceMode,
    pub gesture_mode: GestureMode,
    pub requested_duration_secs: u32,
}

/// Job record
///
/// `audio_artifact` and `operation_handle` are write-once; `raw_video_artifact`
/// and `final_artifact` are set at most once and never cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub inputs: JobInputs,
    pub video_spec: VideoSpec,
    pub audio_artifact: ArtifactKey,
    pub operation_handle: OperationHandle,
    pub raw_video_artifact: Option<ArtifactKey>,
    pub final_artifact: Option<ArtifactKey>,
    /// Completed polls whose listing had objects but none with the media suffix
    #[serde(default)]
    pub discovery_misses: u32,
    pub failure: Option<Failure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new job in `PENDING`
    pub fn new_pending(
        id: Uuid,
        inputs: JobInputs,
        video_spec: VideoSpec,
        audio_artifact: ArtifactKey,
        operation_handle: OperationHandle,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: JobStatus::Pending,
            inputs,
            video_spec,
            audio_artifact,
            operation_handle,
            raw_video_artifact: None,
            final_artifact: None,
            discovery_misses: 0,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.inputs.owner_id
    }

    /// Check the record-level invariants. Returns a description of the first
    /// violation.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let completed = self.status == JobStatus::Completed;
        if completed != self.final_artifact.is_some() {
            return Err(format!(
                "final artifact present={} but status={}",
                self.final_artifact.is_some(),
                self.status
            ));
        }
        if (self.status == JobStatus::Failed) != self.failure.is_some() {
            return Err(format!(
                "failure present={} but status={}",
                self.failure.is_some(),
                self.status
            ));
        }
        if matches!(self.status, JobStatus::Ready | JobStatus::Completed)
            && self.raw_video_artifact.is_none()
        {
            return Err(format!("status={} without raw video artifact", self.status));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Port Traits
// ═══════════════════════════════════════════════════════════════════════════

/// Result of a conditional update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Precondition held, record replaced
    Updated,
    /// Persisted status differed from the expected one; nothing written
    ConditionFailed { current: JobStatus },
}

/// Metadata store: single source of truth for job state
///
/// All transitions go through [`JobStore::update_job`], which replaces the
/// record only if the persisted status still equals `expected`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Fetch a job record, `None` if it does not exist
    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Unconditional write, used at creation
    async fn put_job(&self, job: &Job) -> Result<()>;

    /// Replace the record for `job.id` iff its persisted status is `expected`.
    ///
    /// # Errors
    ///
    /// `ErrorKind::NotFound` if no record exists.
    async fn update_job(&self, expected: JobStatus, job: &Job) -> Result<UpdateOutcome>;

    /// All jobs currently in one of `statuses`, oldest first
    async fn list_jobs_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>>;
}

/// Artifact store: immutable binary objects under caller-chosen prefixes
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &ArtifactKey, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    /// # Errors
    ///
    /// `ErrorKind::NotFound` if the object does not exist.
    async fn get(&self, key: &ArtifactKey) -> Result<Vec<u8>>;

    /// Keys under `prefix`, in lexicographic order
    async fn list(&self, prefix: &str) -> Result<Vec<ArtifactKey>>;

    /// Time-limited retrieval URL for `key`
    async fn presign(&self, key: &ArtifactKey, ttl: Duration) -> Result<String>;

    /// Location string an external writer should target for `prefix`
    fn location_uri(&self, prefix: &str) -> String {
        prefix.to_string()
    }

    /// Inverse of [`ObjectStore::location_uri`]: the listable prefix behind a
    /// location reported by an external writer, `None` if it lies outside
    /// this store.
    fn prefix_from_location(&self, location: &str) -> Option<String> {
        Some(location.to_string())
    }
}
