use avatar_storage::{ArtifactKey, Failure, FailureReason, Job, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};

/// Job state machine for transitions
///
/// Every transition checks [`JobStatus::allows`] and the write-once rules for
/// artifact references, and stamps `updated_at`. The caller persists the
/// result with a conditional update keyed on the status it started from.
pub struct JobStateMachine {
    job: Job,
}

impl JobStateMachine {
    pub fn new(job: Job) -> Self {
        Self { job }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn into_job(self) -> Job {
        self.job
    }

    fn ensure_allowed(&self, to: JobStatus) -> Result<()> {
        if self.job.status.allows(to) {
            Ok(())
        } else {
            Err(OrchestratorError::invalid_transition(self.job.status, to))
        }
    }

    /// Transition: PENDING → READY
    pub fn mark_ready(&mut self, raw_video: ArtifactKey) -> Result<()> {
        self.ensure_allowed(JobStatus::Ready)?;
        if let Some(existing) = &self.job.raw_video_artifact {
            if *existing != raw_video {
                return Err(OrchestratorError::InvalidStateTransition {
                    from: format!("raw video {}", existing),
                    to: format!("raw video {}", raw_video),
                });
            }
        }
        self.job.status = JobStatus::Ready;
        self.job.raw_video_artifact = Some(raw_video);
        self.job.updated_at = Utc::now();
        Ok(())
    }

    /// Transition: PENDING → PENDING, counting a listing with no media object.
    /// Returns the new miss count.
    pub fn record_discovery_miss(&mut self) -> Result<u32> {
        if self.job.status != JobStatus::Pending {
            return Err(OrchestratorError::invalid_transition(
                self.job.status,
                JobStatus::Pending,
            ));
        }
        self.job.discovery_misses = self.job.discovery_misses.saturating_add(1);
        self.job.updated_at = Utc::now();
        Ok(self.job.discovery_misses)
    }

    /// Transition: READY → COMPLETED
    pub fn complete(&mut self, final_artifact: ArtifactKey) -> Result<()> {
        self.ensure_allowed(JobStatus::Completed)?;
        if self.job.final_artifact.is_some() {
            return Err(OrchestratorError::invalid_transition(
                self.job.status,
                JobStatus::Completed,
            ));
        }
        self.job.status = JobStatus::Completed;
        self.job.final_artifact = Some(final_artifact);
        self.job.updated_at = Utc::now();
        Ok(())
    }

    /// Transition: PENDING/READY → FAILED
    pub fn fail(&mut self, failure: Failure) -> Result<()> {
        self.ensure_allowed(JobStatus::Failed)?;
        self.job.status = JobStatus::Failed;
        self.job.failure = Some(failure);
        self.job.updated_at = Utc::now();
        Ok(())
    }
}

/// Caller-facing job phase. `READY` is an internal resumption point and is
/// reported as `PENDING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPhase {
    Pending,
    Completed,
    Failed,
}

impl JobPhase {
    pub fn from_status(status: JobStatus) -> Self {
        match status {
            JobStatus::Pending | JobStatus::Ready => JobPhase::Pending,
            JobStatus::Completed => JobPhase::Completed,
            JobStatus::Failed => JobPhase::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Pending => "PENDING",
            JobPhase::Completed => "COMPLETED",
            JobPhase::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Read model returned by `get_status` and `reconcile`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub job_id: Uuid,
    pub state: JobPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_artifact: Option<ArtifactKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
    pub created_at: DateTime<Utc>,
}

impl JobView {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            state: JobPhase::from_status(job.status),
            final_artifact: job.final_artifact.clone(),
            download_url: None,
            failure: job.failure.clone(),
            created_at: job.created_at,
        }
    }

    pub fn with_download_url(mut self, url: String) -> Self {
        self.download_url = Some(url);
        self
    }

    /// View for a record that vanished during reconciliation
    pub fn not_found(job_id: Uuid) -> Self {
        Self {
            job_id,
            state: JobPhase::Failed,
            final_artifact: None,
            download_url: None,
            failure: Some(Failure::new(
                FailureReason::JobNotFound,
                "job record missing from metadata store",
            )),
            created_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state != JobPhase::Pending
    }
}
