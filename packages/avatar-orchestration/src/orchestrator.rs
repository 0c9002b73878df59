use avatar_storage::{
    layout, Failure, FailureReason, GestureMode, Job, JobInputs, JobStatus, JobStore,
    ObjectStore, UpdateOutcome, VoiceMode,
};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clients::{
    build_prompt, ImagePayload, OperationStatus, SpeechSynthesizer, VideoCapabilities,
    VideoGenerator, VideoRequest,
};
use crate::config::OrchestratorConfig;
use crate::discovery::{self, Discovery};
use crate::error::{OrchestratorError, Result};
use crate::finalize::{Finalization, Finalizer};
use crate::job::{JobStateMachine, JobView};
use crate::merge::MergeEngine;
use crate::metrics::OrchestratorMetrics;

/// Externally owned collaborators, injected at construction
#[derive(Clone)]
pub struct Collaborators {
    pub jobs: Arc<dyn JobStore>,
    pub artifacts: Arc<dyn ObjectStore>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub video: Arc<dyn VideoGenerator>,
    pub merger: Arc<dyn MergeEngine>,
}

/// Notified after a job is persisted so the polling driver can pick it up
pub trait ReconcileTrigger: Send + Sync {
    fn job_created(&self, job_id: Uuid);
}

/// Caller input for `create_job`. Modes are raw strings and are validated.
#[derive(Debug, Clone, Default)]
pub struct CreateJobRequest {
    pub owner_id: String,
    pub script: String,
    pub image_ref: String,
    pub voice_mode: Option<String>,
    pub gesture_mode: Option<String>,
    pub duration_hint_secs: Option<u32>,
}

/// Outcome of advancing a job by one step
enum Cycle {
    /// Nothing more to do this cycle; the record as persisted
    Settled(Job),
    /// A conditional update lost; re-read and re-evaluate
    Conflict {
        expected: JobStatus,
        current: JobStatus,
    },
}

/// Job orchestrator: create, reconcile, status
pub struct JobOrchestrator {
    jobs: Arc<dyn JobStore>,
    artifacts: Arc<dyn ObjectStore>,
    speech: Arc<dyn SpeechSynthesizer>,
    video: Arc<dyn VideoGenerator>,
    merger: Arc<dyn MergeEngine>,
    config: OrchestratorConfig,
    capabilities: VideoCapabilities,
    trigger: Option<Arc<dyn ReconcileTrigger>>,
    metrics: OrchestratorMetrics,
}

impl JobOrchestrator {
    pub fn new(
        collaborators: Collaborators,
        config: OrchestratorConfig,
        capabilities: VideoCapabilities,
    ) -> Self {
        Self {
            jobs: collaborators.jobs,
            artifacts: collaborators.artifacts,
            speech: collaborators.speech,
            video: collaborators.video,
            merger: collaborators.merger,
            config,
            capabilities,
            trigger: None,
            metrics: OrchestratorMetrics::disabled(),
        }
    }

    pub fn with_trigger(mut self, trigger: Arc<dyn ReconcileTrigger>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn with_metrics(mut self, metrics: OrchestratorMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Non-terminal jobs, oldest first
    pub async fn active_jobs(&self) -> Result<Vec<Job>> {
        Ok(self.jobs.list_jobs_by_status(JobStatus::active()).await?)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // createJob
    // ═══════════════════════════════════════════════════════════════════════

    fn validate(&self, request: &CreateJobRequest) -> Result<(JobInputs, String)> {
        let owner_id = request.owner_id.trim();
        if owner_id.is_empty() {
            return Err(OrchestratorError::validation("ownerId is required"));
        }
        let script = request.script.trim();
        if script.is_empty() {
            return Err(OrchestratorError::validation("script must not be empty"));
        }
        let image_ref = request.image_ref.trim();
        if image_ref.is_empty() {
            return Err(OrchestratorError::validation("imageRef is required"));
        }

        let voice_mode = match request.voice_mode.as_deref() {
            None => VoiceMode::default(),
            Some(mode) => VoiceMode::parse(mode).ok_or_else(|| {
                OrchestratorError::validation(format!(
                    "voiceMode must be one of standard, cloned (got '{}')",
                    mode
                ))
            })?,
        };
        let gesture_mode = match request.gesture_mode.as_deref() {
            None => GestureMode::default(),
            Some(mode) => GestureMode::parse(mode).ok_or_else(|| {
                OrchestratorError::validation(format!(
                    "gestureMode must be one of subtle, expressive (got '{}')",
                    mode
                ))
            })?,
        };

        let duration = request
            .duration_hint_secs
            .unwrap_or(self.config.default_duration_secs);
        if !(self.config.min_duration_secs..=self.config.max_duration_secs).contains(&duration) {
            return Err(OrchestratorError::validation(format!(
                "durationHint {}s outside {}..={}s",
                duration, self.config.min_duration_secs, self.config.max_duration_secs
            )));
        }

        let inputs = JobInputs {
            owner_id: owner_id.to_string(),
            image_ref: image_ref.into(),
            voice_mode,
            gesture_mode,
            requested_duration_secs: duration,
        };
        Ok((inputs, script.to_string()))
    }

    /// Validate, synthesize audio, dispatch video generation and persist the
    /// job in `PENDING`. Returns without waiting for the video.
    pub async fn create_job(&self, request: CreateJobRequest) -> Result<Uuid> {
        let (inputs, script) = self.validate(&request)?;

        let image_bytes = match self.artifacts.get(&inputs.image_ref).await {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => {
                return Err(OrchestratorError::validation(format!(
                    "imageRef {} is empty",
                    inputs.image_ref
                )))
            }
            Err(e) if e.is_not_found() => {
                return Err(OrchestratorError::validation(format!(
                    "imageRef {} not found",
                    inputs.image_ref
                )))
            }
            Err(e) => return Err(e.into()),
        };

        let job_id = Uuid::new_v4();
        info!(
            "Creating job {} for owner {} (voice={}, gesture={}, duration={}s)",
            job_id,
            inputs.owner_id,
            inputs.voice_mode,
            inputs.gesture_mode,
            inputs.requested_duration_secs
        );

        let audio = self
            .speech
            .synthesize(&script, inputs.voice_mode, &inputs.owner_id)
            .await?;
        let audio_key = layout::audio_key(job_id);
        self.artifacts
            .put(&audio_key, audio, layout::AUDIO_CONTENT_TYPE)
            .await?;

        let requested_spec = self.capabilities.clamp(inputs.requested_duration_secs);
        if requested_spec.duration_secs != inputs.requested_duration_secs {
            info!(
                "Job {}: requested {}s clamped to {}s supported by the video backend",
                job_id, inputs.requested_duration_secs, requested_spec.duration_secs
            );
        }

        let request = VideoRequest {
            job_id,
            image: ImagePayload::new(inputs.image_ref.as_str(), image_bytes),
            prompt: build_prompt(inputs.gesture_mode),
            spec: requested_spec.clone(),
            output_location: self
                .artifacts
                .location_uri(&layout::raw_video_prefix(job_id)),
        };
        let receipt = self.video.dispatch(&request).await.map_err(|e| {
            if e.is_transient() {
                OrchestratorError::UpstreamUnavailable(e.to_string())
            } else {
                e.into()
            }
        })?;

        let video_spec = match receipt.configured {
            Some(configured) if configured != requested_spec => {
                warn!(
                    "Job {}: backend applied {:?} instead of requested {:?}",
                    job_id, configured, requested_spec
                );
                configured
            }
            Some(configured) => configured,
            None => requested_spec,
        };

        let job = Job::new_pending(job_id, inputs, video_spec, audio_key, receipt.handle);
        self.jobs.put_job(&job).await?;
        self.metrics.job_created();
        info!("Job {} PENDING, operation {}", job_id, job.operation_handle);

        if let Some(trigger) = &self.trigger {
            trigger.job_created(job_id);
        }
        Ok(job_id)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // reconcile
    // ═══════════════════════════════════════════════════════════════════════

    /// One reconciliation cycle. Safe to run concurrently and repeatedly for
    /// the same job.
    pub async fn reconcile(&self, job_id: Uuid) -> Result<JobView> {
        let mut conflicts = 0;
        loop {
            let job = match self.jobs.get_job(job_id).await? {
                Some(job) => job,
                None => {
                    warn!("Job {} not found during reconcile", job_id);
                    return Ok(JobView::not_found(job_id));
                }
            };

            let cycle = match self.advance(job).await {
                Ok(cycle) => cycle,
                Err(OrchestratorError::JobNotFound(_)) => {
                    warn!("Job {} vanished during reconcile", job_id);
                    return Ok(JobView::not_found(job_id));
                }
                Err(e) => return Err(e),
            };

            match cycle {
                Cycle::Settled(job) => {
                    self.metrics.reconcile_outcome(job.status);
                    return self.view(&job).await;
                }
                Cycle::Conflict { expected, current } => {
                    conflicts += 1;
                    debug!(
                        "Job {}: conditional update lost (expected {}, found {}), re-evaluating",
                        job_id, expected, current
                    );
                    if conflicts > self.config.condition_retries {
                        warn!(
                            "Job {}: {} conflicting updates, leaving it for the next cycle",
                            job_id, conflicts
                        );
                        return self.get_status(job_id).await;
                    }
                }
            }
        }
    }

    async fn advance(&self, job: Job) -> Result<Cycle> {
        match job.status {
            JobStatus::Completed | JobStatus::Failed => Ok(Cycle::Settled(job)),
            JobStatus::Pending => self.poll_pending(job).await,
            JobStatus::Ready => {
                let finalizer = Finalizer {
                    jobs: self.jobs.as_ref(),
                    artifacts: self.artifacts.as_ref(),
                    merger: self.merger.as_ref(),
                    metrics: &self.metrics,
                };
                match finalizer.finalize(job).await? {
                    Finalization::Committed(job) | Finalization::Superseded(job) => {
                        Ok(Cycle::Settled(job))
                    }
                    Finalization::Aborted { job, failure } => self.fail(job, failure).await,
                }
            }
        }
    }

    async fn poll_pending(&self, job: Job) -> Result<Cycle> {
        match self.video.poll_status(&job.operation_handle).await {
            OperationStatus::InProgress => {
                debug!("Job {}: operation still running", job.id);
                Ok(Cycle::Settled(job))
            }
            OperationStatus::Unavailable { detail } => {
                warn!("Job {}: status unavailable, retrying later: {}", job.id, detail);
                Ok(Cycle::Settled(job))
            }
            OperationStatus::Failed { reason } => {
                warn!("Job {}: video generation failed: {}", job.id, reason);
                self.fail(job, Failure::new(FailureReason::GenerationFailed, reason))
                    .await
            }
            OperationStatus::Completed { output_location } => {
                let prefix = discovery::resolve_prefix(
                    self.artifacts.as_ref(),
                    job.id,
                    output_location.as_deref(),
                );
                self.discover(job, &prefix).await
            }
        }
    }

    async fn discover(&self, job: Job, prefix: &str) -> Result<Cycle> {
        let found = match discovery::discover(
            self.artifacts.as_ref(),
            prefix,
            &self.config.media_suffix,
        )
        .await
        {
            Ok(found) => found,
            Err(e) => {
                warn!("Job {}: listing {} failed, retrying later: {}", job.id, prefix, e);
                return Ok(Cycle::Settled(job));
            }
        };

        match found {
            Discovery::NotYetVisible => {
                info!("Job {}: output under {} not visible yet", job.id, prefix);
                Ok(Cycle::Settled(job))
            }
            Discovery::Found(raw_video) => {
                let mut sm = JobStateMachine::new(job);
                sm.mark_ready(raw_video.clone())?;
                info!("Job {} READY, raw video {}", sm.job().id, raw_video);
                self.commit(JobStatus::Pending, sm.into_job()).await
            }
            Discovery::Unmatched { listed } => {
                let mut sm = JobStateMachine::new(job);
                let misses = sm.record_discovery_miss()?;
                if misses >= self.config.max_discovery_misses {
                    let detail = format!(
                        "{} objects under {} but none ending in {} after {} attempts",
                        listed, prefix, self.config.media_suffix, misses
                    );
                    warn!("Job {}: {}", sm.job().id, detail);
                    self.fail(
                        sm.into_job(),
                        Failure::new(FailureReason::DiscoveryFailed, detail),
                    )
                    .await
                } else {
                    info!(
                        "Job {}: {} objects under {} but no media yet (miss {}/{})",
                        sm.job().id,
                        listed,
                        prefix,
                        misses,
                        self.config.max_discovery_misses
                    );
                    self.commit(JobStatus::Pending, sm.into_job()).await
                }
            }
        }
    }

    async fn fail(&self, job: Job, failure: Failure) -> Result<Cycle> {
        let expected = job.status;
        let mut sm = JobStateMachine::new(job);
        sm.fail(failure)?;
        let job = sm.into_job();
        if let Some(failure) = &job.failure {
            warn!("Job {} FAILED ({}): {}", job.id, failure.reason, failure.detail);
        }
        self.commit(expected, job).await
    }

    /// Conditional write of `job`, expecting `expected` to be persisted
    async fn commit(&self, expected: JobStatus, job: Job) -> Result<Cycle> {
        let outcome = self
            .jobs
            .update_job(expected, &job)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    OrchestratorError::job_not_found(job.id)
                } else {
                    e.into()
                }
            })?;

        match outcome {
            UpdateOutcome::Updated => Ok(Cycle::Settled(job)),
            UpdateOutcome::ConditionFailed { current } => {
                Ok(Cycle::Conflict { expected, current })
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // getStatus / abandon
    // ═══════════════════════════════════════════════════════════════════════

    async fn view(&self, job: &Job) -> Result<JobView> {
        let view = JobView::from_job(job);
        match (&job.status, &job.final_artifact) {
            (JobStatus::Completed, Some(key)) => {
                let url = self.artifacts.presign(key, self.config.presign_ttl()).await?;
                Ok(view.with_download_url(url))
            }
            _ => Ok(view),
        }
    }

    /// Read-only view of the latest committed state
    pub async fn get_status(&self, job_id: Uuid) -> Result<JobView> {
        let job = self
            .jobs
            .get_job(job_id)
            .await?
            .ok_or_else(|| OrchestratorError::job_not_found(job_id))?;
        self.view(&job).await
    }

    /// Force a non-terminal job to `FAILED(timeout)`; terminal jobs are left
    /// untouched.
    ///
    /// # Errors
    ///
    /// `ConditionFailed` if every attempt lost a race with another writer.
    pub async fn abandon(&self, job_id: Uuid, detail: &str) -> Result<JobView> {
        let mut last_conflict = None;
        for _ in 0..=self.config.condition_retries {
            let job = self
                .jobs
                .get_job(job_id)
                .await?
                .ok_or_else(|| OrchestratorError::job_not_found(job_id))?;
            if job.status.is_terminal() {
                return self.view(&job).await;
            }

            match self
                .fail(job, Failure::new(FailureReason::Timeout, detail))
                .await?
            {
                Cycle::Settled(job) => {
                    self.metrics.reconcile_outcome(job.status);
                    return self.view(&job).await;
                }
                Cycle::Conflict { expected, current } => {
                    debug!(
                        "Job {}: abandon raced (expected {}, found {})",
                        job_id, expected, current
                    );
                    last_conflict = Some((expected, current));
                }
            }
        }

        match last_conflict {
            Some((expected, current)) => Err(OrchestratorError::ConditionFailed {
                job_id,
                expected,
                current,
            }),
            None => self.get_status(job_id).await,
        }
    }
}
