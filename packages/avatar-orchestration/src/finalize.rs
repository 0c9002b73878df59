//! Merge finalization
//!
//! Turns a `READY` job into `COMPLETED` with at most one committed final
//! artifact. The record is re-read right before merging and again right
//! before committing; a cycle that finds the job already finalized discards
//! its own work and reports the persisted record instead. The final key is
//! derived from the job id, so overlapping uploads land on the same object.

use avatar_storage::{
    layout, ArtifactKey, Failure, FailureReason, Job, JobStatus, JobStore, ObjectStore,
    StorageError, UpdateOutcome,
};
use tracing::{info, warn};

use crate::error::{OrchestratorError, Result};
use crate::job::JobStateMachine;
use crate::merge::MergeEngine;
use crate::metrics::OrchestratorMetrics;

/// What one finalization attempt did
#[derive(Debug)]
pub enum Finalization {
    /// This cycle committed `COMPLETED`
    Committed(Job),
    /// Another cycle moved the job on; the persisted record is returned
    Superseded(Job),
    /// Finalization cannot succeed; the job should fail with this cause
    Aborted { job: Job, failure: Failure },
}

pub struct Finalizer<'a> {
    pub jobs: &'a dyn JobStore,
    pub artifacts: &'a dyn ObjectStore,
    pub merger: &'a dyn MergeEngine,
    pub metrics: &'a OrchestratorMetrics,
}

impl<'a> Finalizer<'a> {
    /// Latest persisted record if it is no longer finalizable by this cycle
    async fn superseded(&self, job: &Job) -> Result<Option<Job>> {
        let current = self
            .jobs
            .get_job(job.id)
            .await?
            .ok_or_else(|| OrchestratorError::job_not_found(job.id))?;

        if current.status != JobStatus::Ready || current.final_artifact.is_some() {
            Ok(Some(current))
        } else {
            Ok(None)
        }
    }

    async fn fetch(&self, job: &Job, key: &ArtifactKey) -> std::result::Result<Vec<u8>, Failure> {
        self.artifacts
            .get(key)
            .await
            .map_err(|e| artifact_failure(job, key, e))
    }

    pub async fn finalize(&self, job: Job) -> Result<Finalization> {
        // Check before merging
        if let Some(current) = self.superseded(&job).await? {
            info!("Job {} already {}, skipping merge", current.id, current.status);
            return Ok(Finalization::Superseded(current));
        }

        let raw_video = match &job.raw_video_artifact {
            Some(key) => key.clone(),
            None => {
                let failure = Failure::new(
                    FailureReason::Internal,
                    "READY job has no raw video artifact",
                );
                return Ok(Finalization::Aborted { job, failure });
            }
        };

        let video = match self.fetch(&job, &raw_video).await {
            Ok(bytes) => bytes,
            Err(failure) => return Ok(Finalization::Aborted { job, failure }),
        };
        let audio = match self.fetch(&job, &job.audio_artifact).await {
            Ok(bytes) => bytes,
            Err(failure) => return Ok(Finalization::Aborted { job, failure }),
        };

        info!("Job {}: merging {} with {}", job.id, raw_video, job.audio_artifact);
        let merged = match self.merger.merge(video, audio).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Job {}: merge failed: {}", job.id, e);
                let reason = if e.is_input_error() {
                    FailureReason::MergeFailed
                } else {
                    FailureReason::Internal
                };
                let failure = Failure::new(reason, e.to_string());
                return Ok(Finalization::Aborted { job, failure });
            }
        };
        self.metrics.merge_executed();

        let final_key = layout::final_key(job.id);
        if let Err(e) = self
            .artifacts
            .put(&final_key, merged, layout::VIDEO_CONTENT_TYPE)
            .await
        {
            let failure = Failure::new(
                FailureReason::Internal,
                format!("upload of {} failed: {}", final_key, e),
            );
            return Ok(Finalization::Aborted { job, failure });
        }

        // Check before committing
        if let Some(current) = self.superseded(&job).await? {
            info!("Job {} finalized by another cycle, discarding this merge", job.id);
            self.metrics.finalization_discarded();
            return Ok(Finalization::Superseded(current));
        }

        let mut sm = JobStateMachine::new(job);
        sm.complete(final_key)?;
        let completed = sm.into_job();

        match self.jobs.update_job(JobStatus::Ready, &completed).await? {
            UpdateOutcome::Updated => {
                info!(
                    "Job {} COMPLETED with final artifact {}",
                    completed.id,
                    layout::final_key(completed.id)
                );
                Ok(Finalization::Committed(completed))
            }
            UpdateOutcome::ConditionFailed { current } => {
                info!(
                    "Job {} moved to {} before commit, discarding this merge",
                    completed.id, current
                );
                self.metrics.finalization_discarded();
                let latest = self
                    .jobs
                    .get_job(completed.id)
                    .await?
                    .ok_or_else(|| OrchestratorError::job_not_found(completed.id))?;
                Ok(Finalization::Superseded(latest))
            }
        }
    }
}

fn artifact_failure(job: &Job, key: &ArtifactKey, e: StorageError) -> Failure {
    warn!("Job {}: cannot read {}: {}", job.id, key, e);
    let reason = if e.is_not_found() {
        FailureReason::MergeFailed
    } else {
        FailureReason::Internal
    };
    Failure::new(reason, format!("cannot read {}: {}", key, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::MergeError;
    use async_trait::async_trait;
    use avatar_storage::{
        GestureMode, InMemoryJobStore, InMemoryObjectStore, JobInputs, OperationHandle, VideoSpec,
        VoiceMode,
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use uuid::Uuid;

    /// Job store where another cycle commits `COMPLETED` after the
    /// pre-commit re-read but before this cycle's conditional update
    struct RacingJobStore {
        inner: InMemoryJobStore,
        raced: AtomicBool,
    }

    #[async_trait]
    impl JobStore for RacingJobStore {
        async fn get_job(&self, job_id: Uuid) -> avatar_storage::Result<Option<Job>> {
            self.inner.get_job(job_id).await
        }

        async fn put_job(&self, job: &Job) -> avatar_storage::Result<()> {
            self.inner.put_job(job).await
        }

        async fn update_job(
            &self,
            expected: JobStatus,
            job: &Job,
        ) -> avatar_storage::Result<UpdateOutcome> {
            if expected == JobStatus::Ready && !self.raced.swap(true, Ordering::SeqCst) {
                let mut winner = job.clone();
                winner.status = JobStatus::Completed;
                winner.final_artifact = Some(layout::final_key(job.id));
                self.inner.update_job(JobStatus::Ready, &winner).await?;
            }
            self.inner.update_job(expected, job).await
        }

        async fn list_jobs_by_status(
            &self,
            statuses: &[JobStatus],
        ) -> avatar_storage::Result<Vec<Job>> {
            self.inner.list_jobs_by_status(statuses).await
        }
    }

    struct ConcatMerger;

    #[async_trait]
    impl MergeEngine for ConcatMerger {
        async fn merge(
            &self,
            mut video: Vec<u8>,
            audio: Vec<u8>,
        ) -> std::result::Result<Vec<u8>, MergeError> {
            video.extend(audio);
            Ok(video)
        }
    }

    async fn ready_job(jobs: &dyn JobStore, artifacts: &dyn ObjectStore) -> Job {
        let id = Uuid::new_v4();
        let mut job = Job::new_pending(
            id,
            JobInputs {
                owner_id: "u1".to_string(),
                image_ref: ArtifactKey::new("uploads/u1/a.png"),
                voice_mode: VoiceMode::Standard,
                gesture_mode: GestureMode::Subtle,
                requested_duration_secs: 18,
            },
            VideoSpec {
                duration_secs: 6,
                fps: 24,
                dimension: "1280x720".to_string(),
            },
            layout::audio_key(id),
            OperationHandle::new("op-1"),
        );
        let raw = ArtifactKey::new(format!("{}output.mp4", layout::raw_video_prefix(id)));
        artifacts.put(&raw, b"VIDEO".to_vec(), "video/mp4").await.unwrap();
        artifacts
            .put(&job.audio_artifact, b"AUDIO".to_vec(), layout::AUDIO_CONTENT_TYPE)
            .await
            .unwrap();

        job.status = JobStatus::Ready;
        job.raw_video_artifact = Some(raw);
        jobs.put_job(&job).await.unwrap();
        job
    }

    #[tokio::test]
    async fn test_commit_lost_after_reread_is_superseded() {
        let jobs = RacingJobStore {
            inner: InMemoryJobStore::new(),
            raced: AtomicBool::new(false),
        };
        let artifacts = InMemoryObjectStore::new();
        let metrics = OrchestratorMetrics::disabled();
        let job = ready_job(&jobs, &artifacts).await;
        let id = job.id;

        let finalizer = Finalizer {
            jobs: &jobs,
            artifacts: &artifacts,
            merger: &ConcatMerger,
            metrics: &metrics,
        };

        match finalizer.finalize(job).await.unwrap() {
            Finalization::Superseded(latest) => {
                assert_eq!(latest.status, JobStatus::Completed);
                assert_eq!(latest.final_artifact, Some(layout::final_key(id)));
            }
            other => panic!("Expected Superseded, got {:?}", other),
        }

        let stored = jobs.get_job(id).await.unwrap().unwrap();
        assert_eq!(stored.final_artifact, Some(layout::final_key(id)));
        assert!(stored.check_invariants().is_ok());
        assert!(artifacts.contains(&layout::final_key(id)));
    }

    #[tokio::test]
    async fn test_finalize_commits_once() {
        let jobs = InMemoryJobStore::new();
        let artifacts = InMemoryObjectStore::new();
        let metrics = OrchestratorMetrics::disabled();
        let job = ready_job(&jobs, &artifacts).await;
        let id = job.id;

        let finalizer = Finalizer {
            jobs: &jobs,
            artifacts: &artifacts,
            merger: &ConcatMerger,
            metrics: &metrics,
        };

        assert!(matches!(
            finalizer.finalize(job.clone()).await.unwrap(),
            Finalization::Committed(_)
        ));
        assert_eq!(
            artifacts.get(&layout::final_key(id)).await.unwrap(),
            b"VIDEOAUDIO".to_vec()
        );

        // A stale copy of the READY record is discarded on re-read
        assert!(matches!(
            finalizer.finalize(job).await.unwrap(),
            Finalization::Superseded(_)
        ));
    }
}
