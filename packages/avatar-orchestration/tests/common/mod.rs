//! Shared fakes for orchestration integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use avatar_orchestration::{
    Collaborators, CreateJobRequest, DispatchReceipt, JobOrchestrator, MergeEngine, MergeError,
    OperationStatus, OrchestratorConfig, SpeechSynthesizer, SynthesisError, VideoCapabilities,
    VideoClientError, VideoGenerator, VideoRequest,
};
use avatar_storage::{
    layout, ArtifactKey, InMemoryJobStore, InMemoryObjectStore, Job, JobStore, ObjectStore,
    OperationHandle, VideoSpec, VoiceMode,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Barrier;
use uuid::Uuid;

pub const IMAGE_KEY: &str = "uploads/u1/avatar.png";

// ═══════════════════════════════════════════════════════════════════════════
// Speech
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct FakeSpeech {
    pub calls: AtomicUsize,
}

impl FakeSpeech {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSpeech {
    async fn synthesize(
        &self,
        text: &str,
        voice_mode: VoiceMode,
        _owner_id: &str,
    ) -> Result<Vec<u8>, SynthesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text == "reject me" {
            return Err(SynthesisError::Rejected("unsupported text".to_string()));
        }
        Ok(format!("ID3:{}:{}", voice_mode, text).into_bytes())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Video
// ═══════════════════════════════════════════════════════════════════════════

/// Video backend whose per-operation status is set by the test.
/// Operations start `InProgress`.
#[derive(Default)]
pub struct ScriptedVideo {
    statuses: Mutex<HashMap<String, OperationStatus>>,
    requests: Mutex<Vec<VideoRequest>>,
    pub echo: Mutex<Option<VideoSpec>>,
    pub polls: AtomicUsize,
}

impl ScriptedVideo {
    pub fn set_status(&self, handle: &OperationHandle, status: OperationStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(handle.as_str().to_string(), status);
    }

    pub fn dispatched(&self) -> Vec<VideoRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoGenerator for ScriptedVideo {
    async fn dispatch(&self, request: &VideoRequest) -> Result<DispatchReceipt, VideoClientError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(DispatchReceipt {
            handle: OperationHandle::new(format!("arn:async-invoke/{}", request.job_id)),
            configured: self.echo.lock().unwrap().clone(),
        })
    }

    async fn poll_status(&self, handle: &OperationHandle) -> OperationStatus {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .unwrap()
            .get(handle.as_str())
            .cloned()
            .unwrap_or(OperationStatus::InProgress)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Merge
// ═══════════════════════════════════════════════════════════════════════════

/// Deterministic merger that counts invocations. With a barrier installed,
/// every merge waits until the expected number of merges are in flight.
/// With a delegate installed, the merge itself is handed to that engine.
#[derive(Default)]
pub struct CountingMerger {
    pub merges: AtomicUsize,
    pub barrier: Option<Arc<Barrier>>,
    pub fail: bool,
    pub delegate: Option<Arc<dyn MergeEngine>>,
}

impl CountingMerger {
    pub fn with_barrier(parties: usize) -> Self {
        Self {
            barrier: Some(Arc::new(Barrier::new(parties))),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn delegating(engine: impl MergeEngine + 'static) -> Self {
        Self {
            delegate: Some(Arc::new(engine)),
            ..Default::default()
        }
    }

    pub fn merges(&self) -> usize {
        self.merges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MergeEngine for CountingMerger {
    async fn merge(&self, video: Vec<u8>, audio: Vec<u8>) -> Result<Vec<u8>, MergeError> {
        self.merges.fetch_add(1, Ordering::SeqCst);
        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        if let Some(engine) = &self.delegate {
            return engine.merge(video, audio).await;
        }
        if self.fail {
            return Err(MergeError::Failed {
                status: "exit status: 1".to_string(),
                stderr: "Invalid data found when processing input".to_string(),
            });
        }
        let mut merged = b"MERGED:".to_vec();
        merged.extend(video);
        merged.extend(audio);
        Ok(merged)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Harness
// ═══════════════════════════════════════════════════════════════════════════

pub struct Harness {
    pub orchestrator: Arc<JobOrchestrator>,
    pub jobs: Arc<InMemoryJobStore>,
    pub artifacts: Arc<InMemoryObjectStore>,
    pub speech: Arc<FakeSpeech>,
    pub video: Arc<ScriptedVideo>,
    pub merger: Arc<CountingMerger>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(OrchestratorConfig::default(), CountingMerger::default()).await
    }

    pub async fn with_merger(merger: CountingMerger) -> Self {
        Self::build(OrchestratorConfig::default(), merger).await
    }

    pub async fn build(config: OrchestratorConfig, merger: CountingMerger) -> Self {
        let jobs = Arc::new(InMemoryJobStore::new());
        let artifacts = Arc::new(InMemoryObjectStore::new());
        let speech = Arc::new(FakeSpeech::default());
        let video = Arc::new(ScriptedVideo::default());
        let merger = Arc::new(merger);

        artifacts
            .put(&ArtifactKey::new(IMAGE_KEY), vec![0x89, b'P', b'N', b'G'], "image/png")
            .await
            .unwrap();

        let capabilities = VideoCapabilities {
            supported_durations: vec![6],
            fps: 24,
            dimension: "1280x720".to_string(),
        };

        let orchestrator = JobOrchestrator::new(
            Collaborators {
                jobs: jobs.clone(),
                artifacts: artifacts.clone(),
                speech: speech.clone(),
                video: video.clone(),
                merger: merger.clone(),
            },
            config,
            capabilities,
        );

        Self {
            orchestrator: Arc::new(orchestrator),
            jobs,
            artifacts,
            speech,
            video,
            merger,
        }
    }

    pub fn request() -> CreateJobRequest {
        CreateJobRequest {
            owner_id: "u1".to_string(),
            script: "hello".to_string(),
            image_ref: IMAGE_KEY.to_string(),
            voice_mode: Some("standard".to_string()),
            gesture_mode: None,
            duration_hint_secs: Some(18),
        }
    }

    pub async fn create(&self) -> Uuid {
        self.orchestrator.create_job(Self::request()).await.unwrap()
    }

    pub async fn job(&self, job_id: Uuid) -> Job {
        self.jobs.get_job(job_id).await.unwrap().unwrap()
    }

    pub async fn handle(&self, job_id: Uuid) -> OperationHandle {
        self.job(job_id).await.operation_handle
    }

    /// Mark the backend operation completed, pointing at the job's prefix
    pub async fn complete_operation(&self, job_id: Uuid) {
        let handle = self.handle(job_id).await;
        self.video.set_status(
            &handle,
            OperationStatus::Completed {
                output_location: Some(
                    self.artifacts
                        .location_uri(&layout::raw_video_prefix(job_id)),
                ),
            },
        );
    }

    pub async fn fail_operation(&self, job_id: Uuid, reason: &str) {
        let handle = self.handle(job_id).await;
        self.video.set_status(
            &handle,
            OperationStatus::Failed {
                reason: reason.to_string(),
            },
        );
    }

    /// Materialize an object under the job's raw video prefix
    pub async fn publish_raw(&self, job_id: Uuid, name: &str) -> ArtifactKey {
        let key = ArtifactKey::new(format!("{}{}", layout::raw_video_prefix(job_id), name));
        self.artifacts
            .put(&key, b"RAWVIDEO".to_vec(), "video/mp4")
            .await
            .unwrap();
        key
    }

    /// Create a job and drive it to `READY`
    pub async fn ready_job(&self) -> Uuid {
        let job_id = self.create().await;
        self.complete_operation(job_id).await;
        self.publish_raw(job_id, "inv-1/output.mp4").await;
        self.orchestrator.reconcile(job_id).await.unwrap();
        assert_eq!(
            self.job(job_id).await.status,
            avatar_storage::JobStatus::Ready
        );
        job_id
    }
}
