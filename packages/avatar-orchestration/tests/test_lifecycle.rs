//! End-to-end job lifecycle through create / reconcile / status

mod common;

use avatar_orchestration::{
    FfmpegMerger, JobPhase, OperationStatus, OrchestratorConfig, OrchestratorError,
};
use avatar_storage::{layout, FailureReason, JobStatus, JobStore, ObjectStore, VideoSpec};
use common::{CountingMerger, Harness};

#[tokio::test]
async fn test_create_returns_pending_job() {
    let h = Harness::new().await;
    let job_id = h.create().await;

    assert_eq!(h.speech.calls(), 1);
    let view = h.orchestrator.get_status(job_id).await.unwrap();
    assert_eq!(view.state, JobPhase::Pending);
    assert!(view.final_artifact.is_none());
    assert!(view.download_url.is_none());

    let job = h.job(job_id).await;
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.audio_artifact, layout::audio_key(job_id));
    assert!(h.artifacts.contains(&job.audio_artifact));
    assert_eq!(
        h.artifacts.content_type(&job.audio_artifact).as_deref(),
        Some(layout::AUDIO_CONTENT_TYPE)
    );
    assert!(job.check_invariants().is_ok());

    let dispatched = h.video.dispatched();
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].spec.duration_secs, 6);
    assert_eq!(dispatched[0].output_location, layout::raw_video_prefix(job_id));
    assert!(dispatched[0].prompt.contains("minimal movement"));
}

#[tokio::test]
async fn test_backend_echo_wins_over_requested_spec() {
    let h = Harness::new().await;
    let echoed = VideoSpec {
        duration_secs: 6,
        fps: 12,
        dimension: "960x540".to_string(),
    };
    *h.video.echo.lock().unwrap() = Some(echoed.clone());

    let job_id = h.create().await;
    let job = h.job(job_id).await;
    assert_eq!(job.video_spec, echoed);
    assert_eq!(job.inputs.requested_duration_secs, 18);
}

#[tokio::test]
async fn test_synthesis_failure_persists_nothing() {
    let h = Harness::new().await;
    let result = h
        .orchestrator
        .create_job(avatar_orchestration::CreateJobRequest {
            script: "reject me".to_string(),
            ..Harness::request()
        })
        .await;

    assert!(matches!(result, Err(OrchestratorError::Synthesis(_))));
    assert!(h.jobs.is_empty());
    assert!(h.video.dispatched().is_empty());
}

#[tokio::test]
async fn test_never_completing_job_stays_pending() {
    let h = Harness::new().await;
    let job_id = h.create().await;

    for _ in 0..25 {
        let view = h.orchestrator.reconcile(job_id).await.unwrap();
        assert_eq!(view.state, JobPhase::Pending);
    }
    assert_eq!(h.video.polls(), 25);
    assert_eq!(h.job(job_id).await.status, JobStatus::Pending);
}

#[tokio::test]
async fn test_unavailable_backend_is_not_a_failure() {
    let h = Harness::new().await;
    let job_id = h.create().await;
    let handle = h.handle(job_id).await;
    h.video.set_status(
        &handle,
        OperationStatus::Unavailable {
            detail: "connection reset".to_string(),
        },
    );

    let view = h.orchestrator.reconcile(job_id).await.unwrap();
    assert_eq!(view.state, JobPhase::Pending);
    assert!(view.failure.is_none());
}

#[tokio::test]
async fn test_completed_with_empty_listing_stays_pending() {
    let h = Harness::new().await;
    let job_id = h.create().await;
    h.complete_operation(job_id).await;

    let view = h.orchestrator.reconcile(job_id).await.unwrap();
    assert_eq!(view.state, JobPhase::Pending);

    let job = h.job(job_id).await;
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.raw_video_artifact.is_none());
    assert_eq!(job.discovery_misses, 0);
}

#[tokio::test]
async fn test_ready_then_completed_with_download_url() {
    let h = Harness::new().await;
    let job_id = h.create().await;
    h.complete_operation(job_id).await;
    let raw = h.publish_raw(job_id, "inv-1/output.mp4").await;

    // First cycle discovers the raw video
    let view = h.orchestrator.reconcile(job_id).await.unwrap();
    assert_eq!(view.state, JobPhase::Pending);
    let job = h.job(job_id).await;
    assert_eq!(job.status, JobStatus::Ready);
    assert_eq!(job.raw_video_artifact, Some(raw));
    assert_eq!(h.merger.merges(), 0);

    // Second cycle merges and completes
    let view = h.orchestrator.reconcile(job_id).await.unwrap();
    assert_eq!(view.state, JobPhase::Completed);
    assert_eq!(view.final_artifact, Some(layout::final_key(job_id)));
    assert_eq!(h.merger.merges(), 1);

    let status = h.orchestrator.get_status(job_id).await.unwrap();
    let url = status.download_url.expect("download url for completed job");
    assert!(url.contains(layout::final_key(job_id).as_str()));

    let merged = h.artifacts.get(&layout::final_key(job_id)).await.unwrap();
    assert!(merged.starts_with(b"MERGED:RAWVIDEO"));
    assert_eq!(
        h.artifacts.content_type(&layout::final_key(job_id)).as_deref(),
        Some(layout::VIDEO_CONTENT_TYPE)
    );
    assert!(h.job(job_id).await.check_invariants().is_ok());
}

#[tokio::test]
async fn test_duplicate_reconcile_merges_once() {
    let h = Harness::new().await;
    let job_id = h.ready_job().await;

    let first = h.orchestrator.reconcile(job_id).await.unwrap();
    let second = h.orchestrator.reconcile(job_id).await.unwrap();

    assert_eq!(first.state, JobPhase::Completed);
    assert_eq!(second.state, JobPhase::Completed);
    assert_eq!(first.final_artifact, second.final_artifact);
    assert_eq!(h.merger.merges(), 1);
}

#[tokio::test]
async fn test_generation_failure_is_absorbing() {
    let h = Harness::new().await;
    let job_id = h.create().await;
    h.fail_operation(job_id, "ValidationException: image too small")
        .await;

    for _ in 0..3 {
        let view = h.orchestrator.reconcile(job_id).await.unwrap();
        assert_eq!(view.state, JobPhase::Failed);
        let failure = view.failure.unwrap();
        assert_eq!(failure.reason, FailureReason::GenerationFailed);
        assert!(failure.detail.contains("image too small"));
    }

    // Even if the backend later claims success, the job stays failed
    h.complete_operation(job_id).await;
    h.publish_raw(job_id, "output.mp4").await;
    let view = h.orchestrator.reconcile(job_id).await.unwrap();
    assert_eq!(view.state, JobPhase::Failed);
    assert_eq!(h.merger.merges(), 0);
}

#[tokio::test]
async fn test_unmatched_listing_fails_after_bound() {
    let config = OrchestratorConfig {
        max_discovery_misses: 3,
        ..Default::default()
    };
    let h = Harness::build(config, CountingMerger::default()).await;
    let job_id = h.create().await;
    h.complete_operation(job_id).await;
    h.publish_raw(job_id, "manifest.json").await;

    for expected_misses in 1..3 {
        let view = h.orchestrator.reconcile(job_id).await.unwrap();
        assert_eq!(view.state, JobPhase::Pending);
        assert_eq!(h.job(job_id).await.discovery_misses, expected_misses);
    }

    let view = h.orchestrator.reconcile(job_id).await.unwrap();
    assert_eq!(view.state, JobPhase::Failed);
    assert_eq!(view.failure.unwrap().reason, FailureReason::DiscoveryFailed);
}

#[tokio::test]
async fn test_late_media_after_misses_still_discovered() {
    let h = Harness::new().await;
    let job_id = h.create().await;
    h.complete_operation(job_id).await;
    h.publish_raw(job_id, "manifest.json").await;

    h.orchestrator.reconcile(job_id).await.unwrap();
    assert_eq!(h.job(job_id).await.discovery_misses, 1);

    h.publish_raw(job_id, "output.mp4").await;
    h.orchestrator.reconcile(job_id).await.unwrap();
    assert_eq!(h.job(job_id).await.status, JobStatus::Ready);
}

#[tokio::test]
async fn test_merge_failure_fails_job() {
    let h = Harness::with_merger(CountingMerger::failing()).await;
    let job_id = h.ready_job().await;

    let view = h.orchestrator.reconcile(job_id).await.unwrap();
    assert_eq!(view.state, JobPhase::Failed);
    assert_eq!(view.failure.unwrap().reason, FailureReason::MergeFailed);

    let job = h.job(job_id).await;
    assert!(job.final_artifact.is_none());
    assert!(job.raw_video_artifact.is_some());
    assert!(job.check_invariants().is_ok());
}

#[tokio::test]
async fn test_unlaunchable_merge_binary_is_internal_failure() {
    let merger = CountingMerger::delegating(FfmpegMerger::new("/nonexistent/bin/ffmpeg"));
    let h = Harness::with_merger(merger).await;
    let job_id = h.ready_job().await;

    let view = h.orchestrator.reconcile(job_id).await.unwrap();
    assert_eq!(view.state, JobPhase::Failed);
    let failure = view.failure.unwrap();
    assert_eq!(failure.reason, FailureReason::Internal);
    assert!(failure.detail.contains("/nonexistent/bin/ffmpeg"));

    let job = h.job(job_id).await;
    assert!(job.final_artifact.is_none());
    assert!(job.check_invariants().is_ok());
}

#[tokio::test]
async fn test_missing_audio_fails_merge() {
    let h = Harness::new().await;
    let job_id = h.ready_job().await;

    // Simulate the audio object disappearing from the artifact store
    let mut job = h.job(job_id).await;
    job.audio_artifact = avatar_storage::ArtifactKey::new("renders/audio/gone.mp3");
    h.jobs.put_job(&job).await.unwrap();

    let view = h.orchestrator.reconcile(job_id).await.unwrap();
    assert_eq!(view.state, JobPhase::Failed);
    assert_eq!(view.failure.unwrap().reason, FailureReason::MergeFailed);
    assert_eq!(h.merger.merges(), 0);
}

#[tokio::test]
async fn test_record_removed_mid_flight() {
    let h = Harness::new().await;
    let job_id = h.create().await;
    h.jobs.remove(job_id);

    let view = h.orchestrator.reconcile(job_id).await.unwrap();
    assert_eq!(view.state, JobPhase::Failed);
    assert_eq!(view.failure.unwrap().reason, FailureReason::JobNotFound);
    assert!(matches!(
        h.orchestrator.get_status(job_id).await,
        Err(OrchestratorError::JobNotFound(_))
    ));
}

#[tokio::test]
async fn test_abandon_forces_timeout_only_when_active() {
    let h = Harness::new().await;
    let pending = h.create().await;

    let view = h.orchestrator.abandon(pending, "budget exhausted").await.unwrap();
    assert_eq!(view.state, JobPhase::Failed);
    assert_eq!(view.failure.unwrap().reason, FailureReason::Timeout);

    let ready = h.ready_job().await;
    let completed = h.orchestrator.reconcile(ready).await.unwrap();
    assert_eq!(completed.state, JobPhase::Completed);

    let view = h.orchestrator.abandon(ready, "budget exhausted").await.unwrap();
    assert_eq!(view.state, JobPhase::Completed);
    assert!(view.failure.is_none());
}
