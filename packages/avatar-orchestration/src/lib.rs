/*
 * Avatar Orchestration - Avatar Render Job Orchestrator
 *
 * Turns a still image and a script into one merged audio/video artifact by
 * coordinating slow asynchronous backends.
 *
 * Architecture:
 * - Job State Machine (PENDING -> READY -> COMPLETED, FAILED absorbing)
 * - Idempotent Reconciliation (conditional updates, re-derived every cycle)
 * - Artifact Discovery (list-and-match on the backend output prefix)
 * - Exactly-once Finalization (double-checked merge commit)
 * - Polling Driver (bounded-concurrency sweeps, abandonment budget)
 */

// Public modules
pub mod clients;
pub mod config;
pub mod discovery;
pub mod error;
pub mod finalize;
pub mod job;
pub mod merge;
pub mod metrics;
pub mod orchestrator;
pub mod scheduler;

// Re-exports
pub use clients::{
    DispatchReceipt, HttpSpeechSynthesizer, HttpVideoGenerator, ImagePayload, OperationStatus,
    SpeechSynthesizer, SynthesisError, VideoCapabilities, VideoClientError, VideoGenerator,
    VideoRequest,
};
pub use config::{ConfigError, OrchestratorConfig, SchedulerConfig, ServiceConfig};
pub use discovery::Discovery;
pub use error::{ErrorCategory, OrchestratorError, Result};
pub use job::{JobPhase, JobStateMachine, JobView};
pub use merge::{FfmpegMerger, MergeEngine, MergeError};
pub use metrics::OrchestratorMetrics;
pub use orchestrator::{Collaborators, CreateJobRequest, JobOrchestrator, ReconcileTrigger};
pub use scheduler::{ReconcileScheduler, SchedulerHandle, SweepReport};
