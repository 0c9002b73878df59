//! avatar-render - create, inspect and drive avatar render jobs
//!
//! ```text
//! avatar-render --config avatar.yaml create --owner u1 --script "hello" --image uploads/u1/a.png
//! avatar-render status <job-id>
//! avatar-render reconcile <job-id>
//! avatar-render run
//! ```

use anyhow::Result;
use avatar_orchestration::{
    Collaborators, CreateJobRequest, FfmpegMerger, HttpSpeechSynthesizer, HttpVideoGenerator,
    JobOrchestrator, ReconcileScheduler, SchedulerHandle, ServiceConfig, VideoCapabilities,
};
use avatar_storage::{JobStore, ObjectStore, S3ObjectStore, SqliteJobStore};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "avatar-render", version, about = "Avatar render job orchestrator")]
struct Cli {
    /// YAML configuration file (version: 1)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Synthesize audio, dispatch video generation and persist a new job
    Create {
        #[arg(long)]
        owner: String,

        #[arg(long)]
        script: String,

        /// Artifact store key of the presenter image
        #[arg(long)]
        image: String,

        /// standard | cloned
        #[arg(long)]
        voice_mode: Option<String>,

        /// subtle | expressive
        #[arg(long)]
        gesture_mode: Option<String>,

        /// Requested duration in seconds
        #[arg(long)]
        duration: Option<u32>,
    },

    /// Show the current state of a job
    Status { job_id: Uuid },

    /// Run one reconciliation cycle for a job
    Reconcile { job_id: Uuid },

    /// Run the polling driver until interrupted
    Run,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Created {
    job_id: Uuid,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ServiceConfig::load(cli.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let jobs: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(&config.storage.sqlite_path)?);
    let artifacts: Arc<dyn ObjectStore> =
        Arc::new(S3ObjectStore::new(config.storage.s3.clone())?);
    let speech = Arc::new(HttpSpeechSynthesizer::new(
        config.speech.clone(),
        artifacts.clone(),
    )?);
    let video = Arc::new(HttpVideoGenerator::new(config.video.clone())?);
    let merger = Arc::new(FfmpegMerger::new(&config.merge.ffmpeg_path));

    let handle = SchedulerHandle::new();
    let orchestrator = JobOrchestrator::new(
        Collaborators {
            jobs,
            artifacts,
            speech,
            video,
            merger,
        },
        config.orchestrator.clone(),
        VideoCapabilities::from_config(&config.video),
    )
    .with_trigger(Arc::new(handle.clone()));

    #[cfg(feature = "metrics")]
    let orchestrator = orchestrator.with_metrics(
        avatar_orchestration::OrchestratorMetrics::register(prometheus::default_registry())?,
    );

    match cli.command {
        Command::Create {
            owner,
            script,
            image,
            voice_mode,
            gesture_mode,
            duration,
        } => {
            let job_id = orchestrator
                .create_job(CreateJobRequest {
                    owner_id: owner,
                    script,
                    image_ref: image,
                    voice_mode,
                    gesture_mode,
                    duration_hint_secs: duration,
                })
                .await?;
            print_json(&Created { job_id })?;
        }
        Command::Status { job_id } => {
            print_json(&orchestrator.get_status(job_id).await?)?;
        }
        Command::Reconcile { job_id } => {
            print_json(&orchestrator.reconcile(job_id).await?)?;
        }
        Command::Run => {
            let shutdown = CancellationToken::new();
            let token = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received");
                    token.cancel();
                }
            });

            let scheduler =
                ReconcileScheduler::new(Arc::new(orchestrator), config.scheduler.clone(), handle);
            scheduler.run(shutdown).await?;
        }
    }

    Ok(())
}
