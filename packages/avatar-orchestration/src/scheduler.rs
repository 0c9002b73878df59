//! Polling driver
//!
//! Periodically reconciles every non-terminal job. The job list is re-read
//! from the metadata store on each sweep, so polling resumes on its own after
//! a restart. Jobs older than the abandonment budget are failed with
//! `timeout` instead of being polled again.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::job::JobPhase;
use crate::orchestrator::{JobOrchestrator, ReconcileTrigger};

/// Wakes the scheduler early when a job is created
#[derive(Clone, Default)]
pub struct SchedulerHandle {
    notify: Arc<Notify>,
}

impl SchedulerHandle {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReconcileTrigger for SchedulerHandle {
    fn job_created(&self, job_id: Uuid) {
        debug!("Job {} created, requesting early sweep", job_id);
        self.notify.notify_one();
    }
}

/// Counts from one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub errors: usize,
}

pub struct ReconcileScheduler {
    orchestrator: Arc<JobOrchestrator>,
    config: SchedulerConfig,
    handle: SchedulerHandle,
}

enum Visit {
    Reconciled(JobPhase),
    Abandoned,
    Error,
}

impl ReconcileScheduler {
    /// `handle` should be the trigger installed on `orchestrator`
    pub fn new(
        orchestrator: Arc<JobOrchestrator>,
        config: SchedulerConfig,
        handle: SchedulerHandle,
    ) -> Self {
        Self {
            orchestrator,
            config,
            handle,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    async fn visit(&self, job_id: Uuid, age: std::time::Duration) -> Visit {
        if age >= self.config.abandon_after() {
            let detail = format!(
                "not finished within {}s (age {}s)",
                self.config.abandon_after_secs,
                age.as_secs()
            );
            return match self.orchestrator.abandon(job_id, &detail).await {
                Ok(view) if view.state == JobPhase::Failed => {
                    warn!("Job {} abandoned: {}", job_id, detail);
                    Visit::Abandoned
                }
                Ok(view) => Visit::Reconciled(view.state),
                Err(e) => {
                    error!("Job {}: abandon failed: {}", job_id, e);
                    Visit::Error
                }
            };
        }

        match self.orchestrator.reconcile(job_id).await {
            Ok(view) => Visit::Reconciled(view.state),
            Err(e) => {
                error!("Job {}: reconcile failed ({}): {}", job_id, e.category(), e);
                Visit::Error
            }
        }
    }

    /// Reconcile every non-terminal job once, with bounded concurrency
    pub async fn sweep(&self) -> Result<SweepReport> {
        let jobs = self.orchestrator.active_jobs().await?;
        let now = Utc::now();
        let mut report = SweepReport {
            examined: jobs.len(),
            ..Default::default()
        };

        let visits: Vec<Visit> = stream::iter(jobs)
            .map(|job| {
                let age = (now - job.created_at).to_std().unwrap_or_default();
                self.visit(job.id, age)
            })
            .buffer_unordered(self.config.max_concurrent.max(1))
            .collect()
            .await;

        for visit in visits {
            match visit {
                Visit::Reconciled(JobPhase::Pending) => report.pending += 1,
                Visit::Reconciled(JobPhase::Completed) => report.completed += 1,
                Visit::Reconciled(JobPhase::Failed) => report.failed += 1,
                Visit::Abandoned => report.abandoned += 1,
                Visit::Error => report.errors += 1,
            }
        }

        if report.examined > 0 {
            info!(
                "Sweep: {} jobs, {} pending, {} completed, {} failed, {} abandoned, {} errors",
                report.examined,
                report.pending,
                report.completed,
                report.failed,
                report.abandoned,
                report.errors
            );
        }
        Ok(report)
    }

    /// Sweep every poll interval, or early when triggered, until `shutdown`
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(
            "Scheduler started (interval {}s, abandon after {}s, concurrency {})",
            self.config.poll_interval_secs,
            self.config.abandon_after_secs,
            self.config.max_concurrent
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Scheduler shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {}
                _ = self.handle.notify.notified() => {
                    debug!("Early sweep requested");
                }
            }

            if let Err(e) = self.sweep().await {
                error!("Sweep failed: {}", e);
            }
        }
    }
}
