//! Prometheus metrics for the orchestrator
//!
//! Built only with the `metrics` feature; otherwise every recording call is a
//! no-op.

use avatar_storage::JobStatus;

#[cfg(feature = "metrics")]
use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry, IntCounter,
    IntCounterVec, Opts, Registry,
};

#[cfg(feature = "metrics")]
#[derive(Clone)]
struct Counters {
    jobs_created: IntCounter,
    reconcile_outcomes: IntCounterVec,
    merges: IntCounter,
    discarded_finalizations: IntCounter,
}

/// Orchestrator counters
#[derive(Clone, Default)]
pub struct OrchestratorMetrics {
    #[cfg(feature = "metrics")]
    counters: Option<Counters>,
}

impl OrchestratorMetrics {
    /// Metrics that record nothing
    pub fn disabled() -> Self {
        Self::default()
    }
}

#[cfg(feature = "metrics")]
impl OrchestratorMetrics {
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        let counters = Counters {
            jobs_created: register_int_counter_with_registry!(
                Opts::new("avatar_jobs_created_total", "Jobs persisted by create_job"),
                registry
            )?,
            reconcile_outcomes: register_int_counter_vec_with_registry!(
                Opts::new(
                    "avatar_reconcile_outcomes_total",
                    "Reconciliation cycles by resulting job state"
                ),
                &["state"],
                registry
            )?,
            merges: register_int_counter_with_registry!(
                Opts::new("avatar_merges_total", "Merge computations executed"),
                registry
            )?,
            discarded_finalizations: register_int_counter_with_registry!(
                Opts::new(
                    "avatar_discarded_finalizations_total",
                    "Merges discarded because another cycle finalized first"
                ),
                registry
            )?,
        };
        Ok(Self {
            counters: Some(counters),
        })
    }

    pub fn job_created(&self) {
        if let Some(c) = &self.counters {
            c.jobs_created.inc();
        }
    }

    pub fn reconcile_outcome(&self, status: JobStatus) {
        if let Some(c) = &self.counters {
            c.reconcile_outcomes
                .with_label_values(&[status.as_str()])
                .inc();
        }
    }

    pub fn merge_executed(&self) {
        if let Some(c) = &self.counters {
            c.merges.inc();
        }
    }

    pub fn finalization_discarded(&self) {
        if let Some(c) = &self.counters {
            c.discarded_finalizations.inc();
        }
    }
}

#[cfg(not(feature = "metrics"))]
impl OrchestratorMetrics {
    pub fn job_created(&self) {}

    pub fn reconcile_outcome(&self, _status: JobStatus) {}

    pub fn merge_executed(&self) {}

    pub fn finalization_discarded(&self) {}
}
