//! avatar-storage - Job metadata and artifact storage
//!
//! ## Core Principles
//!
//! 1. **Single source of truth**: the job store is the only resource that needs
//!    consistency discipline; every transition is a conditional update
//! 2. **Write-once references**: audio, raw video and final artifact keys are
//!    never overwritten once set
//! 3. **Derived keys**: artifact keys are derived from the job id, so duplicate
//!    writers converge on the same object
//!
//! ## Usage
//!
//! ```rust,ignore
//! use avatar_storage::{JobStatus, JobStore, SqliteJobStore, UpdateOutcome};
//!
//! let store = SqliteJobStore::new("jobs.db")?;
//! store.put_job(&job).await?;
//!
//! let mut next = job.clone();
//! next.status = JobStatus::Ready;
//! match store.update_job(JobStatus::Pending, &next).await? {
//!     UpdateOutcome::Updated => {}
//!     UpdateOutcome::ConditionFailed { current } => { /* re-read */ }
//! }
//! ```

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::layout;
pub use domain::{
    ArtifactKey, Failure, FailureReason, GestureMode, Job, JobInputs, JobStatus, JobStore,
    ObjectStore, OperationHandle, UpdateOutcome, VideoSpec, VoiceMode,
};

pub use infrastructure::{InMemoryJobStore, InMemoryObjectStore};

#[cfg(feature = "sqlite")]
pub use infrastructure::SqliteJobStore;

#[cfg(feature = "s3")]
pub use infrastructure::{S3Config, S3ObjectStore};
