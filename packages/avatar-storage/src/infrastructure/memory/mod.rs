//! In-memory job and object stores
//!
//! DashMap-backed implementations used by tests and local dry runs.
//! Conditional updates hold the per-key shard lock, so they are atomic with
//! respect to concurrent reconcilers in the same process.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{ArtifactKey, Job, JobStatus, JobStore, ObjectStore, UpdateOutcome};
use crate::{Result, StorageError};

#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    jobs: Arc<DashMap<Uuid, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Drop a record (simulates an out-of-band deletion)
    pub fn remove(&self, job_id: Uuid) -> Option<Job> {
        self.jobs.remove(&job_id).map(|(_, job)| job)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.get(&job_id).map(|entry| entry.value().clone()))
    }

    async fn put_job(&self, job: &Job) -> Result<()> {
        self.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn update_job(&self, expected: JobStatus, job: &Job) -> Result<UpdateOutcome> {
        let mut entry = self
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| StorageError::job_not_found(job.id))?;

        if entry.status != expected {
            return Ok(UpdateOutcome::ConditionFailed {
                current: entry.status,
            });
        }

        *entry = job.clone();
        Ok(UpdateOutcome::Updated)
    }

    async fn list_jobs_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .filter(|entry| statuses.contains(&entry.status))
            .map(|entry| entry.value().clone())
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

#[derive(Clone, Default)]
pub struct InMemoryObjectStore {
    objects: Arc<DashMap<String, StoredObject>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content_type(&self, key: &ArtifactKey) -> Option<String> {
        self.objects
            .get(key.as_str())
            .map(|obj| obj.content_type.clone())
    }

    pub fn contains(&self, key: &ArtifactKey) -> bool {
        self.objects.contains_key(key.as_str())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &ArtifactKey, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        self.objects.insert(
            key.as_str().to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &ArtifactKey) -> Result<Vec<u8>> {
        self.objects
            .get(key.as_str())
            .map(|obj| obj.bytes.clone())
            .ok_or_else(|| StorageError::object_not_found(key.as_str()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ArtifactKey>> {
        let mut keys: Vec<ArtifactKey> = self
            .objects
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| ArtifactKey::new(entry.key().clone()))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn presign(&self, key: &ArtifactKey, ttl: Duration) -> Result<String> {
        if !self.objects.contains_key(key.as_str()) {
            return Err(StorageError::object_not_found(key.as_str()));
        }
        Ok(format!("memory://{}?expires_in={}", key, ttl.as_secs()))
    }
}
