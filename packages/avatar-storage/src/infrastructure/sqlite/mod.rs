//! SQLite job store
//!
//! File-based persistent metadata store. The full record is stored as JSON
//! next to an indexed `status` column; conditional updates are a single
//! `UPDATE ... WHERE status = ?` so the precondition check and the write
//! are atomic.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{Job, JobStatus, JobStore, UpdateOutcome};
use crate::{Result, StorageError};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-based JobStore implementation
#[derive(Clone)]
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    /// Open (or create) a store at the given path
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                status TEXT NOT NULL,
                record TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_jobs_status
             ON jobs(status, created_at)",
            [],
        )?;

        Ok(())
    }

    fn decode(record: &str) -> Result<Job> {
        Ok(serde_json::from_str(record)?)
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        let conn = self.conn.lock();
        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM jobs WHERE job_id = ?1",
                params![job_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        record.as_deref().map(Self::decode).transpose()
    }

    async fn put_job(&self, job: &Job) -> Result<()> {
        let record = serde_json::to_string(job)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO jobs (job_id, owner_id, status, record, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                job.id.to_string(),
                job.owner_id(),
                job.status.as_str(),
                record,
                job.created_at.timestamp_millis(),
                job.updated_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    async fn update_job(&self, expected: JobStatus, job: &Job) -> Result<UpdateOutcome> {
        let record = serde_json::to_string(job)?;
        let conn = self.conn.lock();

        let changed = conn.execute(
            "UPDATE jobs SET status = ?1, record = ?2, updated_at = ?3
             WHERE job_id = ?4 AND status = ?5",
            params![
                job.status.as_str(),
                record,
                job.updated_at.timestamp_millis(),
                job.id.to_string(),
                expected.as_str(),
            ],
        )?;

        if changed == 1 {
            return Ok(UpdateOutcome::Updated);
        }

        let current: Option<String> = conn
            .query_row(
                "SELECT status FROM jobs WHERE job_id = ?1",
                params![job.id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        match current {
            None => Err(StorageError::job_not_found(job.id)),
            Some(status) => {
                let current = JobStatus::from_str(&status)?;
                debug!(
                    "Conditional update of job {} rejected: expected {}, found {}",
                    job.id, expected, current
                );
                Ok(UpdateOutcome::ConditionFailed { current })
            }
        }
    }

    async fn list_jobs_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT record FROM jobs WHERE status IN ({}) ORDER BY created_at ASC",
            placeholders
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(statuses.iter().map(|s| s.as_str())), |row| {
                row.get::<_, String>(0)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        records.iter().map(|r| Self::decode(r)).collect()
    }
}
