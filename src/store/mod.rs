//! Persistence over two relations (jobs, runners).
//!
//! Every multi-field transition is a single conditional UPDATE whose WHERE
//! clause encodes the precondition on the current state, so races between
//! requests are settled by the database, not by in-process locks. Callers
//! learn whether the transition happened from the affected-row count.

pub mod models;

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::error::{HubError, Result};
use crate::identity::now_ms;

pub use models::{Job, JobStatus, Runner};

/// Error message recorded on jobs failed by the stale-heartbeat sweep.
pub const HEARTBEAT_TIMEOUT_ERROR: &str = "Job timed out - no heartbeat received";

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        job_hash TEXT NOT NULL UNIQUE,
        job_type TEXT NOT NULL,
        input_params TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        claimed_by TEXT,
        claimed_at INTEGER,
        progress_current INTEGER,
        progress_total INTEGER,
        console_output TEXT,
        output_data TEXT,
        error_message TEXT,
        last_heartbeat INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs (status)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_job_type ON jobs (job_type)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_claimed_by ON jobs (claimed_by)",
    "CREATE TABLE IF NOT EXISTS runners (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        capabilities TEXT NOT NULL,
        registered_at INTEGER NOT NULL,
        last_seen INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_runners_last_seen ON runners (last_seen)",
];

/// Outcome of `create_job`: either the new row or the row that already owned
/// the hash.
#[derive(Debug)]
pub enum CreateResult {
    Created(Job),
    Exists(Job),
}

#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    /// Open (creating if missing) a database file and apply the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory store for tests. A single connection keeps every query on
    /// the same database.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(pool).await?;
        }
        Ok(())
    }

    // ---- jobs ----

    /// Insert a new pending job. On a hash collision the existing row is
    /// returned instead; the unique index serializes concurrent creations.
    pub async fn create_job(
        &self,
        id: &str,
        job_hash: &str,
        job_type: &str,
        input_params: &str,
    ) -> Result<CreateResult> {
        let now = now_ms();
        let inserted = sqlx::query(
            "INSERT INTO jobs (id, job_hash, job_type, input_params, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, 'pending', ?, ?)",
        )
        .bind(id)
        .bind(job_hash)
        .bind(job_type)
        .bind(input_params)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => {
                let job = self
                    .get_by_id(id)
                    .await?
                    .ok_or_else(|| HubError::Internal(format!("job {id} vanished after insert")))?;
                Ok(CreateResult::Created(job))
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                let existing = self.get_by_hash(job_hash).await?.ok_or_else(|| {
                    HubError::Internal(format!("job with hash {job_hash} vanished after conflict"))
                })?;
                Ok(CreateResult::Exists(existing))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_by_hash(&self, job_hash: &str) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE job_hash = ?")
            .bind(job_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    pub async fn list_by_runner(&self, runner_id: &str, limit: i64) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE claimed_by = ? ORDER BY updated_at DESC LIMIT ?",
        )
        .bind(runner_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    /// Pending jobs matching any of the given types, FIFO by creation time.
    pub async fn list_available(&self, types: &[String], limit: i64) -> Result<Vec<Job>> {
        if types.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT * FROM jobs WHERE status = 'pending' AND job_type IN (",
        );
        {
            let mut separated = builder.separated(", ");
            for job_type in types {
                separated.push_bind(job_type);
            }
        }
        builder.push(") ORDER BY created_at ASC LIMIT ");
        builder.push_bind(limit);

        let jobs = builder
            .build_query_as::<Job>()
            .fetch_all(&self.pool)
            .await?;
        Ok(jobs)
    }

    pub async fn list_all(&self, status: Option<JobStatus>, limit: i64) -> Result<Vec<Job>> {
        let jobs = match status {
            Some(status) => {
                sqlx::query_as::<_, Job>(
                    "SELECT * FROM jobs WHERE status = ? ORDER BY created_at DESC LIMIT ?",
                )
                .bind(status)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Job>("SELECT * FROM jobs ORDER BY created_at DESC LIMIT ?")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(jobs)
    }

    pub async fn stats_by_status(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM jobs GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// pending -> claimed. Succeeds iff the job is still pending; exactly one
    /// of any number of concurrent claimers wins.
    pub async fn claim(&self, job_id: &str, runner_id: &str) -> Result<bool> {
        let now = now_ms();
        let result = sqlx::query(
            "UPDATE jobs
             SET status = 'claimed', claimed_by = ?, claimed_at = ?, last_heartbeat = ?, updated_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(runner_id)
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// claimed|in_progress -> in_progress, advancing progress and console and
    /// extending liveness. Only the claiming runner may heartbeat.
    pub async fn heartbeat(
        &self,
        job_id: &str,
        runner_id: &str,
        progress_current: Option<i64>,
        progress_total: Option<i64>,
        console_output: Option<&str>,
    ) -> Result<bool> {
        let now = now_ms();
        let result = sqlx::query(
            "UPDATE jobs
             SET status = 'in_progress',
                 progress_current = COALESCE(?, progress_current),
                 progress_total = COALESCE(?, progress_total),
                 console_output = COALESCE(?, console_output),
                 last_heartbeat = ?, updated_at = ?
             WHERE id = ? AND claimed_by = ? AND status IN ('claimed', 'in_progress')",
        )
        .bind(progress_current)
        .bind(progress_total)
        .bind(console_output)
        .bind(now)
        .bind(now)
        .bind(job_id)
        .bind(runner_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// claimed|in_progress -> completed, recording the output.
    pub async fn complete(
        &self,
        job_id: &str,
        runner_id: &str,
        output_data: &str,
        console_output: Option<&str>,
    ) -> Result<bool> {
        let now = now_ms();
        let result = sqlx::query(
            "UPDATE jobs
             SET status = 'completed', output_data = ?,
                 console_output = COALESCE(?, console_output),
                 last_heartbeat = ?, updated_at = ?
             WHERE id = ? AND claimed_by = ? AND status IN ('claimed', 'in_progress')",
        )
        .bind(output_data)
        .bind(console_output)
        .bind(now)
        .bind(now)
        .bind(job_id)
        .bind(runner_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// claimed|in_progress -> failed, recording the error.
    pub async fn fail(
        &self,
        job_id: &str,
        runner_id: &str,
        error_message: &str,
        console_output: Option<&str>,
    ) -> Result<bool> {
        let now = now_ms();
        let result = sqlx::query(
            "UPDATE jobs
             SET status = 'failed', error_message = ?,
                 console_output = COALESCE(?, console_output),
                 last_heartbeat = ?, updated_at = ?
             WHERE id = ? AND claimed_by = ? AND status IN ('claimed', 'in_progress')",
        )
        .bind(error_message)
        .bind(console_output)
        .bind(now)
        .bind(now)
        .bind(job_id)
        .bind(runner_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Fail every claimed or in-progress job whose last heartbeat is older
    /// than the threshold. Returns the number of jobs swept.
    pub async fn sweep_stale(&self, threshold: Duration) -> Result<u64> {
        let now = now_ms();
        let cutoff = now - threshold.as_millis() as i64;
        let result = sqlx::query(
            "UPDATE jobs
             SET status = 'failed', error_message = ?, updated_at = ?
             WHERE status IN ('claimed', 'in_progress') AND last_heartbeat < ?",
        )
        .bind(HEARTBEAT_TIMEOUT_ERROR)
        .bind(now)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_job(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Delete each id independently, reporting per-id success.
    pub async fn delete_jobs(&self, ids: &[String]) -> Result<(Vec<String>, Vec<String>)> {
        let mut deleted = Vec::new();
        let mut failed = Vec::new();
        for id in ids {
            if self.delete_job(id).await? {
                deleted.push(id.clone());
            } else {
                failed.push(id.clone());
            }
        }
        Ok((deleted, failed))
    }

    // ---- runners ----

    /// Upsert by id: re-registration replaces name and capabilities and
    /// refreshes last_seen.
    pub async fn register_runner(
        &self,
        id: &str,
        name: &str,
        capabilities: &str,
    ) -> Result<()> {
        let now = now_ms();
        sqlx::query(
            "INSERT INTO runners (id, name, capabilities, registered_at, last_seen)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 capabilities = excluded.capabilities,
                 last_seen = excluded.last_seen",
        )
        .bind(id)
        .bind(name)
        .bind(capabilities)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn touch_runner(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE runners SET last_seen = ? WHERE id = ?")
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn get_runner(&self, id: &str) -> Result<Option<Runner>> {
        let runner = sqlx::query_as::<_, Runner>("SELECT * FROM runners WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(runner)
    }

    pub async fn list_runners(&self) -> Result<Vec<Runner>> {
        let runners =
            sqlx::query_as::<_, Runner>("SELECT * FROM runners ORDER BY registered_at ASC")
                .fetch_all(&self.pool)
                .await?;
        Ok(runners)
    }
}
