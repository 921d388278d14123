//! The job/runner lifecycle engine.
//!
//! All scheduling decisions live here: deduplicating submissions by
//! fingerprint, resolving cache hits through the freshness probe, and the
//! claim/heartbeat/terminal transitions whose atomicity the store enforces.

pub mod sweeper;

use std::sync::Arc;

use serde_json::Value;

use crate::config::Config;
use crate::error::{HubError, Result};
use crate::freshness::ResultValidator;
use crate::identity;
use crate::notifier::Notifier;
use crate::store::{CreateResult, Job, JobStatus, JobStore, Runner};
use crate::validate;

/// Result of a submission.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// A new pending job was created.
    Created(Job),
    /// A job with the same fingerprint already exists (any status, including
    /// a fresh completed result or a stored failure).
    Existing(Job),
    /// The cached completed result failed its freshness probe and the row
    /// was deleted; clients typically re-submit.
    Expired { job_id: String },
}

/// Result of a read-only existence check.
#[derive(Debug)]
pub enum CheckOutcome {
    Missing,
    Present(Job),
    Expired { job_id: String },
}

enum Resolved {
    Live(Job),
    Expired { job_id: String },
}

/// Per-status job counts for the admin stats endpoint.
#[derive(Debug, Default, serde::Serialize)]
pub struct JobStats {
    pub pending: i64,
    pub claimed: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
    pub total: i64,
}

#[derive(Debug, serde::Serialize)]
pub struct RunnerStats {
    pub total: i64,
    pub active: i64,
}

#[derive(Debug, serde::Serialize)]
pub struct Stats {
    pub jobs: JobStats,
    pub runners: RunnerStats,
}

pub struct Coordinator {
    store: JobStore,
    validator: Arc<dyn ResultValidator>,
    notifier: Notifier,
    config: Config,
}

impl Coordinator {
    pub fn new(
        store: JobStore,
        validator: Arc<dyn ResultValidator>,
        notifier: Notifier,
        config: Config,
    ) -> Self {
        Self {
            store,
            validator,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    // ---- submission path ----

    /// Create-or-return. Exactly one row can exist per fingerprint; the
    /// unique hash index settles concurrent submissions and the loser falls
    /// through to the existing row.
    pub async fn submit(&self, job_type: &str, input_params: &Value) -> Result<SubmitOutcome> {
        validate::validate_submission(job_type, input_params, &self.config.limits)?;

        let job_hash = identity::job_hash(job_type, input_params);
        if let Some(existing) = self.store.get_by_hash(&job_hash).await? {
            return Ok(match self.resolve_existing(existing).await? {
                Resolved::Live(job) => SubmitOutcome::Existing(job),
                Resolved::Expired { job_id } => SubmitOutcome::Expired { job_id },
            });
        }

        let id = identity::new_id();
        let params = serde_json::to_string(input_params)
            .map_err(|e| HubError::Internal(format!("failed to serialize input_params: {e}")))?;

        match self
            .store
            .create_job(&id, &job_hash, job_type, &params)
            .await?
        {
            CreateResult::Created(job) => {
                tracing::info!(job_id = %job.id, job_type, "Job created");
                self.notifier.notify_new_job(&job);
                Ok(SubmitOutcome::Created(job))
            }
            CreateResult::Exists(existing) => Ok(match self.resolve_existing(existing).await? {
                Resolved::Live(job) => SubmitOutcome::Existing(job),
                Resolved::Expired { job_id } => SubmitOutcome::Expired { job_id },
            }),
        }
    }

    /// Read-only twin of `submit`: identical resolution, never creates.
    pub async fn check(&self, job_type: &str, input_params: &Value) -> Result<CheckOutcome> {
        validate::validate_submission(job_type, input_params, &self.config.limits)?;

        let job_hash = identity::job_hash(job_type, input_params);
        match self.store.get_by_hash(&job_hash).await? {
            None => Ok(CheckOutcome::Missing),
            Some(job) => Ok(match self.resolve_existing(job).await? {
                Resolved::Live(job) => CheckOutcome::Present(job),
                Resolved::Expired { job_id } => CheckOutcome::Expired { job_id },
            }),
        }
    }

    /// A completed job is only served from cache while its output still
    /// passes the freshness probe; a stale row is deleted and reported as
    /// expired. Concurrent expiries both delete idempotently.
    async fn resolve_existing(&self, job: Job) -> Result<Resolved> {
        if job.status != JobStatus::Completed {
            return Ok(Resolved::Live(job));
        }

        let output = job.output_data_value().unwrap_or(Value::Null);
        if self.validator.is_fresh(&output).await {
            return Ok(Resolved::Live(job));
        }

        tracing::info!(job_id = %job.id, "Cached result failed freshness probe, expiring job");
        self.store.delete_job(&job.id).await?;
        Ok(Resolved::Expired { job_id: job.id })
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Job> {
        self.store
            .get_by_id(job_id)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("Job not found: {job_id}")))
    }

    // ---- runner path ----

    /// Register a runner, or update name/capabilities when it presents an id
    /// it already holds.
    pub async fn register_runner(
        &self,
        runner_id: Option<String>,
        name: &str,
        capabilities: &[String],
    ) -> Result<Runner> {
        if name.is_empty() {
            return Err(HubError::Validation(
                "runner name must be a non-empty string".to_string(),
            ));
        }

        let id = runner_id.unwrap_or_else(identity::new_id);
        let capabilities = serde_json::to_string(capabilities)
            .map_err(|e| HubError::Internal(format!("failed to serialize capabilities: {e}")))?;

        self.store
            .register_runner(&id, name, &capabilities)
            .await?;
        tracing::info!(runner_id = %id, name, "Runner registered");

        self.store
            .get_runner(&id)
            .await?
            .ok_or_else(|| HubError::Internal(format!("runner {id} vanished after registration")))
    }

    pub async fn verify_runner(&self, runner_id: &str) -> Result<Runner> {
        let runner = self
            .store
            .get_runner(runner_id)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("Runner not found: {runner_id}")))?;
        self.store.touch_runner(runner_id).await?;
        Ok(runner)
    }

    /// Pending jobs this runner could claim, FIFO by creation time. The
    /// requested types are intersected with the runner's declared
    /// capabilities; an empty request means every capability.
    pub async fn available_jobs(
        &self,
        runner_id: &str,
        requested_types: &[String],
        limit: i64,
    ) -> Result<Vec<Job>> {
        let runner = self
            .store
            .get_runner(runner_id)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("Runner not found: {runner_id}")))?;
        self.store.touch_runner(runner_id).await?;

        let capabilities = runner.capability_list();
        let types: Vec<String> = if requested_types.is_empty() {
            capabilities
        } else {
            requested_types
                .iter()
                .filter(|t| capabilities.iter().any(|c| c == *t))
                .cloned()
                .collect()
        };

        self.store.list_available(&types, limit).await
    }

    /// Atomic pending -> claimed. Exactly one of any number of concurrent
    /// claimers succeeds; the rest see a conflict.
    pub async fn claim(&self, job_id: &str, runner_id: &str) -> Result<Job> {
        if self.store.get_by_id(job_id).await?.is_none() {
            return Err(HubError::NotFound(format!("Job not found: {job_id}")));
        }
        self.store.touch_runner(runner_id).await?;

        if self.store.claim(job_id, runner_id).await? {
            tracing::info!(job_id, runner_id, "Job claimed");
            self.store
                .get_by_id(job_id)
                .await?
                .ok_or_else(|| HubError::Internal(format!("job {job_id} vanished after claim")))
        } else {
            Err(HubError::Conflict(format!("Job already claimed: {job_id}")))
        }
    }

    /// Progress + console update; also serves as liveness evidence.
    pub async fn heartbeat(
        &self,
        job_id: &str,
        runner_id: &str,
        progress_current: Option<i64>,
        progress_total: Option<i64>,
        console_output: Option<&str>,
    ) -> Result<Job> {
        if let Some(console) = console_output {
            validate::validate_console(console, &self.config.limits)?;
        }

        let job = self.get_job(job_id).await?;
        self.store.touch_runner(runner_id).await?;

        if self
            .store
            .heartbeat(
                job_id,
                runner_id,
                progress_current,
                progress_total,
                console_output,
            )
            .await?
        {
            tracing::debug!(job_id, runner_id, "Heartbeat received");
            self.store
                .get_by_id(job_id)
                .await?
                .ok_or_else(|| HubError::Internal(format!("job {job_id} vanished after heartbeat")))
        } else {
            Err(HubError::Validation(precondition_message(&job, runner_id)))
        }
    }

    /// Terminal success.
    pub async fn complete(
        &self,
        job_id: &str,
        runner_id: &str,
        output_data: &Value,
        console_output: Option<&str>,
    ) -> Result<Job> {
        validate::validate_output(output_data, &self.config.limits)?;
        if let Some(console) = console_output {
            validate::validate_console(console, &self.config.limits)?;
        }

        let job = self.get_job(job_id).await?;
        self.store.touch_runner(runner_id).await?;

        let output = serde_json::to_string(output_data)
            .map_err(|e| HubError::Internal(format!("failed to serialize output_data: {e}")))?;

        if self
            .store
            .complete(job_id, runner_id, &output, console_output)
            .await?
        {
            tracing::info!(job_id, runner_id, "Job completed");
            self.store
                .get_by_id(job_id)
                .await?
                .ok_or_else(|| HubError::Internal(format!("job {job_id} vanished after complete")))
        } else {
            Err(HubError::Validation(precondition_message(&job, runner_id)))
        }
    }

    /// Terminal failure. The job stays failed until externally deleted.
    pub async fn fail(
        &self,
        job_id: &str,
        runner_id: &str,
        error_message: &str,
        console_output: Option<&str>,
    ) -> Result<Job> {
        validate::validate_error_message(error_message, &self.config.limits)?;
        if let Some(console) = console_output {
            validate::validate_console(console, &self.config.limits)?;
        }

        let job = self.get_job(job_id).await?;
        self.store.touch_runner(runner_id).await?;

        if self
            .store
            .fail(job_id, runner_id, error_message, console_output)
            .await?
        {
            tracing::info!(job_id, runner_id, error_message, "Job failed");
            self.store
                .get_by_id(job_id)
                .await?
                .ok_or_else(|| HubError::Internal(format!("job {job_id} vanished after fail")))
        } else {
            Err(HubError::Validation(precondition_message(&job, runner_id)))
        }
    }

    // ---- admin path ----

    pub async fn stats(&self) -> Result<Stats> {
        let mut jobs = JobStats::default();
        for (status, count) in self.store.stats_by_status().await? {
            jobs.total += count;
            match status.as_str() {
                "pending" => jobs.pending = count,
                "claimed" => jobs.claimed = count,
                "in_progress" => jobs.in_progress = count,
                "completed" => jobs.completed = count,
                "failed" => jobs.failed = count,
                other => tracing::warn!(status = other, count, "Unexpected job status in stats"),
            }
        }

        let runners = self.store.list_runners().await?;
        let now = identity::now_ms();
        let active = runners
            .iter()
            .filter(|r| r.is_active(self.config.runner_active_window, now))
            .count() as i64;

        Ok(Stats {
            jobs,
            runners: RunnerStats {
                total: runners.len() as i64,
                active,
            },
        })
    }

    pub async fn list_jobs(&self, status: Option<JobStatus>, limit: i64) -> Result<Vec<Job>> {
        self.store.list_all(status, limit).await
    }

    pub async fn delete_job(&self, job_id: &str) -> Result<()> {
        if self.store.delete_job(job_id).await? {
            tracing::info!(job_id, "Job deleted");
            Ok(())
        } else {
            Err(HubError::NotFound(format!("Job not found: {job_id}")))
        }
    }

    pub async fn delete_jobs(&self, job_ids: &[String]) -> Result<(Vec<String>, Vec<String>)> {
        let (deleted, failed) = self.store.delete_jobs(job_ids).await?;
        tracing::info!(
            deleted = deleted.len(),
            failed = failed.len(),
            "Batch delete finished"
        );
        Ok((deleted, failed))
    }

    /// Runners with their derived activeness.
    pub async fn list_runners(&self) -> Result<Vec<(Runner, bool)>> {
        let now = identity::now_ms();
        let window = self.config.runner_active_window;
        Ok(self
            .store
            .list_runners()
            .await?
            .into_iter()
            .map(|r| {
                let active = r.is_active(window, now);
                (r, active)
            })
            .collect())
    }

    /// Runner detail plus its most recently touched jobs.
    pub async fn runner_detail(&self, runner_id: &str) -> Result<(Runner, bool, Vec<Job>)> {
        let runner = self
            .store
            .get_runner(runner_id)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("Runner not found: {runner_id}")))?;
        let active = runner.is_active(self.config.runner_active_window, identity::now_ms());
        let jobs = self.store.list_by_runner(runner_id, 20).await?;
        Ok((runner, active, jobs))
    }
}

/// Why a heartbeat or terminal transition was refused: either the job has
/// already left its live states, or another runner owns it.
fn precondition_message(job: &Job, runner_id: &str) -> String {
    if !job.status.is_live() {
        format!("Job is no longer active (status: {})", job.status)
    } else if job.claimed_by.as_deref() != Some(runner_id) {
        "Job not claimed by this runner".to_string()
    } else {
        // The snapshot raced a concurrent transition; report what was seen.
        format!("Job is not in a transition-ready state (status: {})", job.status)
    }
}
