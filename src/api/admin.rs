//! Admin observation and curation endpoints. No rate limiting here.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::auth::{self, Role};
use crate::api::AppState;
use crate::error::{HubError, Result};
use crate::store::{Job, JobStatus, Runner};

const DEFAULT_LIST_LIMIT: i64 = 100;
const MAX_LIST_LIMIT: i64 = 500;

#[derive(Deserialize)]
pub struct ListJobsQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct BatchDeleteRequest {
    pub job_ids: Vec<String>,
}

pub async fn stats_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    auth::require_role(&headers, state.coordinator.config(), Role::Admin)?;
    let stats = state.coordinator.stats().await?;
    Ok(Json(stats).into_response())
}

pub async fn list_jobs_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListJobsQuery>,
) -> Result<Response> {
    auth::require_role(&headers, state.coordinator.config(), Role::Admin)?;

    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(JobStatus::parse(raw).ok_or_else(|| {
            HubError::Validation(format!("unknown status filter: {raw}"))
        })?),
    };
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    let jobs = state.coordinator.list_jobs(status, limit).await?;
    let jobs: Vec<Value> = jobs.iter().map(job_summary).collect();
    Ok(Json(jobs).into_response())
}

pub async fn job_detail_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response> {
    auth::require_role(&headers, state.coordinator.config(), Role::Admin)?;
    let job = state.coordinator.get_job(&id).await?;
    Ok(Json(job_detail(&job)).into_response())
}

pub async fn delete_job_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response> {
    auth::require_role(&headers, state.coordinator.config(), Role::Admin)?;
    state.coordinator.delete_job(&id).await?;
    Ok(Json(json!({ "deleted": true, "job_id": id })).into_response())
}

/// Deletes each id independently; the reply summarizes which succeeded.
pub async fn batch_delete_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<BatchDeleteRequest>,
) -> Result<Response> {
    auth::require_role(&headers, state.coordinator.config(), Role::Admin)?;

    if body.job_ids.is_empty() {
        return Err(HubError::Validation("job_ids must be non-empty".to_string()));
    }

    let (deleted, failed) = state.coordinator.delete_jobs(&body.job_ids).await?;
    Ok(Json(json!({ "deleted": deleted, "failed": failed })).into_response())
}

pub async fn list_runners_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response> {
    auth::require_role(&headers, state.coordinator.config(), Role::Admin)?;

    let runners = state.coordinator.list_runners().await?;
    let runners: Vec<Value> = runners
        .iter()
        .map(|(runner, active)| runner_response(runner, *active))
        .collect();
    Ok(Json(runners).into_response())
}

pub async fn runner_detail_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response> {
    auth::require_role(&headers, state.coordinator.config(), Role::Admin)?;

    let (runner, active, jobs) = state.coordinator.runner_detail(&id).await?;
    let mut body = runner_response(&runner, active);
    body["recent_jobs"] = Value::Array(jobs.iter().map(job_summary).collect());
    Ok(Json(body).into_response())
}

fn job_summary(job: &Job) -> Value {
    json!({
        "job_id": job.id.clone(),
        "job_hash": job.job_hash.clone(),
        "job_type": job.job_type.clone(),
        "status": job.status,
        "claimed_by": job.claimed_by.clone(),
        "progress_current": job.progress_current,
        "progress_total": job.progress_total,
        "error_message": job.error_message.clone(),
        "created_at": job.created_at,
        "updated_at": job.updated_at,
    })
}

/// The full row, including payloads the summary omits.
fn job_detail(job: &Job) -> Value {
    let mut body = job_summary(job);
    body["input_params"] = job.input_params_value();
    body["output_data"] = job.output_data_value().unwrap_or(Value::Null);
    body["console_output"] = json!(job.console_output.clone());
    body["claimed_at"] = json!(job.claimed_at);
    body["last_heartbeat"] = json!(job.last_heartbeat);
    body
}

fn runner_response(runner: &Runner, active: bool) -> Value {
    json!({
        "runner_id": runner.id.clone(),
        "name": runner.name.clone(),
        "capabilities": runner.capability_list(),
        "registered_at": runner.registered_at,
        "last_seen": runner.last_seen,
        "active": active,
    })
}
