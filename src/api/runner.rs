//! Runner-facing endpoints: registration, verification, polling, and the
//! per-job transition calls.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::auth::{self, Role};
use crate::api::rate_limit::RUNNER_PER_WINDOW;
use crate::api::AppState;
use crate::error::{HubError, Result};
use crate::store::Job;

const DEFAULT_AVAILABLE_LIMIT: i64 = 10;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// A runner that kept its id re-registers under it; name and
    /// capabilities are replaced.
    #[serde(default)]
    pub runner_id: Option<String>,
}

#[derive(Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub progress_current: Option<i64>,
    #[serde(default)]
    pub progress_total: Option<i64>,
    #[serde(default)]
    pub console_output: Option<String>,
}

#[derive(Deserialize)]
pub struct CompleteRequest {
    pub output_data: Value,
    #[serde(default)]
    pub console_output: Option<String>,
}

#[derive(Deserialize)]
pub struct ErrorRequest {
    pub error_message: String,
    #[serde(default)]
    pub console_output: Option<String>,
}

pub async fn register_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RegisterRequest>,
) -> Result<Response> {
    auth::require_role(&headers, state.coordinator.config(), Role::Runner)?;

    let runner = state
        .coordinator
        .register_runner(body.runner_id, &body.name, &body.capabilities)
        .await?;

    Ok(Json(json!({
        "runner_id": runner.id.clone(),
        "name": runner.name.clone(),
        "capabilities": runner.capability_list(),
    }))
    .into_response())
}

/// Confirm a previously-issued runner id still exists. Runners call this on
/// startup and re-register when their id was deleted server-side.
pub async fn verify_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response> {
    auth::require_role(&headers, state.coordinator.config(), Role::Runner)?;
    let runner_id = auth::runner_id(&headers)?;

    let runner = state.coordinator.verify_runner(&runner_id).await?;
    Ok(Json(json!({ "valid": true, "runner_id": runner.id.clone() })).into_response())
}

pub async fn available_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response> {
    auth::require_role(&headers, state.coordinator.config(), Role::Runner)?;
    let runner_id = auth::runner_id(&headers)?;
    check_runner_limit(&state, &runner_id)?;

    let types = requested_types(&params);
    let jobs = state
        .coordinator
        .available_jobs(&runner_id, &types, DEFAULT_AVAILABLE_LIMIT)
        .await?;

    let jobs: Vec<Value> = jobs.iter().map(available_job_response).collect();
    Ok(Json(jobs).into_response())
}

pub async fn claim_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response> {
    auth::require_role(&headers, state.coordinator.config(), Role::Runner)?;
    let runner_id = auth::runner_id(&headers)?;

    let job = state.coordinator.claim(&id, &runner_id).await?;
    Ok(Json(json!({
        "job_id": job.id.clone(),
        "job_type": job.job_type.clone(),
        "status": job.status,
        "input_params": job.input_params_value(),
    }))
    .into_response())
}

pub async fn heartbeat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<HeartbeatRequest>,
) -> Result<Response> {
    auth::require_role(&headers, state.coordinator.config(), Role::Runner)?;
    let runner_id = auth::runner_id(&headers)?;
    check_runner_limit(&state, &runner_id)?;

    let job = state
        .coordinator
        .heartbeat(
            &id,
            &runner_id,
            body.progress_current,
            body.progress_total,
            body.console_output.as_deref(),
        )
        .await?;

    Ok(Json(json!({
        "job_id": job.id.clone(),
        "status": job.status,
        "progress_current": job.progress_current,
        "progress_total": job.progress_total,
    }))
    .into_response())
}

pub async fn complete_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<CompleteRequest>,
) -> Result<Response> {
    auth::require_role(&headers, state.coordinator.config(), Role::Runner)?;
    let runner_id = auth::runner_id(&headers)?;

    let job = state
        .coordinator
        .complete(
            &id,
            &runner_id,
            &body.output_data,
            body.console_output.as_deref(),
        )
        .await?;

    Ok(Json(json!({ "job_id": job.id.clone(), "status": job.status })).into_response())
}

pub async fn error_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ErrorRequest>,
) -> Result<Response> {
    auth::require_role(&headers, state.coordinator.config(), Role::Runner)?;
    let runner_id = auth::runner_id(&headers)?;

    let job = state
        .coordinator
        .fail(
            &id,
            &runner_id,
            &body.error_message,
            body.console_output.as_deref(),
        )
        .await?;

    Ok(Json(json!({ "job_id": job.id.clone(), "status": job.status })).into_response())
}

fn check_runner_limit(state: &AppState, runner_id: &str) -> Result<()> {
    state
        .limiter
        .check(&format!("runner:{runner_id}"), RUNNER_PER_WINDOW)
        .map_err(|retry_after_secs| HubError::RateLimited { retry_after_secs })
}

/// Accepts `types[]=a&types[]=b` as well as a comma-separated `types=a,b`.
fn requested_types(params: &[(String, String)]) -> Vec<String> {
    let mut types = Vec::new();
    for (key, value) in params {
        if key == "types[]" || key == "types" {
            for t in value.split(',') {
                let t = t.trim();
                if !t.is_empty() {
                    types.push(t.to_string());
                }
            }
        }
    }
    types
}

fn available_job_response(job: &Job) -> Value {
    json!({
        "job_id": job.id.clone(),
        "job_type": job.job_type.clone(),
        "input_params": job.input_params_value(),
        "created_at": job.created_at,
    })
}
