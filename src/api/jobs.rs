//! Client-facing submission and status endpoints.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::api::auth::{self, Role};
use crate::api::rate_limit::{STATUS_PER_WINDOW, SUBMIT_PER_WINDOW};
use crate::api::AppState;
use crate::error::{HubError, Result};
use crate::lifecycle::{CheckOutcome, SubmitOutcome};
use crate::store::{Job, JobStatus};

/// Create-or-return: 201 when a new pending job is created, 200 for every
/// other resolution (in-flight, cached, failed, or expired).
pub async fn submit_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response> {
    auth::require_role(&headers, state.coordinator.config(), Role::Submit)?;
    check_limit(&state, &headers, "submit", SUBMIT_PER_WINDOW)?;

    let (job_type, input_params) = parse_submission(&body)?;
    match state.coordinator.submit(job_type, input_params).await? {
        SubmitOutcome::Created(job) => {
            Ok((StatusCode::CREATED, Json(job_response(&job))).into_response())
        }
        SubmitOutcome::Existing(job) => Ok(Json(job_response(&job)).into_response()),
        SubmitOutcome::Expired { job_id } => {
            Ok(Json(json!({ "job_id": job_id, "status": "expired" })).into_response())
        }
    }
}

/// Read-only twin of submit: identical resolution, never creates a row.
pub async fn check_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response> {
    auth::require_role(&headers, state.coordinator.config(), Role::Submit)?;
    check_limit(&state, &headers, "submit", SUBMIT_PER_WINDOW)?;

    let (job_type, input_params) = parse_submission(&body)?;
    match state.coordinator.check(job_type, input_params).await? {
        CheckOutcome::Missing => Ok(Json(json!({ "exists": false })).into_response()),
        CheckOutcome::Present(job) => {
            let mut body = job_response(&job);
            body["exists"] = json!(true);
            Ok(Json(body).into_response())
        }
        CheckOutcome::Expired { job_id } => Ok(Json(
            json!({ "exists": true, "job_id": job_id, "status": "expired" }),
        )
        .into_response()),
    }
}

pub async fn status_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response> {
    auth::require_role(&headers, state.coordinator.config(), Role::Submit)?;
    check_limit(&state, &headers, "status", STATUS_PER_WINDOW)?;

    let job = state.coordinator.get_job(&id).await?;
    Ok(Json(job_response(&job)).into_response())
}

fn check_limit(state: &AppState, headers: &HeaderMap, scope: &str, limit: u32) -> Result<()> {
    let ip = auth::client_ip(headers);
    state
        .limiter
        .check(&format!("{scope}:{ip}"), limit)
        .map_err(|retry_after_secs| HubError::RateLimited { retry_after_secs })
}

fn parse_submission(body: &Value) -> Result<(&str, &Value)> {
    let job_type = match body.get("job_type") {
        Some(Value::String(s)) => s.as_str(),
        _ => {
            return Err(HubError::Validation(
                "job_type must be a non-empty string".to_string(),
            ))
        }
    };
    let input_params = body.get("input_params").unwrap_or(&Value::Null);
    Ok((job_type, input_params))
}

/// The client-facing view of a job: no raw input echo, result only when
/// completed, error only when failed.
pub(crate) fn job_response(job: &Job) -> Value {
    let mut body = json!({
        "job_id": job.id.clone(),
        "job_type": job.job_type.clone(),
        "status": job.status,
        "progress_current": job.progress_current,
        "progress_total": job.progress_total,
        "created_at": job.created_at,
        "updated_at": job.updated_at,
    });

    if job.status == JobStatus::Completed {
        body["result"] = json!({
            "output_data": job.output_data_value(),
            "console_output": job.console_output.clone(),
        });
    }
    if let Some(error_message) = &job.error_message {
        body["error_message"] = json!(error_message.clone());
    }

    body
}
