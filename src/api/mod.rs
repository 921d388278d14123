//! HTTP dispatch for the coordinator.
//!
//! One router serves three audiences: submitting clients, runners, and
//! admins. Handlers stay thin: authenticate, rate-limit, delegate to the
//! lifecycle engine, shape the JSON reply. All error surfaces share the
//! `{error, details?}` body.

pub mod admin;
pub mod auth;
pub mod jobs;
pub mod rate_limit;
pub mod runner;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::error::HubError;
use crate::lifecycle::Coordinator;

use self::rate_limit::RateLimiter;

pub const SERVICE_NAME: &str = "runpack-hub";

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub limiter: Arc<RateLimiter>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let (status, error, details) = match self {
            HubError::Validation(msg) => (StatusCode::BAD_REQUEST, msg, None),
            HubError::Auth(msg) => (StatusCode::UNAUTHORIZED, msg, None),
            HubError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            HubError::Conflict(msg) => (StatusCode::CONFLICT, msg, None),
            HubError::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                "Rate limit exceeded".to_string(),
                Some(format!("window resets in {retry_after_secs}s")),
            ),
            HubError::Store(e) => {
                tracing::error!(error = %e, "Store error while handling request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    Some(e.to_string()),
                )
            }
            HubError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error while handling request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    Some(msg),
                )
            }
        };

        (status, Json(ErrorBody { error, details })).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    // Cross-origin preflight is answered permissively; authentication is the
    // only access control.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(health_handler))
        .route("/health", get(health_handler))
        .route("/api/jobs/check", post(jobs::check_handler))
        .route("/api/jobs/submit", post(jobs::submit_handler))
        .route("/api/jobs/{id}", get(jobs::status_handler))
        .route("/api/runner/register", post(runner::register_handler))
        .route("/api/runner/verify", get(runner::verify_handler))
        .route("/api/runner/jobs/available", get(runner::available_handler))
        .route("/api/runner/jobs/{id}/claim", post(runner::claim_handler))
        .route(
            "/api/runner/jobs/{id}/heartbeat",
            post(runner::heartbeat_handler),
        )
        .route(
            "/api/runner/jobs/{id}/complete",
            post(runner::complete_handler),
        )
        .route("/api/runner/jobs/{id}/error", post(runner::error_handler))
        .route("/api/admin/stats", get(admin::stats_handler))
        .route("/api/admin/jobs", get(admin::list_jobs_handler))
        .route(
            "/api/admin/jobs/batch-delete",
            post(admin::batch_delete_handler),
        )
        .route(
            "/api/admin/jobs/{id}",
            get(admin::job_detail_handler).delete(admin::delete_job_handler),
        )
        .route("/api/admin/runners", get(admin::list_runners_handler))
        .route("/api/admin/runners/{id}", get(admin::runner_detail_handler))
        .layer(cors)
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "service": SERVICE_NAME }))
}
