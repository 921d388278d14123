//! Credential checks for the three API roles.
//!
//! Each role is an independent bearer secret. Admin endpoints also accept
//! the runner credential as a convenience for operator tooling. Per-job
//! runner endpoints additionally identify the caller via `X-Runner-ID`.

use axum::http::{header, HeaderMap};

use crate::config::Config;
use crate::error::{HubError, Result};

pub const RUNNER_ID_HEADER: &str = "x-runner-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Submit,
    Runner,
    Admin,
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

pub fn require_role(headers: &HeaderMap, config: &Config, role: Role) -> Result<()> {
    let token = bearer_token(headers)
        .ok_or_else(|| HubError::Auth("Missing or malformed Authorization header".to_string()))?;

    let authorized = match role {
        Role::Submit => token == config.submit_key,
        Role::Runner => token == config.runner_key,
        Role::Admin => token == config.admin_key || token == config.runner_key,
    };

    if authorized {
        Ok(())
    } else {
        Err(HubError::Auth("Invalid bearer token".to_string()))
    }
}

/// The caller's runner identity for per-job runner endpoints.
pub fn runner_id(headers: &HeaderMap) -> Result<String> {
    headers
        .get(RUNNER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| HubError::Validation("Missing X-Runner-ID header".to_string()))
}

/// Identity used for per-IP rate limiting. Honors the first hop of
/// `X-Forwarded-For` when the coordinator sits behind a proxy.
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "local".to_string())
}
