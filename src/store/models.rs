use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Claimed,
    InProgress,
    Completed,
    Failed,
    /// Never stored: reported when a completed job fails its freshness probe
    /// and is deleted.
    Expired,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Claimed => "claimed",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "claimed" => Some(JobStatus::Claimed),
            "in_progress" => Some(JobStatus::InProgress),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "expired" => Some(JobStatus::Expired),
            _ => None,
        }
    }

    /// Live states accept heartbeats and terminal transitions.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Claimed | JobStatus::InProgress
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted job row. `input_params` and `output_data` are opaque
/// serialized JSON; the store never parses them.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: String,
    pub job_hash: String,
    pub job_type: String,
    pub input_params: String,
    pub status: JobStatus,
    pub created_at: i64,
    pub updated_at: i64,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<i64>,
    pub progress_current: Option<i64>,
    pub progress_total: Option<i64>,
    pub console_output: Option<String>,
    pub output_data: Option<String>,
    pub error_message: Option<String>,
    pub last_heartbeat: Option<i64>,
}

impl Job {
    pub fn input_params_value(&self) -> Value {
        serde_json::from_str(&self.input_params).unwrap_or(Value::Null)
    }

    pub fn output_data_value(&self) -> Option<Value> {
        self.output_data
            .as_deref()
            .map(|raw| serde_json::from_str(raw).unwrap_or(Value::Null))
    }
}

/// A registered runner. Capabilities are a JSON array of job_type strings.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Runner {
    pub id: String,
    pub name: String,
    pub capabilities: String,
    pub registered_at: i64,
    pub last_seen: i64,
}

impl Runner {
    pub fn capability_list(&self) -> Vec<String> {
        serde_json::from_str(&self.capabilities).unwrap_or_default()
    }

    /// Activeness is derived from last_seen, never stored.
    pub fn is_active(&self, window: Duration, now_ms: i64) -> bool {
        now_ms - self.last_seen < window.as_millis() as i64
    }
}
