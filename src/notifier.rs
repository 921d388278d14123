//! Best-effort outbound notification on new job creation.
//!
//! The relay is a one-way sink: one POST per created job, no retries, and a
//! failure never fails the submission that triggered it.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::identity::now_ms;
use crate::store::Job;

struct NotifierInner {
    client: reqwest::Client,
    url: String,
    publish_key: String,
}

/// Handle for publishing job events. Cloning is cheap; an unconfigured
/// notifier is inert.
#[derive(Clone, Default)]
pub struct Notifier {
    inner: Option<Arc<NotifierInner>>,
}

impl Notifier {
    /// Build from configuration. Missing relay settings silently disable
    /// notification.
    pub fn from_config(config: &Config) -> Self {
        let inner = match (&config.notify_url, &config.notify_key) {
            (Some(url), Some(key)) => {
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_secs(10))
                    .build()
                    .unwrap_or_default();
                Some(Arc::new(NotifierInner {
                    client,
                    url: url.clone(),
                    publish_key: key.clone(),
                }))
            }
            _ => None,
        };
        Self { inner }
    }

    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Announce a newly created job. Fire and forget: the POST runs on a
    /// detached task and errors are logged and discarded.
    pub fn notify_new_job(&self, job: &Job) {
        let Some(inner) = self.inner.clone() else {
            return;
        };

        let event = serde_json::json!({
            "type": "new_job",
            "job_id": job.id.clone(),
            "job_hash": job.job_hash.clone(),
            "job_type": job.job_type.clone(),
            "timestamp": now_ms(),
        });
        let job_id = job.id.clone();

        tokio::spawn(async move {
            let result = inner
                .client
                .post(&inner.url)
                .bearer_auth(&inner.publish_key)
                .json(&event)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(job_id = %job_id, "Published new_job notification");
                }
                Ok(response) => {
                    tracing::warn!(
                        job_id = %job_id,
                        status = %response.status(),
                        "Notification relay rejected new_job event"
                    );
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "Failed to publish new_job event");
                }
            }
        });
    }
}
