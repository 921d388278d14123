//! Cache-freshness probing for completed jobs.
//!
//! A cached result is only served if every figpack visualization it points
//! at still exists in cloud storage. The probe is isolated behind
//! [`ResultValidator`] so alternative validators can be substituted; the
//! submission path only asks "is the cached result still valid?".

use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;

use crate::identity::now_ms;

#[async_trait]
pub trait ResultValidator: Send + Sync {
    /// Whether a completed job's output may still be served from cache.
    async fn is_fresh(&self, output_data: &Value) -> bool;
}

/// Probes `figpack_url` references by fetching their `figpack.json`
/// manifests. Any fetch error, non-2xx response, parse failure, or URL shape
/// mismatch renders the result stale.
pub struct FigpackProbe {
    client: reqwest::Client,
}

impl FigpackProbe {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn manifest_is_live(&self, manifest_url: &str) -> bool {
        let response = match self.client.get(manifest_url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(url = manifest_url, error = %e, "Freshness probe fetch failed");
                return false;
            }
        };

        if !response.status().is_success() {
            tracing::debug!(
                url = manifest_url,
                status = %response.status(),
                "Freshness probe got non-success status"
            );
            return false;
        }

        let manifest: Value = match response.json().await {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::debug!(url = manifest_url, error = %e, "Freshness probe parse failed");
                return false;
            }
        };

        manifest_live(&manifest)
    }
}

#[async_trait]
impl ResultValidator for FigpackProbe {
    async fn is_fresh(&self, output_data: &Value) -> bool {
        let mut urls = Vec::new();
        collect_figpack_urls(output_data, &mut urls);
        if urls.is_empty() {
            return true;
        }

        let mut manifest_urls = Vec::with_capacity(urls.len());
        for url in &urls {
            match manifest_url(url) {
                Some(manifest) => manifest_urls.push(manifest),
                None => {
                    tracing::debug!(url, "figpack_url has unexpected shape");
                    return false;
                }
            }
        }

        let checks = manifest_urls
            .iter()
            .map(|url| self.manifest_is_live(url));
        join_all(checks).await.into_iter().all(|live| live)
    }
}

/// Recursively collect every string field named `figpack_url`.
pub fn collect_figpack_urls(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key == "figpack_url" {
                    if let Value::String(url) = child {
                        out.push(url.clone());
                    }
                }
                collect_figpack_urls(child, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_figpack_urls(item, out);
            }
        }
        _ => {}
    }
}

/// Derive the manifest location from a figpack URL. The URL must end with
/// `/index.html`; the manifest lives next to it as `figpack.json`.
pub fn manifest_url(figpack_url: &str) -> Option<String> {
    figpack_url
        .strip_suffix("/index.html")
        .map(|base| format!("{base}/figpack.json"))
}

/// A manifest is live iff `deleted` is falsy and the figure is either pinned
/// or carries a numeric expiration in the future.
fn manifest_live(manifest: &Value) -> bool {
    if js_truthy(manifest.get("deleted")) {
        return false;
    }

    if manifest.get("pinned") == Some(&Value::Bool(true)) {
        return true;
    }

    match manifest.get("expiration").and_then(Value::as_f64) {
        Some(expiration) => expiration > now_ms() as f64,
        None => false,
    }
}

fn js_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

/// Validator that never probes; used where no freshness guarantee is needed.
pub struct AlwaysFresh;

#[async_trait]
impl ResultValidator for AlwaysFresh {
    async fn is_fresh(&self, _output_data: &Value) -> bool {
        true
    }
}
