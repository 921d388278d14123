use std::time::Duration;

/// Size caps applied to job payloads before they reach the store.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_input_bytes: usize,
    pub max_output_bytes: usize,
    pub max_console_bytes: usize,
    pub max_error_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_input_bytes: 100 * 1024,
            max_output_bytes: 500 * 1024,
            max_console_bytes: 1024 * 1024,
            max_error_bytes: 10 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Bearer token accepted on the client submit/status endpoints.
    pub submit_key: String,
    /// Bearer token accepted on the runner endpoints.
    pub runner_key: String,
    /// Bearer token accepted on the admin endpoints (the runner key is also
    /// accepted there).
    pub admin_key: String,
    /// Notification relay endpoint; notification is disabled when unset.
    pub notify_url: Option<String>,
    /// Publish key sent to the notification relay.
    pub notify_key: Option<String>,
    /// A claimed or in-progress job with no heartbeat for this long is failed.
    pub heartbeat_timeout: Duration,
    /// Cadence of the stale-heartbeat sweeper. Must not exceed the timeout.
    pub sweep_interval: Duration,
    /// A runner is considered active if seen within this window.
    pub runner_active_window: Duration,
    /// Per-request timeout for freshness probe fetches.
    pub probe_timeout: Duration,
    pub limits: Limits,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            submit_key: "dev-submit-key".to_string(),
            runner_key: "dev-runner-key".to_string(),
            admin_key: "dev-admin-key".to_string(),
            notify_url: None,
            notify_key: None,
            heartbeat_timeout: Duration::from_secs(90),
            sweep_interval: Duration::from_secs(30),
            runner_active_window: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(10),
            limits: Limits::default(),
        }
    }
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// The three credential keys are required; everything else falls back to
    /// the defaults above. Notification stays disabled unless both
    /// `RUNPACK_NOTIFY_URL` and `RUNPACK_NOTIFY_KEY` are present.
    pub fn from_env() -> Result<Self, String> {
        let defaults = Config::default();

        Ok(Self {
            submit_key: require_env("RUNPACK_SUBMIT_KEY")?,
            runner_key: require_env("RUNPACK_RUNNER_KEY")?,
            admin_key: require_env("RUNPACK_ADMIN_KEY")?,
            notify_url: std::env::var("RUNPACK_NOTIFY_URL").ok(),
            notify_key: std::env::var("RUNPACK_NOTIFY_KEY").ok(),
            heartbeat_timeout: env_secs(
                "RUNPACK_HEARTBEAT_TIMEOUT_SECS",
                defaults.heartbeat_timeout,
            ),
            sweep_interval: env_secs("RUNPACK_SWEEP_INTERVAL_SECS", defaults.sweep_interval),
            runner_active_window: env_secs(
                "RUNPACK_RUNNER_ACTIVE_WINDOW_SECS",
                defaults.runner_active_window,
            ),
            probe_timeout: env_secs("RUNPACK_PROBE_TIMEOUT_SECS", defaults.probe_timeout),
            limits: Limits {
                max_input_bytes: env_usize(
                    "RUNPACK_MAX_INPUT_BYTES",
                    defaults.limits.max_input_bytes,
                ),
                max_output_bytes: env_usize(
                    "RUNPACK_MAX_OUTPUT_BYTES",
                    defaults.limits.max_output_bytes,
                ),
                max_console_bytes: env_usize(
                    "RUNPACK_MAX_CONSOLE_BYTES",
                    defaults.limits.max_console_bytes,
                ),
                max_error_bytes: env_usize(
                    "RUNPACK_MAX_ERROR_BYTES",
                    defaults.limits.max_error_bytes,
                ),
            },
        })
    }
}

fn require_env(key: &str) -> Result<String, String> {
    std::env::var(key).map_err(|_| format!("missing required environment variable {key}"))
}

fn env_secs(key: &str, default: Duration) -> Duration {
    match std::env::var(key).ok().and_then(|v| v.parse::<u64>().ok()) {
        Some(secs) => Duration::from_secs(secs),
        None => default,
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}
