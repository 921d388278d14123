//! Stale-heartbeat sweeper.
//!
//! Runners report liveness through heartbeats; a claimed or in-progress job
//! whose runner goes quiet past the threshold is failed so the work is not
//! stranded. The sweep runs once at startup and then on a cadence at most
//! equal to the threshold.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::store::JobStore;

pub async fn run_sweeper(
    store: JobStore,
    interval: Duration,
    threshold: Duration,
    shutdown: CancellationToken,
) {
    tracing::info!(
        interval_secs = interval.as_secs(),
        threshold_secs = threshold.as_secs(),
        "Starting stale-heartbeat sweeper"
    );

    // The first tick fires immediately, covering the startup sweep.
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match store.sweep_stale(threshold).await {
                    Ok(0) => {}
                    Ok(swept) => {
                        tracing::warn!(swept, "Failed jobs with stale heartbeats");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Stale-heartbeat sweep failed");
                    }
                }
            }
            _ = shutdown.cancelled() => {
                tracing::info!("Sweeper shutting down");
                break;
            }
        }
    }
}
