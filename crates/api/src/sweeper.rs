//! Background reaper for unredeemed artifacts.
//!
//! A completed job whose artifact is never downloaded would otherwise
//! hold disk and a store entry forever. The sweeper periodically removes
//! terminal jobs older than the configured TTL, artifact included.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use prebake_core::store::JobStore;

/// How often the sweep runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Run until `cancel` fires, reaping expired terminal jobs every tick.
pub async fn run(store: Arc<dyn JobStore>, artifact_ttl_secs: i64, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => sweep(store.as_ref(), artifact_ttl_secs).await,
            _ = cancel.cancelled() => {
                tracing::debug!("Artifact sweeper stopped");
                return;
            }
        }
    }
}

/// One pass: drop every terminal job that completed more than
/// `artifact_ttl_secs` ago, deleting its artifact file if present.
pub async fn sweep(store: &dyn JobStore, artifact_ttl_secs: i64) {
    let cutoff = chrono::Utc::now() - chrono::Duration::seconds(artifact_ttl_secs);
    for job_id in store.terminal_before(cutoff) {
        let Some(record) = store.remove(job_id) else {
            continue;
        };
        if let Some(path) = &record.artifact_path {
            if let Err(err) = tokio::fs::remove_file(path).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(job_id = %job_id, error = %err, "Failed to remove expired artifact");
                }
            }
        }
        tracing::info!(job_id = %job_id, stage = record.stage.as_str(), "Reaped expired job");
    }
}
