//! Background task for retiring old reply artifacts.

use callrelay_store::ArtifactStore;
use std::time::Duration;
use tokio::time::sleep;

/// Starts a background task that periodically sweeps artifacts older than `max_age`.
///
/// This task runs indefinitely. An `interval` of zero disables it and the
/// function returns immediately.
///
/// # Arguments
///
/// * `store` - The artifact store to sweep.
/// * `max_age` - Artifacts strictly older than this are deleted.
/// * `interval` - Time to wait between sweeps.
pub async fn start_retention_task(store: ArtifactStore, max_age: Duration, interval: Duration) {
    if interval.is_zero() {
        tracing::info!("artifact retention task disabled");
        return;
    }

    tracing::info!(
        interval_seconds = interval.as_secs(),
        max_age_seconds = max_age.as_secs(),
        "starting artifact retention task"
    );

    loop {
        // Sleep first so a restart does not race the telephony layer fetching
        // replies written just before it.
        sleep(interval).await;

        match store.sweep(max_age).await {
            Ok(count) => {
                if count > 0 {
                    tracing::info!(count, "deleted expired artifacts");
                } else {
                    tracing::debug!("no expired artifacts to delete");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to sweep artifacts");
            }
        }
    }
}
