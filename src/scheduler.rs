use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use crate::engine::Engine;

/// Background task that periodically expands active recurring series.
/// Runs until the shutdown flag flips.
pub async fn run_expander(
    engine: Arc<Engine>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("expander shutting down");
                    return;
                }
                continue;
            }
        }
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        // The pass itself watches the flag between series, so a shutdown
        // raised mid-sweep does not wait for the whole fleet.
        let reports = engine.run_expansion_pass(now, Some(&shutdown)).await;
        let created: usize = reports.iter().map(|r| r.created.len()).sum();
        if created > 0 {
            info!(series = reports.len(), created, "expansion sweep");
        }
    }
}
