//! Background health loop: periodically rescans the session pool and
//! demotes sessions whose effective status has drifted from their stored
//! one.
//!
//! A long-lived task driven by an interval timer, cancellable via a shared
//! [`CancellationToken`], that logs and keeps going on a single bad tick
//! rather than tearing down the process.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::session_pool::SessionPool;
use crate::config::ProxyConfig;

/// Runs the health loop until `cancellation_token` fires.
///
/// Each tick: reload the projection from the store, run one classifier
/// pass, and record the resulting gauges. A scan already in flight when
/// cancellation is requested is allowed to finish before the task returns,
/// so a demotion a scan already decided on is never lost.
pub async fn run(pool: SessionPool, config: Arc<ProxyConfig>, cancellation_token: CancellationToken) {
    let mut interval = tokio::time::interval(config.health_check_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => {
                info!("health loop shutting down");
                return;
            }
            _ = interval.tick() => {
                if let Err(err) = pool.reload().await {
                    warn!(error = %err, "health loop: reload from persistence failed, scanning stale projection");
                }
                match pool.run_classifier_pass().await {
                    Ok(demotions) if demotions > 0 => {
                        info!(demotions, "health loop: demoted sessions");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "health loop: classifier pass failed");
                    }
                }
                let stats = pool.stats();
                info!(
                    healthy = stats.healthy,
                    quarantined = stats.quarantined,
                    expired = stats.expired,
                    revoked = stats.revoked,
                    avg_failure_rate = stats.avg_failure_rate,
                    "health loop: scan complete"
                );
            }
        }
    }
}
