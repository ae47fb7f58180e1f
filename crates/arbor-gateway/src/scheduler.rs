//! Periodic cleanup jobs.
//!
//! Three loops run until shutdown: a one-minute durable-lock sweep, a
//! five-minute session/hybrid sweep across all active canvases, and the
//! activity retention job. Each tick is independent; a failing tick logs
//! and waits for the next.

use std::time::Duration;

use arbor_core::{CollabError, CollabResult};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Gateway;

/// Cadence of the periodic jobs.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Interval of the expired-durable-lock sweep.
    pub lock_sweep: Duration,
    /// Interval of the session deactivation + per-canvas hybrid cleanup.
    pub hybrid_sweep: Duration,
    /// Interval of the activity retention job.
    pub retention_sweep: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lock_sweep: Duration::from_secs(60),
            hybrid_sweep: Duration::from_secs(5 * 60),
            retention_sweep: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// One full session sweep: release lapsed durable locks, then deactivate
/// idle sessions and scan every active canvas. Returns the lock count
/// cleared.
pub(crate) async fn run_session_sweep(gateway: &Gateway) -> CollabResult<u64> {
    let cleared = gateway.collab.release_expired_durable_locks().await?;
    gateway.collab.run_hybrid_cleanup().await?;
    Ok(cleared)
}

/// Spawn the three job loops.
pub(crate) fn spawn_periodic_jobs(
    gateway: Gateway,
    config: SchedulerConfig,
    shutdown: CancellationToken,
) {
    spawn_loop(
        "durable-lock-sweep",
        config.lock_sweep,
        shutdown.clone(),
        gateway.clone(),
        |gateway| async move {
            gateway
                .collab
                .release_expired_durable_locks()
                .await
                .map(|_| ())
        },
    );

    spawn_loop(
        "hybrid-cleanup",
        config.hybrid_sweep,
        shutdown.clone(),
        gateway.clone(),
        |gateway| async move { gateway.collab.run_hybrid_cleanup().await },
    );

    spawn_loop(
        "activity-retention",
        config.retention_sweep,
        shutdown,
        gateway,
        |gateway| async move {
            gateway
                .activity
                .cleanup_old_activities(None)
                .await
                .map(|_| ())
                .map_err(|e| CollabError::Internal(e.to_string()))
        },
    );
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    gateway: Gateway,
    tick: F,
) where
    F: Fn(Gateway) -> Fut + Send + 'static,
    Fut: Future<Output = CollabResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so boot stays quiet.
        interval.tick().await;
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    info!(job = name, "periodic job shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(err) = tick(gateway.clone()).await {
                        warn!(%err, job = name, "periodic job tick failed");
                    }
                }
            }
        }
    });
}
