//! Periodic removal of idle buckets.

use crate::rate_limiter::RateLimiterRegistry;
use crate::store::BucketStore;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Spawns a task that sweeps `registry` every `interval`, dropping buckets
/// idle for longer than `max_age`.
///
/// The task exits when `shutdown` flips to `true` or its sender is dropped.
pub fn spawn_sweeper<S>(
    registry: RateLimiterRegistry<S>,
    interval: Duration,
    max_age: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    S: BucketStore + 'static,
{
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        info!(interval = ?interval, max_age = ?max_age, "Bucket sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match registry.remove_stale_buckets(max_age) {
                        Ok(removed) => debug!(removed, "Sweep finished"),
                        Err(e) => warn!(error = %e, "Sweep failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Bucket sweeper stopped");
    })
}
