use super::registry::Registry;
use core::time::Duration;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

/// Time left until the next wall-clock multiple of `period` since the Unix
/// epoch. A 20 minute period fires at :00, :20 and :40.
pub(crate) fn until_next_boundary(period: Duration) -> Duration {
    let period_nanos = period.as_nanos().max(1);
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let left = period_nanos - since_epoch % period_nanos;
    Duration::from_nanos(u64::try_from(left).unwrap_or(u64::MAX))
}

/// Spawns the eviction task. It sweeps `registry` on every wall-clock
/// boundary of `period` until `shutdown_token` is cancelled.
pub(crate) fn spawn_janitor(
    registry: Arc<Registry>,
    period: Duration,
    idle: Duration,
    shutdown_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = Instant::now() + until_next_boundary(period);
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = shutdown_token.cancelled() => break,
                _ = ticker.tick() => {
                    let _evicted = registry.evict_idle(Instant::now(), idle);
                    #[cfg(feature = "tracing")]
                    {
                        if !_evicted.is_empty() {
                            tracing::info!(
                                evicted = _evicted.len(),
                                remaining = registry.len(),
                                "Janitor evicted idle key caches: {_evicted:?}"
                            );
                        }
                    }
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Janitor stopped");
    })
}
