use super::janitor::spawn_janitor;
use super::preload::{PreloadLimits, PreloadPool, reserve_segment};
use super::registry::Registry;
use crate::segment::TakeStatus;
use crate::{Error, KeyCache, Result, SequencerConfig, Store};
use core::time::Duration;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
#[cfg(feature = "tracing")]
use tracing::instrument;

/// Hands out ids for any number of business keys.
///
/// Owns the key map, the preload pool and the janitor. Each key gets its own
/// [`KeyCache`] on first use, seeded by one synchronous reservation; after
/// that the store is only touched by background preloads. Every reservation
/// is sized by the step registered on the key's row; `default_step` only
/// applies to keys the store registers on the fly.
///
/// Must be started inside a Tokio runtime.
pub struct Allocator {
    store: Arc<dyn Store>,
    registry: Arc<Registry>,
    pool: PreloadPool,
    default_step: u32,
    wait_timeout: Duration,
    idle_timeout: Duration,
    janitor_token: CancellationToken,
    janitor: Mutex<Option<JoinHandle<()>>>,
}

impl Allocator {
    /// Spawns the preload workers and the janitor. `config` is assumed to be
    /// validated.
    pub fn start(store: Arc<dyn Store>, config: &SequencerConfig) -> Self {
        let registry = Arc::new(Registry::default());
        let pool = PreloadPool::spawn(
            &store,
            config.preload_workers,
            config.preload_queue,
            PreloadLimits {
                deadline: config.preload_timeout,
                attempts: config.preload_retries,
            },
        );

        let janitor_token = CancellationToken::new();
        let janitor = spawn_janitor(
            Arc::clone(&registry),
            config.janitor_interval,
            config.idle_timeout,
            janitor_token.clone(),
        );

        Self {
            store,
            registry,
            pool,
            default_step: config.default_step,
            wait_timeout: config.wait_timeout,
            idle_timeout: config.idle_timeout,
            janitor_token,
            janitor: Mutex::new(Some(janitor)),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub const fn default_step(&self) -> u32 {
        self.default_step
    }

    /// Returns the cache for `key`, creating and seeding it on first access.
    ///
    /// Concurrent first accesses may each reserve a seed segment, but only
    /// one cache is ever inserted; the others are discarded along with their
    /// (never issued) values.
    pub async fn key_cache(&self, key: &str) -> Result<Arc<KeyCache>> {
        if let Some(cache) = self.registry.get(key) {
            return Ok(cache);
        }

        let first = reserve_segment(self.store.as_ref(), key, self.default_step).await?;
        let step = u32::try_from(first.len()).unwrap_or(self.default_step);
        let cache = self.registry.get_or_insert(KeyCache::new(key, step, first));

        #[cfg(feature = "tracing")]
        tracing::debug!(key, %first, "Created key cache");

        Ok(cache)
    }

    /// Takes the next id for `key`.
    ///
    /// Never blocks while the active or standby segment has values left. When
    /// both are empty the caller parks until a preload lands or the wait
    /// timeout elapses.
    ///
    /// # Errors
    ///
    /// - [`Error::SegmentNotReady`] if no segment arrived in time.
    /// - [`Error::StoreUnavailable`] if the key could not be seeded, or if the
    ///   wait timed out after the latest preload failed.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub async fn next_id(&self, key: &str) -> Result<u64> {
        let cache = self.key_cache(key).await?;
        let deadline = Instant::now() + self.wait_timeout;

        loop {
            let take = cache.try_take(true);
            if take.preload {
                self.schedule_preload(&cache);
            }
            match take.status {
                TakeStatus::Ready { id } => return Ok(id),
                TakeStatus::Pending { wake: Some(wake) } => {
                    if timeout_at(deadline, wake).await.is_err() {
                        break;
                    }
                }
                TakeStatus::Pending { wake: None } => break,
            }
        }

        // The deadline passed; one last look before giving up.
        cache.forget_closed_waiters();
        let take = cache.try_take(false);
        if take.preload {
            self.schedule_preload(&cache);
        }
        match take.status {
            TakeStatus::Ready { id } => Ok(id),
            TakeStatus::Pending { .. } => Err(cache
                .last_error()
                .unwrap_or_else(|| Error::not_ready(key))),
        }
    }

    fn schedule_preload(&self, cache: &Arc<KeyCache>) {
        #[cfg(feature = "tracing")]
        tracing::trace!(key = cache.key(), "Preload triggered");

        if let Err(e) = self.pool.submit(Arc::clone(cache)) {
            #[cfg(feature = "tracing")]
            tracing::warn!(key = cache.key(), "Could not schedule preload: {e}");
            cache.abandon_preload(e);
        }
    }

    /// Runs one janitor sweep now. Returns the evicted keys.
    pub fn sweep_idle(&self) -> Vec<String> {
        self.registry.evict_idle(Instant::now(), self.idle_timeout)
    }

    /// Keys that currently hold a live cache.
    pub fn cached_keys(&self) -> Vec<String> {
        self.registry.keys()
    }

    /// Drops the cache for `key` so its next id comes from a fresh
    /// reservation. Values left in the dropped segments are never issued.
    pub fn forget(&self, key: &str) -> bool {
        self.registry.remove(key).is_some()
    }

    /// The live cache for `key`, without creating one.
    pub fn cache(&self, key: &str) -> Option<Arc<KeyCache>> {
        self.registry.get(key)
    }

    /// Stops the janitor and the preload pool, then drops every cache.
    pub async fn shutdown(&self) {
        self.janitor_token.cancel();
        let janitor = self.janitor.lock().take();
        if let Some(handle) = janitor {
            if let Err(_e) = handle.await {
                #[cfg(feature = "tracing")]
                tracing::error!("Janitor task failed: {_e}");
            }
        }

        self.pool.shutdown().await;
        self.registry.clear();

        #[cfg(feature = "tracing")]
        tracing::info!("Allocator shutdown complete");
    }
}
