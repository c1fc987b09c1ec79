use crate::{Error, MemoryStore, Result, SegmentRow, Store};
use async_trait::async_trait;
use core::time::Duration;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// A [`MemoryStore`] whose reservations can be slowed down or made to fail.
#[derive(Debug, Default)]
pub(crate) struct ScriptedStore {
    inner: MemoryStore,
    delay: Duration,
    failures: AtomicU32,
    reservations: AtomicUsize,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Makes the next `n` reservations fail.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Counts one reservation, applies the delay and fails if scripted to.
    async fn play(&self, key: &str) -> Result<()> {
        self.reservations.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::store(key, "injected failure"));
        }
        Ok(())
    }

    /// Reservation attempts so far, failed ones included.
    pub fn reservations(&self) -> usize {
        self.reservations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Store for ScriptedStore {
    async fn reserve_next(&self, key: &str, default_step: u32) -> Result<SegmentRow> {
        self.play(key).await?;
        self.inner.reserve_next(key, default_step).await
    }

    async fn reserve_exact(&self, key: &str, count: u32, default_step: u32) -> Result<SegmentRow> {
        self.play(key).await?;
        self.inner.reserve_exact(key, count, default_step).await
    }

    async fn init_max_id(&self, key: &str, start: u64, step: u32) -> Result<()> {
        self.inner.init_max_id(key, start, step).await
    }

    async fn get(&self, key: &str) -> Result<Option<SegmentRow>> {
        self.inner.get(key).await
    }

    async fn create(&self, row: &SegmentRow) -> Result<()> {
        self.inner.create(row).await
    }
}
