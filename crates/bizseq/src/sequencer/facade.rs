use crate::{
    Allocator, Error, MAX_STEP, MIN_STEP, Result, Segment, SegmentRow, SequencerConfig, Store,
};
use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(feature = "tracing")]
use tracing::instrument;

/// A contiguous block handed out by [`Sequencer::get_segment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRange {
    /// Always `true`; every backend can reserve ranges directly.
    pub supported: bool,
    /// First value, inclusive. `0` for a capability probe.
    pub from: u64,
    /// Last value, inclusive. `0` for a capability probe.
    pub to: u64,
}

impl SegmentRange {
    const PROBE: Self = Self {
        supported: true,
        from: 0,
        to: 0,
    };

    /// Number of values in the range; `0` for a capability probe.
    pub const fn len(&self) -> u64 {
        if self.to == 0 {
            0
        } else {
            self.to - self.from + 1
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for SegmentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

/// The public surface of the allocator.
///
/// ```no_run
/// use bizseq::{Sequencer, SequencerConfig};
///
/// # async fn run() -> bizseq::Result<()> {
/// let sequencer = Sequencer::init(SequencerConfig::default()).await?;
/// let id = sequencer.get_next_id("order").await?;
/// let block = sequencer.get_segment("order", 100).await?;
/// assert!(block.from > id);
/// sequencer.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Sequencer {
    allocator: Allocator,
    closed: AtomicBool,
}

impl Sequencer {
    /// Validates `config`, connects its backend, checks the `bigger_than`
    /// guard and starts the background tasks.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfiguration`] for bad settings or a violated guard.
    /// - [`Error::StoreUnavailable`] if the backend cannot be reached.
    pub async fn init(config: SequencerConfig) -> Result<Self> {
        config.validate()?;
        let store = config.backend.connect().await?;
        Self::start(config, store).await
    }

    /// Like [`Self::init`], but with a store built by the caller.
    pub async fn with_store(config: SequencerConfig, store: Arc<dyn Store>) -> Result<Self> {
        config.validate()?;
        Self::start(config, store).await
    }

    async fn start(config: SequencerConfig, store: Arc<dyn Store>) -> Result<Self> {
        if let Err(e) = check_bigger_than(store.as_ref(), &config.bigger_than).await {
            let _ = store.close().await;
            return Err(e);
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            backend = config.backend.name(),
            step = config.default_step,
            workers = config.preload_workers,
            "Sequencer started"
        );

        Ok(Self {
            allocator: Allocator::start(store, &config),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Shutdown);
        }
        Ok(())
    }

    /// Returns the next id for `key`, registering the key on first use.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] for an empty key.
    /// - [`Error::SegmentNotReady`] / [`Error::StoreUnavailable`] when no
    ///   segment could be made available within the wait timeout.
    /// - [`Error::Shutdown`] after [`Self::close`].
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub async fn get_next_id(&self, key: &str) -> Result<u64> {
        self.ensure_open()?;
        require_key(key)?;
        self.allocator.next_id(key).await
    }

    /// Reserves `size` contiguous values for `key` in one store round trip.
    ///
    /// `size == 0` only probes for support and allocates nothing. The range
    /// bypasses the key cache, so it never overlaps ids from
    /// [`Self::get_next_id`].
    pub async fn get_segment(&self, key: &str, size: u32) -> Result<SegmentRange> {
        self.ensure_open()?;
        require_key(key)?;
        if size == 0 {
            return Ok(SegmentRange::PROBE);
        }
        if size > MAX_STEP {
            return Err(Error::request(format!(
                "segment size {size} exceeds {MAX_STEP}"
            )));
        }

        let row = self
            .allocator
            .store()
            .reserve_exact(key, size, self.allocator.default_step())
            .await?;
        let segment = Segment::from_reservation(row.max_id, size).ok_or_else(|| {
            Error::store(key, format!("inconsistent high-water mark {}", row.max_id))
        })?;

        Ok(SegmentRange {
            supported: true,
            from: segment.min(),
            to: segment.max(),
        })
    }

    /// Reads the persisted row for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownKey`] if the key was never registered.
    pub async fn describe(&self, key: &str) -> Result<SegmentRow> {
        self.ensure_open()?;
        require_key(key)?;
        self.allocator
            .store()
            .get(key)
            .await?
            .ok_or_else(|| Error::unknown(key))
    }

    /// Registers a new key.
    ///
    /// A zero `step` or `max_id` is replaced by `1`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] for an empty tag or description, a
    /// step above [`MAX_STEP`], or a tag that is already registered.
    pub async fn create_key(&self, mut row: SegmentRow) -> Result<()> {
        self.ensure_open()?;
        require_key(&row.biz_tag)?;
        if row.description.trim().is_empty() {
            return Err(Error::request("description must not be empty"));
        }
        if row.step > MAX_STEP {
            return Err(Error::request(format!(
                "step {} exceeds {MAX_STEP}",
                row.step
            )));
        }
        if row.step == 0 {
            row.step = MIN_STEP;
        }
        if row.max_id == 0 {
            row.max_id = 1;
        }

        self.allocator.store().create(&row).await?;

        #[cfg(feature = "tracing")]
        tracing::info!(key = %row.biz_tag, step = row.step, max_id = row.max_id, "Registered biz tag");
        Ok(())
    }

    /// Raises the high-water mark of `key` to at least `start`, registering
    /// the key if needed, and sets the step its reservations advance by. A
    /// `step` of `0` uses the configured default and a `start` of `0` is
    /// treated as `1`.
    ///
    /// Any cached segments for the key are dropped, so the next id is drawn
    /// at or above `start`.
    pub async fn init_max_id(&self, key: &str, start: u64, step: u32) -> Result<()> {
        self.ensure_open()?;
        require_key(key)?;
        let start = start.max(1);
        let step = if step == 0 {
            self.allocator.default_step()
        } else {
            step
        };
        if step > MAX_STEP {
            return Err(Error::request(format!("step {step} exceeds {MAX_STEP}")));
        }

        self.allocator.store().init_max_id(key, start, step).await?;
        self.allocator.forget(key);

        #[cfg(feature = "tracing")]
        tracing::info!(key, start, step, "Seeded high-water mark");
        Ok(())
    }

    /// Keys that currently hold a live cache.
    pub fn cached_keys(&self) -> Vec<String> {
        self.allocator.cached_keys()
    }

    pub const fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stops the janitor and preload workers and closes the store.
    ///
    /// Safe to call more than once; only the first call does anything.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Closing sequencer");

        self.allocator.shutdown().await;
        self.allocator.store().close().await
    }
}

fn require_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::request("biz tag must not be empty"));
    }
    Ok(())
}

/// Fails if any guarded key would next reserve a value below its minimum.
async fn check_bigger_than(store: &dyn Store, guards: &HashMap<String, u64>) -> Result<()> {
    for (key, &min) in guards {
        if min == 0 {
            continue;
        }
        let next = store.get(key).await?.map_or(0, |row| row.max_id);
        if next < min {
            return Err(Error::config(format!(
                "bigger_than violated for `{key}`: next value {next} is below {min}"
            )));
        }
    }
    Ok(())
}
