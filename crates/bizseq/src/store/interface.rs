use crate::{Result, SegmentRow};
use async_trait::async_trait;

/// The durable side of the allocator: one high-water mark per business key.
///
/// Implementations must make [`Store::reserve_next`] atomic with respect to
/// every other writer of the same key, in this process or any other. Two
/// reservations for one key must never return overlapping ranges.
///
/// Backend failures are rolled back locally and surfaced as
/// [`Error::StoreUnavailable`]. Native driver errors never escape.
///
/// [`Error::StoreUnavailable`]: crate::Error::StoreUnavailable
#[async_trait]
pub trait Store: Send + Sync {
    /// Atomically advances the high-water mark of `key` by the step stored
    /// on its row and returns the updated row.
    ///
    /// The returned `row.step` is the number of values just reserved, so the
    /// range is `[row.max_id - row.step, row.max_id - 1]`. Whether a key
    /// without a row is created on the fly is backend-specific; if it is, the
    /// new row is registered with `default_step`.
    async fn reserve_next(&self, key: &str, default_step: u32) -> Result<SegmentRow>;

    /// Like [`Store::reserve_next`], but advances by exactly `count` values
    /// whatever step the row is registered with. The persisted step is left
    /// alone.
    async fn reserve_exact(&self, key: &str, count: u32, default_step: u32) -> Result<SegmentRow>;

    /// Seeds `key` so its next reservation starts at `start` or later.
    ///
    /// Never lowers an existing high-water mark, so repeating the call is a
    /// no-op. Administrative only; not on the hot path.
    async fn init_max_id(&self, key: &str, start: u64, step: u32) -> Result<()>;

    /// Reads the persisted row for `key`.
    async fn get(&self, key: &str) -> Result<Option<SegmentRow>>;

    /// Registers a new key. Fails with `InvalidRequest` if it already exists.
    async fn create(&self, row: &SegmentRow) -> Result<()>;

    /// Releases connections held by the store.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
