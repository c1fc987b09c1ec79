use std::time::{SystemTime, UNIX_EPOCH};

/// Largest step a key may be registered with.
pub const MAX_STEP: u32 = 10_000_000;

/// Step used when a key is registered without one.
pub const MIN_STEP: u32 = 1;

/// The persisted record for one business key.
///
/// `max_id` is the high-water mark: the first value that has *not* been
/// reserved yet. A reservation of `n` values moves it forward by exactly `n`
/// and hands out `[max_id - n, max_id - 1]`. A freshly registered key starts
/// at `max_id = 1`, so its first segment begins at `1`.
///
/// Rows are owned by the [`Store`]; everything else only ever sees copies.
///
/// [`Store`]: crate::Store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRow {
    pub biz_tag: String,
    pub max_id: u64,
    pub step: u32,
    pub description: String,
    /// Seconds since the Unix epoch of the last mutation.
    pub update_time: u64,
}

impl SegmentRow {
    /// Creates a row for `biz_tag` that has never reserved anything.
    pub fn new(biz_tag: impl Into<String>, step: u32) -> Self {
        Self {
            biz_tag: biz_tag.into(),
            max_id: 1,
            step,
            description: String::new(),
            update_time: unix_now(),
        }
    }

    /// Sets the human-readable description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the starting high-water mark.
    #[must_use]
    pub const fn with_max_id(mut self, max_id: u64) -> Self {
        self.max_id = max_id;
        self
    }

    /// The largest value ever reserved for this key, or `0` if none.
    pub const fn high_water_mark(&self) -> u64 {
        self.max_id.saturating_sub(1)
    }
}

/// Seconds since the Unix epoch, saturating to `0` on a pre-epoch clock.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
