use crate::{Error, MIN_STEP, Result, SegmentRow, Store, row::unix_now};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

/// A process-local [`Store`] backed by a mutex-guarded map.
///
/// Nothing survives a restart, so this is only suitable for tests, local
/// development and single-process deployments that do not need durable IDs.
/// Unknown keys are registered on their first reservation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<String, SegmentRow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    /// Moves the mark of `key` by `count`, or by the row's own step.
    fn advance(&self, key: &str, count: Option<u32>, default_step: u32) -> Result<SegmentRow> {
        let mut rows = self.rows.lock();
        let row = rows
            .entry(key.to_owned())
            .or_insert_with(|| SegmentRow::new(key, default_step));

        let step = count.unwrap_or(row.step).max(MIN_STEP);
        row.max_id = row
            .max_id
            .checked_add(u64::from(step))
            .ok_or_else(|| Error::store(key, "high-water mark overflow"))?;
        row.update_time = unix_now();

        let mut reserved = row.clone();
        reserved.step = step;
        Ok(reserved)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn reserve_next(&self, key: &str, default_step: u32) -> Result<SegmentRow> {
        self.advance(key, None, default_step)
    }

    async fn reserve_exact(&self, key: &str, count: u32, default_step: u32) -> Result<SegmentRow> {
        self.advance(key, Some(count), default_step)
    }

    async fn init_max_id(&self, key: &str, start: u64, step: u32) -> Result<()> {
        let mut rows = self.rows.lock();
        let row = rows
            .entry(key.to_owned())
            .or_insert_with(|| SegmentRow::new(key, step).with_max_id(start));

        row.max_id = row.max_id.max(start);
        row.step = step;
        row.update_time = unix_now();
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<SegmentRow>> {
        Ok(self.rows.lock().get(key).cloned())
    }

    async fn create(&self, row: &SegmentRow) -> Result<()> {
        let mut rows = self.rows.lock();
        if rows.contains_key(&row.biz_tag) {
            return Err(Error::request(format!(
                "biz tag `{}` is already registered",
                row.biz_tag
            )));
        }
        let mut row = row.clone();
        row.update_time = unix_now();
        rows.insert(row.biz_tag.clone(), row);
        Ok(())
    }
}
