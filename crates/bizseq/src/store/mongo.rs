//! MongoDB high-water mark store.
//!
//! Each business key is one document:
//!
//! ```json
//! { "_id": "<biz_tag>", "sequencer_value": 1000, "step": 1000, "description": "", "update_time": 1700000000 }
//! ```
//!
//! `sequencer_value` is the last value handed out, so it is always one below
//! the shared [`SegmentRow::max_id`] meaning. Reservations are a single
//! `findOneAndUpdate` with `$inc` and `upsert`, run inside a transaction with
//! snapshot read concern and majority write concern so the returned counter is
//! authoritative across replica-set failover. The increment is the step read
//! from the document inside the same transaction, or an explicit count for
//! [`Store::reserve_exact`].

use crate::{Error, MIN_STEP, MongoConfig, Result, SegmentRow, Store, row::unix_now};
use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{ReadConcern, ReturnDocument, WriteConcern};
use mongodb::{Client, ClientSession, Collection};
use serde::{Deserialize, Serialize};
#[cfg(feature = "tracing")]
use tracing::instrument;

const DUPLICATE_KEY: i32 = 11000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(super) struct SequencerDocument {
    #[serde(rename = "_id")]
    pub id: String,
    /// Last value handed out.
    pub sequencer_value: i64,
    #[serde(default)]
    pub step: i32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub update_time: i64,
}

impl SequencerDocument {
    pub fn from_row(row: &SegmentRow) -> Result<Self> {
        Ok(Self {
            id: row.biz_tag.clone(),
            sequencer_value: i64::try_from(row.high_water_mark())
                .map_err(|_| Error::request("max_id exceeds i64::MAX"))?,
            step: step_field(row.step),
            description: row.description.clone(),
            update_time: now_field(),
        })
    }

    pub fn into_row(self) -> Result<SegmentRow> {
        let last = u64::try_from(self.sequencer_value)
            .map_err(|_| Error::store(&self.id, "negative sequencer_value"))?;
        let step = u32::try_from(self.step).map_err(|_| Error::store(&self.id, "negative step"))?;
        let max_id = last
            .checked_add(1)
            .ok_or_else(|| Error::store(&self.id, "sequencer_value overflow"))?;
        Ok(SegmentRow {
            max_id,
            step,
            description: self.description,
            update_time: u64::try_from(self.update_time).unwrap_or_default(),
            biz_tag: self.id,
        })
    }
}

/// The `sequencer_value` that makes the next reservation start at `start`.
pub(super) fn last_value_before(start: u64) -> Result<i64> {
    i64::try_from(start.saturating_sub(1)).map_err(|_| Error::request("start exceeds i64::MAX"))
}

/// [`Store`] backed by a MongoDB collection.
#[derive(Debug, Clone)]
pub struct MongoStore {
    client: Client,
    collection: Collection<SequencerDocument>,
}

impl MongoStore {
    /// Connects to the deployment in `config` and verifies it answers a ping.
    pub async fn connect(config: &MongoConfig) -> Result<Self> {
        let client = Client::with_uri_str(&config.uri)
            .await
            .map_err(|e| Error::store(&config.collection, e))?;

        let database = client.database(&config.database);
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| Error::store(&config.collection, e))?;

        let collection = database.collection::<SequencerDocument>(&config.collection);
        Ok(Self { client, collection })
    }

    /// Runs one reservation in its own transaction.
    async fn reserve(
        &self,
        key: &str,
        count: Option<u32>,
        default_step: u32,
    ) -> Result<SegmentRow> {
        let mut session = self
            .client
            .start_session()
            .await
            .map_err(|e| Error::store(key, e))?;

        session
            .start_transaction()
            .read_concern(ReadConcern::snapshot())
            .write_concern(WriteConcern::majority())
            .await
            .map_err(|e| Error::store(key, e))?;

        match self.increment(&mut session, key, count, default_step).await {
            Ok((document, step)) => {
                session
                    .commit_transaction()
                    .await
                    .map_err(|e| Error::store(key, e))?;
                let mut row = document.ok_or_else(|| Error::unknown(key))?.into_row()?;
                row.step = step;
                Ok(row)
            }
            Err(e) => {
                let _ = session.abort_transaction().await;
                Err(e)
            }
        }
    }

    /// Applies the increment inside `session`'s transaction. Returns the
    /// updated document and the increment applied. Documents without a step
    /// advance by `default_step`.
    async fn increment(
        &self,
        session: &mut ClientSession,
        key: &str,
        count: Option<u32>,
        default_step: u32,
    ) -> Result<(Option<SequencerDocument>, u32)> {
        let step = match count {
            Some(count) => count,
            None => self
                .collection
                .find_one(doc! { "_id": key })
                .session(&mut *session)
                .await
                .map_err(|e| Error::store(key, e))?
                .and_then(|document| u32::try_from(document.step).ok())
                .filter(|&step| step > 0)
                .unwrap_or(default_step),
        }
        .max(MIN_STEP);

        let (now, step_value) = (now_field(), step_field(default_step));
        let updated = self
            .collection
            .find_one_and_update(
                doc! { "_id": key },
                doc! {
                    "$inc": { "sequencer_value": i64::from(step) },
                    "$set": { "update_time": now },
                    "$setOnInsert": { "step": step_value, "description": "" },
                },
            )
            .upsert(true)
            .return_document(ReturnDocument::After)
            .session(&mut *session)
            .await
            .map_err(|e| Error::store(key, e))?;

        Ok((updated, step))
    }
}

#[async_trait]
impl Store for MongoStore {
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    async fn reserve_next(&self, key: &str, default_step: u32) -> Result<SegmentRow> {
        self.reserve(key, None, default_step).await
    }

    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    async fn reserve_exact(&self, key: &str, count: u32, default_step: u32) -> Result<SegmentRow> {
        self.reserve(key, Some(count), default_step).await
    }

    async fn init_max_id(&self, key: &str, start: u64, step: u32) -> Result<()> {
        let last = last_value_before(start)?;
        let (now, step_value) = (now_field(), step_field(step));

        self.collection
            .update_one(
                doc! { "_id": key },
                doc! {
                    "$max": { "sequencer_value": last },
                    "$set": { "step": step_value, "update_time": now },
                    "$setOnInsert": { "description": "" },
                },
            )
            .upsert(true)
            .await
            .map_err(|e| Error::store(key, e))?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<SegmentRow>> {
        self.collection
            .find_one(doc! { "_id": key })
            .await
            .map_err(|e| Error::store(key, e))?
            .map(SequencerDocument::into_row)
            .transpose()
    }

    async fn create(&self, row: &SegmentRow) -> Result<()> {
        let key = row.biz_tag.as_str();
        let document = SequencerDocument::from_row(row)?;

        match self.collection.insert_one(document).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate(&e) => Err(Error::request(format!(
                "biz tag `{key}` is already registered"
            ))),
            Err(e) => Err(Error::store(key, e)),
        }
    }

    async fn close(&self) -> Result<()> {
        self.client.clone().shutdown().await;
        Ok(())
    }
}

fn is_duplicate(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == DUPLICATE_KEY
    )
}

fn step_field(step: u32) -> i32 {
    i32::try_from(step).unwrap_or(i32::MAX)
}

fn now_field() -> i64 {
    i64::try_from(unix_now()).unwrap_or(i64::MAX)
}
