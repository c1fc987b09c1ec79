//! PostgreSQL high-water mark store.
//!
//! One row per business key:
//!
//! ```sql
//! CREATE TABLE biz_alloc (
//!     id          BIGSERIAL PRIMARY KEY,
//!     biz_tag     TEXT      NOT NULL UNIQUE,
//!     max_id      BIGINT    NOT NULL DEFAULT 1,
//!     step        INTEGER   NOT NULL,
//!     description TEXT      NOT NULL DEFAULT '',
//!     update_time BIGINT    NOT NULL
//! );
//! ```
//!
//! # Atomicity
//!
//! A reservation is an UPDATE followed by a SELECT inside one transaction:
//!
//! ```sql
//! BEGIN;
//! UPDATE biz_alloc SET max_id = max_id + GREATEST(step, 1), update_time = $now WHERE biz_tag = $1;
//! SELECT id, biz_tag, max_id, step, description, update_time FROM biz_alloc WHERE biz_tag = $1;
//! COMMIT;
//! ```
//!
//! The UPDATE takes the row lock, so concurrent reservations for the same key
//! serialize and the SELECT observes exactly this transaction's increment.
//! [`Store::reserve_exact`] adds an explicit count instead of the row's step.

use crate::{Error, MIN_STEP, PostgresConfig, Result, SegmentRow, Store, row::unix_now};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
#[cfg(feature = "tracing")]
use tracing::instrument;

pub(super) type RowTuple = (i64, String, i64, i32, String, i64);

/// [`Store`] backed by a PostgreSQL table.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    table: String,
    auto_create: bool,
}

impl PostgresStore {
    /// Connects a pool using `config`.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| Error::store(&config.table, e))?;

        Ok(Self::with_pool(pool, &config.table, config.auto_create))
    }

    /// Wraps an existing pool. `table` must already be a validated identifier.
    pub fn with_pool(pool: PgPool, table: &str, auto_create: bool) -> Self {
        Self {
            pool,
            table: table.to_owned(),
            auto_create,
        }
    }

    /// Creates the allocation table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id          BIGSERIAL PRIMARY KEY,
                biz_tag     TEXT      NOT NULL UNIQUE,
                max_id      BIGINT    NOT NULL DEFAULT 1,
                step        INTEGER   NOT NULL,
                description TEXT      NOT NULL DEFAULT '',
                update_time BIGINT    NOT NULL
            )
            "#,
            self.table
        );
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::store(&self.table, e))?;
        Ok(())
    }

    /// Advances the mark by `count`, or by the row's own step when `None`.
    /// Returns the number of rows touched.
    async fn bump(
        tx: &mut Transaction<'_, Postgres>,
        table: &str,
        key: &str,
        count: Option<u32>,
        now: i64,
    ) -> Result<u64> {
        let increment = if count.is_some() {
            "$3"
        } else {
            "GREATEST(step, 1)"
        };
        let sql = format!(
            "UPDATE {table} SET max_id = max_id + {increment}, update_time = $1 WHERE biz_tag = $2"
        );

        let mut query = sqlx::query(&sql).bind(now).bind(key);
        if let Some(count) = count {
            query = query.bind(i64::from(count));
        }
        let res = query
            .execute(&mut **tx)
            .await
            .map_err(|e| Error::store(key, e))?;

        Ok(res.rows_affected())
    }

    async fn seed(
        tx: &mut Transaction<'_, Postgres>,
        table: &str,
        key: &str,
        step: u32,
        now: i64,
    ) -> Result<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {table} (biz_tag, max_id, step, description, update_time)
            VALUES ($1, 1, $2, '', $3)
            ON CONFLICT (biz_tag) DO NOTHING
            "#
        ))
        .bind(key)
        .bind(step_column(key, step)?)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(|e| Error::store(key, e))?;

        Ok(())
    }

    async fn reserve(
        &self,
        key: &str,
        count: Option<u32>,
        default_step: u32,
    ) -> Result<SegmentRow> {
        let now = now_column();
        // Every early return drops `tx`, which rolls the transaction back.
        let mut tx = self.pool.begin().await.map_err(|e| Error::store(key, e))?;

        let mut affected = Self::bump(&mut tx, &self.table, key, count, now).await?;
        if affected == 0 && self.auto_create {
            Self::seed(&mut tx, &self.table, key, default_step, now).await?;
            affected = Self::bump(&mut tx, &self.table, key, count, now).await?;
        }
        if affected == 0 {
            let _ = tx.rollback().await;
            return Err(Error::unknown(key));
        }

        let row: RowTuple = sqlx::query_as(&self.select_sql())
            .bind(key)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| Error::store(key, e))?;

        tx.commit().await.map_err(|e| Error::store(key, e))?;
        reserved_row(row, count)
    }

    fn select_sql(&self) -> String {
        format!(
            "SELECT id, biz_tag, max_id, step, description, update_time FROM {} WHERE biz_tag = $1",
            self.table
        )
    }
}

#[async_trait]
impl Store for PostgresStore {
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    async fn reserve_next(&self, key: &str, default_step: u32) -> Result<SegmentRow> {
        self.reserve(key, None, default_step).await
    }

    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    async fn reserve_exact(&self, key: &str, count: u32, default_step: u32) -> Result<SegmentRow> {
        self.reserve(key, Some(count), default_step).await
    }

    async fn init_max_id(&self, key: &str, start: u64, step: u32) -> Result<()> {
        let start = i64::try_from(start).map_err(|_| Error::request("start exceeds i64::MAX"))?;
        sqlx::query(&format!(
            r#"
            INSERT INTO {t} (biz_tag, max_id, step, description, update_time)
            VALUES ($1, $2, $3, '', $4)
            ON CONFLICT (biz_tag) DO UPDATE SET
                max_id = GREATEST({t}.max_id, EXCLUDED.max_id),
                step = EXCLUDED.step,
                update_time = EXCLUDED.update_time
            "#,
            t = self.table
        ))
        .bind(key)
        .bind(start)
        .bind(step_column(key, step)?)
        .bind(now_column())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::store(key, e))?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<SegmentRow>> {
        let row: Option<RowTuple> = sqlx::query_as(&self.select_sql())
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::store(key, e))?;

        row.map(from_tuple).transpose()
    }

    async fn create(&self, row: &SegmentRow) -> Result<()> {
        let key = row.biz_tag.as_str();
        let max_id =
            i64::try_from(row.max_id).map_err(|_| Error::request("max_id exceeds i64::MAX"))?;

        let res = sqlx::query(&format!(
            r#"
            INSERT INTO {} (biz_tag, max_id, step, description, update_time)
            VALUES ($1, $2, $3, $4, $5)
            "#,
            self.table
        ))
        .bind(key)
        .bind(max_id)
        .bind(step_column(key, row.step)?)
        .bind(&row.description)
        .bind(now_column())
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(Error::request(
                format!("biz tag `{key}` is already registered"),
            )),
            Err(e) => Err(Error::store(key, e)),
        }
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

fn step_column(key: &str, step: u32) -> Result<i32> {
    i32::try_from(step).map_err(|_| Error::store(key, "step does not fit the step column"))
}

fn now_column() -> i64 {
    i64::try_from(unix_now()).unwrap_or(i64::MAX)
}

/// The row as read back after a reservation, with `step` set to the number
/// of values the reservation added.
pub(super) fn reserved_row(row: RowTuple, count: Option<u32>) -> Result<SegmentRow> {
    let mut row = from_tuple(row)?;
    row.step = count.unwrap_or(row.step).max(MIN_STEP);
    Ok(row)
}

pub(super) fn from_tuple(
    (_id, biz_tag, max_id, step, description, update_time): RowTuple,
) -> Result<SegmentRow> {
    let max_id = u64::try_from(max_id).map_err(|_| Error::store(&biz_tag, "negative max_id"))?;
    let step = u32::try_from(step).map_err(|_| Error::store(&biz_tag, "negative step"))?;
    Ok(SegmentRow {
        biz_tag,
        max_id,
        step,
        description,
        update_time: u64::try_from(update_time).unwrap_or_default(),
    })
}
