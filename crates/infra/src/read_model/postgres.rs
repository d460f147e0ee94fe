//! Postgres-backed materialized rows (`materialized_rows` table).
//!
//! One table serves every consumer; rows are keyed by `(consumer, unique_name)`.
//! `projected` is JSONB and stays NULL until the first upsert, so a cursor can
//! advance over events that never touched the row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::{FromRow, PgPool, Row};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::instrument;

use marketsync_core::{PartitionKey, SequenceId};

use super::{MaterializedRow, ReadModelError, ReadModelStore, RowWrite};

pub struct PostgresReadModelStore<V> {
    pool: Arc<PgPool>,
    consumer: String,
    _value: PhantomData<fn() -> V>,
}

impl<V> PostgresReadModelStore<V> {
    pub fn new(pool: PgPool, consumer: impl Into<String>) -> Self {
        Self {
            pool: Arc::new(pool),
            consumer: consumer.into(),
            _value: PhantomData,
        }
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }
}

#[async_trait]
impl<V> ReadModelStore<V> for PostgresReadModelStore<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    #[instrument(skip(self), fields(consumer = %self.consumer, partition_key = %unique_name), err)]
    async fn read_cursor(&self, unique_name: &PartitionKey) -> Result<SequenceId, ReadModelError> {
        let cursor: Option<i64> = sqlx::query_scalar(
            "SELECT last_applied_event_id FROM materialized_rows WHERE consumer = $1 AND unique_name = $2",
        )
        .bind(&self.consumer)
        .bind(unique_name.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("read_cursor", e))?;

        Ok(cursor.unwrap_or(0) as SequenceId)
    }

    #[instrument(skip(self), fields(consumer = %self.consumer, partition_key = %unique_name), err)]
    async fn get(
        &self,
        unique_name: &PartitionKey,
    ) -> Result<Option<MaterializedRow<V>>, ReadModelError> {
        let row = sqlx::query(
            r#"
            SELECT unique_name, last_applied_event_id, is_enabled, projected, updated_time
            FROM materialized_rows
            WHERE consumer = $1 AND unique_name = $2 AND projected IS NOT NULL
            "#,
        )
        .bind(&self.consumer)
        .bind(unique_name.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_row", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let row = MaterializedDbRow::from_row(&row)
            .map_err(|e| ReadModelError::Corrupt(format!("failed to read materialized row: {e}")))?;
        row.into_materialized().map(Some)
    }

    /// Zero affected rows means someone else moved the cursor.
    #[instrument(
        skip(self, write),
        fields(consumer = %self.consumer, partition_key = %unique_name),
        err
    )]
    async fn commit(
        &self,
        unique_name: &PartitionKey,
        expected_cursor: SequenceId,
        write: RowWrite<V>,
        new_cursor: SequenceId,
    ) -> Result<(), ReadModelError> {
        let (projected, is_enabled) = match &write {
            RowWrite::Upsert(value) => (
                Some(
                    serde_json::to_value(value)
                        .map_err(|e| ReadModelError::Corrupt(format!("unserializable row: {e}")))?,
                ),
                Some(true),
            ),
            RowWrite::Disable => (None, Some(false)),
            RowWrite::Keep => (None, None),
        };

        // A missing row reads as cursor 0, so only a first commit may insert.
        let sql = if expected_cursor == 0 {
            r#"
            INSERT INTO materialized_rows (
                consumer, unique_name, last_applied_event_id, is_enabled, projected, updated_time
            )
            VALUES ($1, $2, $4, COALESCE($5, FALSE), $6, now())
            ON CONFLICT (consumer, unique_name) DO UPDATE SET
                last_applied_event_id = EXCLUDED.last_applied_event_id,
                is_enabled = COALESCE($5, materialized_rows.is_enabled),
                projected = COALESCE($6, materialized_rows.projected),
                updated_time = now()
            WHERE materialized_rows.last_applied_event_id = $3
            "#
        } else {
            r#"
            UPDATE materialized_rows SET
                last_applied_event_id = $4,
                is_enabled = COALESCE($5, is_enabled),
                projected = COALESCE($6, projected),
                updated_time = now()
            WHERE consumer = $1 AND unique_name = $2 AND last_applied_event_id = $3
            "#
        };

        let result = sqlx::query(sql)
            .bind(&self.consumer)
            .bind(unique_name.as_str())
            .bind(expected_cursor as i64)
            .bind(new_cursor as i64)
            .bind(is_enabled)
            .bind(projected)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("commit_row", e))?;

        if result.rows_affected() == 0 {
            let found = self.read_cursor(unique_name).await?;
            return Err(ReadModelError::StaleCursor {
                partition_key: unique_name.clone(),
                expected: expected_cursor,
                found,
            });
        }
        Ok(())
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> ReadModelError {
    match err {
        sqlx::Error::ColumnNotFound(_) | sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            ReadModelError::Corrupt(format!("undecodable row in {operation}: {err}"))
        }
        _ => ReadModelError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}

#[derive(Debug)]
struct MaterializedDbRow {
    unique_name: String,
    last_applied_event_id: i64,
    is_enabled: bool,
    projected: serde_json::Value,
    updated_time: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for MaterializedDbRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(MaterializedDbRow {
            unique_name: row.try_get("unique_name")?,
            last_applied_event_id: row.try_get("last_applied_event_id")?,
            is_enabled: row.try_get("is_enabled")?,
            projected: row.try_get("projected")?,
            updated_time: row.try_get("updated_time")?,
        })
    }
}

impl MaterializedDbRow {
    fn into_materialized<V: DeserializeOwned>(self) -> Result<MaterializedRow<V>, ReadModelError> {
        Ok(MaterializedRow {
            unique_name: PartitionKey::parse(self.unique_name)
                .map_err(|e| ReadModelError::Corrupt(e.to_string()))?,
            last_applied_event_id: self.last_applied_event_id as SequenceId,
            is_enabled: self.is_enabled,
            projected: serde_json::from_value(self.projected)
                .map_err(|e| ReadModelError::Corrupt(format!("undecodable projected value: {e}")))?,
            updated_time: self.updated_time,
        })
    }
}
