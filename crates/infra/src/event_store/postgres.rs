//! Postgres-backed event, snapshot and resource store.
//!
//! ## Sequence Assignment
//!
//! Every write takes `pg_advisory_xact_lock(hashtext(event_store), hashtext(partition_key))`
//! before reading `MAX(sequence_id)`, so writers to one partition queue up and ids stay
//! contiguous.
//!
//! ## Store Scoping
//!
//! Several stores (offers, applications) share one database. Every row carries the
//! store name and every query filters on it, so equal natural keys in different stores
//! never see each other's history.
//! The lock is released with the transaction. Writers to different partitions only
//! collide on hash collisions, which costs a wait and nothing else.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | EventStoreError |
//! |------------|----------------------|-----------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | any | `Unavailable` |
//! | PoolClosed, Io, Tls, timeouts | N/A | `Unavailable` |
//! | Decode / ColumnNotFound | N/A | `Corrupt` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use tracing::{Span, instrument};

use marketsync_core::{EventId, LifecycleStatus, PartitionKey, SequenceId, SnapshotId};

use super::authoring::{AuthoringCommit, AuthoringStore, ResourceRecord, stale_sequence};
use super::r#trait::{EventStore, EventStoreError, NewEvent, StoredEvent};
use crate::snapshot::{SnapshotRecord, SnapshotStore};

/// Postgres-backed append-only event store.
///
/// `Send + Sync`; share it behind an `Arc` or clone it (the pool is reference counted).
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
    event_store: String,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool, event_store: impl Into<String>) -> Self {
        Self {
            pool: Arc::new(pool),
            event_store: event_store.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.event_store
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, EventStoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[instrument(
        skip(self, event),
        fields(
            operation = "append",
            partition_key = %event.partition_key,
            event_type = %event.event_type,
            sequence_id = tracing::field::Empty
        ),
        err
    )]
    async fn append(&self, event: NewEvent) -> Result<StoredEvent, EventStoreError> {
        let mut tx = self.begin().await?;
        let current = lock_partition(&mut tx, &self.event_store, &event.partition_key).await?;
        let stored = insert_event(&mut tx, &self.event_store, event, current + 1).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("sequence_id", stored.sequence_id);
        Ok(stored)
    }

    #[instrument(
        skip(self),
        fields(operation = "list_after", partition_key = %partition_key, event_count = tracing::field::Empty),
        err
    )]
    async fn list_after(
        &self,
        partition_key: &PartitionKey,
        after: SequenceId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                event_id,
                partition_key,
                sequence_id,
                event_type,
                event_version,
                content,
                created_by,
                created_time
            FROM events
            WHERE event_store = $1 AND partition_key = $2 AND sequence_id > $3
            ORDER BY sequence_id ASC
            "#,
        )
        .bind(&self.event_store)
        .bind(partition_key.as_str())
        .bind(after as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_after", e))?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let row = StoredEventRow::from_row(&row)
                .map_err(|e| EventStoreError::Corrupt(format!("failed to read event row: {e}")))?;
            events.push(StoredEvent::try_from(row)?);
        }

        Span::current().record("event_count", events.len());
        Ok(events)
    }
}

#[async_trait]
impl SnapshotStore for PostgresEventStore {
    #[instrument(skip(self), fields(operation = "latest_snapshot", partition_key = %partition_key), err)]
    async fn latest(
        &self,
        partition_key: &PartitionKey,
    ) -> Result<Option<SnapshotRecord>, EventStoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                snapshot_id,
                partition_key,
                aggregate_type,
                content,
                last_applied_event_id,
                status,
                created_time
            FROM snapshots
            WHERE event_store = $1 AND partition_key = $2
            ORDER BY last_applied_event_id DESC, created_time DESC
            LIMIT 1
            "#,
        )
        .bind(&self.event_store)
        .bind(partition_key.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("latest_snapshot", e))?;

        match row {
            Some(row) => {
                let row = SnapshotRow::from_row(&row).map_err(|e| {
                    EventStoreError::Corrupt(format!("failed to read snapshot row: {e}"))
                })?;
                Ok(Some(SnapshotRecord::try_from(row)?))
            }
            None => Ok(None),
        }
    }

    #[instrument(
        skip(self, snapshot),
        fields(
            operation = "save_snapshot",
            partition_key = %snapshot.partition_key,
            last_applied_event_id = snapshot.last_applied_event_id
        ),
        err
    )]
    async fn save(&self, snapshot: SnapshotRecord) -> Result<(), EventStoreError> {
        let mut tx = self.begin().await?;
        insert_snapshot(&mut tx, &self.event_store, &snapshot).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), fields(operation = "prune_snapshots", partition_key = %partition_key), err)]
    async fn prune(
        &self,
        partition_key: &PartitionKey,
        keep: usize,
    ) -> Result<usize, EventStoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM snapshots
            WHERE event_store = $1 AND partition_key = $2
              AND snapshot_id NOT IN (
                SELECT snapshot_id
                FROM snapshots
                WHERE event_store = $1 AND partition_key = $2
                ORDER BY last_applied_event_id DESC, created_time DESC
                LIMIT $3
              )
            "#,
        )
        .bind(&self.event_store)
        .bind(partition_key.as_str())
        .bind(keep as i64)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("prune_snapshots", e))?;

        Ok(result.rows_affected() as usize)
    }
}

#[async_trait]
impl AuthoringStore for PostgresEventStore {
    #[instrument(skip(self), fields(operation = "resource", partition_key = %partition_key), err)]
    async fn resource(
        &self,
        partition_key: &PartitionKey,
    ) -> Result<Option<ResourceRecord>, EventStoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                partition_key,
                aggregate_type,
                status,
                created_by,
                created_time,
                last_updated_time,
                deleted_time
            FROM resources
            WHERE event_store = $1 AND partition_key = $2
            "#,
        )
        .bind(&self.event_store)
        .bind(partition_key.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("resource", e))?;

        match row {
            Some(row) => {
                let row = ResourceRow::from_row(&row).map_err(|e| {
                    EventStoreError::Corrupt(format!("failed to read resource row: {e}"))
                })?;
                Ok(Some(ResourceRecord::try_from(row)?))
            }
            None => Ok(None),
        }
    }

    /// One transaction:
    /// 1. Lock the partition and check `expected_last`
    /// 2. Insert the event with the next sequence id
    /// 3. Upsert the resource row
    /// 4. Insert the snapshot, stamped with the new sequence id
    #[instrument(
        skip(self, commit),
        fields(
            operation = "authoring_commit",
            partition_key = %commit.event.partition_key,
            event_type = %commit.event.event_type,
            expected_last = commit.expected_last
        ),
        err
    )]
    async fn commit(&self, commit: AuthoringCommit) -> Result<StoredEvent, EventStoreError> {
        let AuthoringCommit {
            event,
            expected_last,
            resource,
            snapshot,
        } = commit;
        let partition_key = event.partition_key.clone();

        let mut tx = self.begin().await?;
        let current = lock_partition(&mut tx, &self.event_store, &partition_key).await?;
        if current != expected_last {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(stale_sequence(&partition_key, expected_last, current));
        }

        let stored = insert_event(&mut tx, &self.event_store, event, current + 1).await?;
        upsert_resource(&mut tx, &self.event_store, &resource).await?;
        if let Some(mut snapshot) = snapshot {
            snapshot.last_applied_event_id = stored.sequence_id;
            insert_snapshot(&mut tx, &self.event_store, &snapshot).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(stored)
    }
}

/// Take the partition's advisory lock and return its last sequence id.
async fn lock_partition(
    tx: &mut Transaction<'_, Postgres>,
    event_store: &str,
    partition_key: &PartitionKey,
) -> Result<SequenceId, EventStoreError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1), hashtext($2))")
        .bind(event_store)
        .bind(partition_key.as_str())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_partition", e))?;

    let current: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(sequence_id), 0) FROM events WHERE event_store = $1 AND partition_key = $2",
    )
    .bind(event_store)
    .bind(partition_key.as_str())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("last_sequence", e))?;

    Ok(current as SequenceId)
}

async fn insert_event(
    tx: &mut Transaction<'_, Postgres>,
    event_store: &str,
    event: NewEvent,
    sequence_id: SequenceId,
) -> Result<StoredEvent, EventStoreError> {
    sqlx::query(
        r#"
        INSERT INTO events (
            event_store,
            partition_key,
            sequence_id,
            event_id,
            event_type,
            event_version,
            content,
            created_by,
            created_time
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(event_store)
    .bind(event.partition_key.as_str())
    .bind(sequence_id as i64)
    .bind(event.event_id.as_uuid())
    .bind(&event.event_type)
    .bind(event.event_version as i32)
    .bind(&event.content)
    .bind(&event.created_by)
    .bind(event.created_time)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            EventStoreError::Conflict(format!(
                "event #{sequence_id} of '{}' already exists",
                event.partition_key
            ))
        } else {
            map_sqlx_error("insert_event", e)
        }
    })?;

    Ok(event.into_stored(sequence_id))
}

async fn upsert_resource(
    tx: &mut Transaction<'_, Postgres>,
    event_store: &str,
    resource: &ResourceRecord,
) -> Result<(), EventStoreError> {
    sqlx::query(
        r#"
        INSERT INTO resources (
            event_store,
            partition_key,
            aggregate_type,
            status,
            created_by,
            created_time,
            last_updated_time,
            deleted_time
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (event_store, partition_key) DO UPDATE SET
            aggregate_type = EXCLUDED.aggregate_type,
            status = EXCLUDED.status,
            created_by = EXCLUDED.created_by,
            created_time = EXCLUDED.created_time,
            last_updated_time = EXCLUDED.last_updated_time,
            deleted_time = EXCLUDED.deleted_time
        "#,
    )
    .bind(event_store)
    .bind(resource.partition_key.as_str())
    .bind(&resource.aggregate_type)
    .bind(resource.status.as_str())
    .bind(&resource.created_by)
    .bind(resource.created_time)
    .bind(resource.last_updated_time)
    .bind(resource.deleted_time)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("upsert_resource", e))?;
    Ok(())
}

async fn insert_snapshot(
    tx: &mut Transaction<'_, Postgres>,
    event_store: &str,
    snapshot: &SnapshotRecord,
) -> Result<(), EventStoreError> {
    sqlx::query(
        r#"
        INSERT INTO snapshots (
            snapshot_id,
            event_store,
            partition_key,
            aggregate_type,
            content,
            last_applied_event_id,
            status,
            created_time
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(snapshot.snapshot_id.as_uuid())
    .bind(event_store)
    .bind(snapshot.partition_key.as_str())
    .bind(&snapshot.aggregate_type)
    .bind(&snapshot.content)
    .bind(snapshot.last_applied_event_id as i64)
    .bind(snapshot.status.as_str())
    .bind(snapshot.created_time)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_snapshot", e))?;
    Ok(())
}

/// Map SQLx errors to event store errors.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code() {
                Some(code) if code.as_ref() == "23505" => EventStoreError::Conflict(msg),
                _ => EventStoreError::Unavailable(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            EventStoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::ColumnNotFound(_) | sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            EventStoreError::Corrupt(format!("undecodable row in {operation}: {err}"))
        }
        _ => EventStoreError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}

/// Check if an error is a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[derive(Debug)]
struct StoredEventRow {
    event_id: uuid::Uuid,
    partition_key: String,
    sequence_id: i64,
    event_type: String,
    event_version: i32,
    content: serde_json::Value,
    created_by: String,
    created_time: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredEventRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredEventRow {
            event_id: row.try_get("event_id")?,
            partition_key: row.try_get("partition_key")?,
            sequence_id: row.try_get("sequence_id")?,
            event_type: row.try_get("event_type")?,
            event_version: row.try_get("event_version")?,
            content: row.try_get("content")?,
            created_by: row.try_get("created_by")?,
            created_time: row.try_get("created_time")?,
        })
    }
}

impl TryFrom<StoredEventRow> for StoredEvent {
    type Error = EventStoreError;

    fn try_from(row: StoredEventRow) -> Result<Self, Self::Error> {
        Ok(StoredEvent {
            event_id: EventId::from_uuid(row.event_id),
            partition_key: parse_partition(row.partition_key)?,
            sequence_id: row.sequence_id as SequenceId,
            event_type: row.event_type,
            event_version: row.event_version as u32,
            content: row.content,
            created_by: row.created_by,
            created_time: row.created_time,
        })
    }
}

#[derive(Debug)]
struct SnapshotRow {
    snapshot_id: uuid::Uuid,
    partition_key: String,
    aggregate_type: String,
    content: serde_json::Value,
    last_applied_event_id: i64,
    status: String,
    created_time: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for SnapshotRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(SnapshotRow {
            snapshot_id: row.try_get("snapshot_id")?,
            partition_key: row.try_get("partition_key")?,
            aggregate_type: row.try_get("aggregate_type")?,
            content: row.try_get("content")?,
            last_applied_event_id: row.try_get("last_applied_event_id")?,
            status: row.try_get("status")?,
            created_time: row.try_get("created_time")?,
        })
    }
}

impl TryFrom<SnapshotRow> for SnapshotRecord {
    type Error = EventStoreError;

    fn try_from(row: SnapshotRow) -> Result<Self, Self::Error> {
        Ok(SnapshotRecord {
            snapshot_id: SnapshotId::from_uuid(row.snapshot_id),
            partition_key: parse_partition(row.partition_key)?,
            aggregate_type: row.aggregate_type,
            content: row.content,
            last_applied_event_id: row.last_applied_event_id as SequenceId,
            status: parse_status(&row.status)?,
            created_time: row.created_time,
        })
    }
}

#[derive(Debug)]
struct ResourceRow {
    partition_key: String,
    aggregate_type: String,
    status: String,
    created_by: String,
    created_time: DateTime<Utc>,
    last_updated_time: DateTime<Utc>,
    deleted_time: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for ResourceRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(ResourceRow {
            partition_key: row.try_get("partition_key")?,
            aggregate_type: row.try_get("aggregate_type")?,
            status: row.try_get("status")?,
            created_by: row.try_get("created_by")?,
            created_time: row.try_get("created_time")?,
            last_updated_time: row.try_get("last_updated_time")?,
            deleted_time: row.try_get("deleted_time")?,
        })
    }
}

impl TryFrom<ResourceRow> for ResourceRecord {
    type Error = EventStoreError;

    fn try_from(row: ResourceRow) -> Result<Self, Self::Error> {
        Ok(ResourceRecord {
            partition_key: parse_partition(row.partition_key)?,
            aggregate_type: row.aggregate_type,
            status: parse_status(&row.status)?,
            created_by: row.created_by,
            created_time: row.created_time,
            last_updated_time: row.last_updated_time,
            deleted_time: row.deleted_time,
        })
    }
}

fn parse_partition(value: String) -> Result<PartitionKey, EventStoreError> {
    PartitionKey::parse(value).map_err(|e| EventStoreError::Corrupt(e.to_string()))
}

fn parse_status(value: &str) -> Result<LifecycleStatus, EventStoreError> {
    LifecycleStatus::parse(value)
        .ok_or_else(|| EventStoreError::Corrupt(format!("unknown lifecycle status '{value}'")))
}
