//! Advisory per-partition leases for the synchronizer.
//!
//! A lease keeps two passes of the same consumer from working one partition at
//! the same time. It is advisory: the read-model commit is optimistic on the
//! cursor, so a lost or expired lease costs a retry, never a wrong row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, instrument};
use uuid::Uuid;

use marketsync_core::{ErrorKind, PartitionKey, SequenceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseTimings {
    /// How long `acquire` waits for a busy partition.
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
    /// A held lease older than this is free for the taking.
    pub ttl: Duration,
}

impl Default for LeaseTimings {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
            ttl: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub partition_key: PartitionKey,
    /// Sequence id of the trigger that took the lease.
    pub sequence_id: SequenceId,
    pub owner_token: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
    Acquired(Lease),
    /// A pass for a later sequence id already holds the partition and will cover this one.
    Superseded { in_flight: SequenceId },
}

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("timed out after {waited:?} waiting for partition '{partition_key}'")]
    WaitTimeout {
        partition_key: PartitionKey,
        waited: Duration,
    },

    #[error("lease store unavailable: {0}")]
    Unavailable(String),
}

impl LeaseError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::TransientIo
    }
}

#[async_trait]
pub trait PartitionLease: Send + Sync {
    async fn acquire(
        &self,
        partition_key: &PartitionKey,
        sequence_id: SequenceId,
    ) -> Result<LeaseOutcome, LeaseError>;

    /// Releasing a lease that already expired or was taken over is a no-op.
    async fn release(&self, lease: &Lease) -> Result<(), LeaseError>;
}

#[async_trait]
impl<L> PartitionLease for Arc<L>
where
    L: PartitionLease + ?Sized,
{
    async fn acquire(
        &self,
        partition_key: &PartitionKey,
        sequence_id: SequenceId,
    ) -> Result<LeaseOutcome, LeaseError> {
        (**self).acquire(partition_key, sequence_id).await
    }

    async fn release(&self, lease: &Lease) -> Result<(), LeaseError> {
        (**self).release(lease).await
    }
}

fn expiry_after(ttl: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(60))
}

#[derive(Debug)]
struct Held {
    sequence_id: SequenceId,
    owner_token: Uuid,
    deadline: Instant,
}

/// In-process lease map for a single consumer instance.
#[derive(Debug)]
pub struct LocalLeaseMap {
    timings: LeaseTimings,
    held: Mutex<HashMap<PartitionKey, Held>>,
}

impl LocalLeaseMap {
    pub fn new(timings: LeaseTimings) -> Self {
        Self {
            timings,
            held: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_flight(&self, partition_key: &PartitionKey) -> Option<SequenceId> {
        let held = self.held.lock().ok()?;
        held.get(partition_key)
            .filter(|h| h.deadline > Instant::now())
            .map(|h| h.sequence_id)
    }

    fn try_take(
        &self,
        partition_key: &PartitionKey,
        sequence_id: SequenceId,
    ) -> Result<Option<LeaseOutcome>, LeaseError> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| LeaseError::Unavailable("lock poisoned".to_string()))?;
        let now = Instant::now();

        if let Some(current) = held.get(partition_key) {
            if current.deadline > now {
                if current.sequence_id > sequence_id {
                    return Ok(Some(LeaseOutcome::Superseded {
                        in_flight: current.sequence_id,
                    }));
                }
                return Ok(None);
            }
        }

        let owner_token = Uuid::now_v7();
        held.insert(
            partition_key.clone(),
            Held {
                sequence_id,
                owner_token,
                deadline: now + self.timings.ttl,
            },
        );
        Ok(Some(LeaseOutcome::Acquired(Lease {
            partition_key: partition_key.clone(),
            sequence_id,
            owner_token,
            expires_at: expiry_after(self.timings.ttl),
        })))
    }
}

impl Default for LocalLeaseMap {
    fn default() -> Self {
        Self::new(LeaseTimings::default())
    }
}

#[async_trait]
impl PartitionLease for LocalLeaseMap {
    async fn acquire(
        &self,
        partition_key: &PartitionKey,
        sequence_id: SequenceId,
    ) -> Result<LeaseOutcome, LeaseError> {
        let started = Instant::now();
        loop {
            if let Some(outcome) = self.try_take(partition_key, sequence_id)? {
                return Ok(outcome);
            }
            if started.elapsed() >= self.timings.wait_timeout {
                return Err(LeaseError::WaitTimeout {
                    partition_key: partition_key.clone(),
                    waited: started.elapsed(),
                });
            }
            tokio::time::sleep(self.timings.poll_interval).await;
        }
    }

    async fn release(&self, lease: &Lease) -> Result<(), LeaseError> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| LeaseError::Unavailable("lock poisoned".to_string()))?;
        if held
            .get(&lease.partition_key)
            .is_some_and(|h| h.owner_token == lease.owner_token)
        {
            held.remove(&lease.partition_key);
        }
        Ok(())
    }
}

/// Lease records in the `partition_leases` table, shared by every instance of a consumer.
#[derive(Debug, Clone)]
pub struct PostgresLeaseStore {
    pool: Arc<PgPool>,
    consumer: String,
    timings: LeaseTimings,
}

impl PostgresLeaseStore {
    pub fn new(pool: PgPool, consumer: impl Into<String>, timings: LeaseTimings) -> Self {
        Self {
            pool: Arc::new(pool),
            consumer: consumer.into(),
            timings,
        }
    }

    async fn try_take(
        &self,
        partition_key: &PartitionKey,
        sequence_id: SequenceId,
    ) -> Result<Option<LeaseOutcome>, LeaseError> {
        let owner_token = Uuid::now_v7();

        // Only an expired record may be taken over.
        let expires_at: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            INSERT INTO partition_leases (consumer, partition_key, owner_token, sequence_id, expires_at)
            VALUES ($1, $2, $3, $4, now() + make_interval(secs => $5))
            ON CONFLICT (consumer, partition_key) DO UPDATE SET
                owner_token = EXCLUDED.owner_token,
                sequence_id = EXCLUDED.sequence_id,
                expires_at = EXCLUDED.expires_at
            WHERE partition_leases.expires_at < now()
            RETURNING expires_at
            "#,
        )
        .bind(&self.consumer)
        .bind(partition_key.as_str())
        .bind(owner_token)
        .bind(sequence_id as i64)
        .bind(self.timings.ttl.as_secs_f64())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("acquire_lease", e))?;

        if let Some(expires_at) = expires_at {
            return Ok(Some(LeaseOutcome::Acquired(Lease {
                partition_key: partition_key.clone(),
                sequence_id,
                owner_token,
                expires_at,
            })));
        }

        let in_flight: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT sequence_id FROM partition_leases
            WHERE consumer = $1 AND partition_key = $2 AND expires_at >= now()
            "#,
        )
        .bind(&self.consumer)
        .bind(partition_key.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("read_lease", e))?;

        match in_flight {
            Some(in_flight) if in_flight as SequenceId > sequence_id => {
                Ok(Some(LeaseOutcome::Superseded {
                    in_flight: in_flight as SequenceId,
                }))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl PartitionLease for PostgresLeaseStore {
    #[instrument(skip(self), fields(consumer = %self.consumer, partition_key = %partition_key), err)]
    async fn acquire(
        &self,
        partition_key: &PartitionKey,
        sequence_id: SequenceId,
    ) -> Result<LeaseOutcome, LeaseError> {
        let started = Instant::now();
        loop {
            if let Some(outcome) = self.try_take(partition_key, sequence_id).await? {
                return Ok(outcome);
            }
            if started.elapsed() >= self.timings.wait_timeout {
                return Err(LeaseError::WaitTimeout {
                    partition_key: partition_key.clone(),
                    waited: started.elapsed(),
                });
            }
            debug!(sequence_id, "partition busy, waiting");
            tokio::time::sleep(self.timings.poll_interval).await;
        }
    }

    #[instrument(skip(self, lease), fields(consumer = %self.consumer, partition_key = %lease.partition_key), err)]
    async fn release(&self, lease: &Lease) -> Result<(), LeaseError> {
        sqlx::query(
            "DELETE FROM partition_leases WHERE consumer = $1 AND partition_key = $2 AND owner_token = $3",
        )
        .bind(&self.consumer)
        .bind(lease.partition_key.as_str())
        .bind(lease.owner_token)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("release_lease", e))?;
        Ok(())
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LeaseError {
    LeaseError::Unavailable(format!("sqlx error in {operation}: {err}"))
}
