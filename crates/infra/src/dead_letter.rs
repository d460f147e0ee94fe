//! Poison events a consumer gave up on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::{Arc, Mutex};
use tracing::instrument;

use marketsync_core::{PartitionKey, SequenceId};

use crate::read_model::ReadModelError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub consumer: String,
    pub partition_key: PartitionKey,
    pub sequence_id: SequenceId,
    pub event_type: String,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn record(&self, letter: DeadLetter) -> Result<(), ReadModelError>;
}

#[async_trait]
impl<D> DeadLetterSink for Arc<D>
where
    D: DeadLetterSink + ?Sized,
{
    async fn record(&self, letter: DeadLetter) -> Result<(), ReadModelError> {
        (**self).record(letter).await
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDeadLetterSink {
    letters: Mutex<Vec<DeadLetter>>,
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn record(&self, letter: DeadLetter) -> Result<(), ReadModelError> {
        let mut letters = self
            .letters
            .lock()
            .map_err(|_| ReadModelError::Unavailable("lock poisoned".to_string()))?;
        let seen = letters.iter().any(|l| {
            l.consumer == letter.consumer
                && l.partition_key == letter.partition_key
                && l.sequence_id == letter.sequence_id
        });
        if !seen {
            letters.push(letter);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PostgresDeadLetterSink {
    pool: Arc<PgPool>,
}

impl PostgresDeadLetterSink {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl DeadLetterSink for PostgresDeadLetterSink {
    #[instrument(
        skip(self, letter),
        fields(consumer = %letter.consumer, partition_key = %letter.partition_key, sequence_id = letter.sequence_id),
        err
    )]
    async fn record(&self, letter: DeadLetter) -> Result<(), ReadModelError> {
        // Re-recording the same poison event keeps the first reason.
        sqlx::query(
            r#"
            INSERT INTO dead_letters (consumer, partition_key, sequence_id, event_type, reason, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (consumer, partition_key, sequence_id) DO NOTHING
            "#,
        )
        .bind(&letter.consumer)
        .bind(letter.partition_key.as_str())
        .bind(letter.sequence_id as i64)
        .bind(&letter.event_type)
        .bind(&letter.reason)
        .bind(letter.recorded_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| ReadModelError::Unavailable(format!("sqlx error in record_dead_letter: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_sink_keeps_first_letter_per_event() {
        let sink = InMemoryDeadLetterSink::new();
        for seq in [4, 7, 4] {
            sink.record(DeadLetter {
                consumer: "gallery".into(),
                partition_key: PartitionKey::parse("foo").unwrap(),
                sequence_id: seq,
                event_type: "offer.published".into(),
                reason: "undecodable".into(),
                recorded_at: Utc::now(),
            })
            .await
            .unwrap();
        }
        let seqs: Vec<_> = sink.letters().iter().map(|l| l.sequence_id).collect();
        assert_eq!(seqs, vec![4, 7]);
    }
}
