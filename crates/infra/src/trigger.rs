//! Partition triggers: "partition P has something at or below #N".
//!
//! Delivery is at least once and may duplicate or reorder; consumers always
//! re-read the log from their own cursor, so a trigger carries no content.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use marketsync_core::{ErrorKind, PartitionKey, SequenceId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionTrigger {
    /// Name of the event store that committed the event.
    pub event_store: String,
    pub event_type: String,
    pub partition_key: PartitionKey,
    pub sequence_id: SequenceId,
    /// Redelivery count, bumped by the worker on transient failures.
    #[serde(default)]
    pub attempt: u32,
}

impl PartitionTrigger {
    pub fn redelivery(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// An event store name and the consumers subscribed to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStoreInfo {
    pub name: String,
    pub subscribers: Vec<String>,
}

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("trigger queue closed")]
    Closed,
}

impl TriggerError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::TransientIo
    }
}

#[async_trait]
pub trait TriggerSink: Send + Sync {
    async fn send(&self, trigger: PartitionTrigger) -> Result<(), TriggerError>;
}

#[async_trait]
pub trait TriggerSource: Send {
    /// Next trigger, or `None` once every sender is gone.
    async fn recv(&mut self) -> Option<PartitionTrigger>;
}

/// In-process trigger queue on a bounded tokio channel.
pub struct InMemoryTriggerQueue;

impl InMemoryTriggerQueue {
    pub fn channel(capacity: usize) -> (InMemoryTriggerSender, InMemoryTriggerReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        (InMemoryTriggerSender { tx }, InMemoryTriggerReceiver { rx })
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryTriggerSender {
    tx: mpsc::Sender<PartitionTrigger>,
}

#[async_trait]
impl TriggerSink for InMemoryTriggerSender {
    async fn send(&self, trigger: PartitionTrigger) -> Result<(), TriggerError> {
        self.tx.send(trigger).await.map_err(|_| TriggerError::Closed)
    }
}

#[derive(Debug)]
pub struct InMemoryTriggerReceiver {
    rx: mpsc::Receiver<PartitionTrigger>,
}

#[async_trait]
impl TriggerSource for InMemoryTriggerReceiver {
    async fn recv(&mut self) -> Option<PartitionTrigger> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger(seq: SequenceId) -> PartitionTrigger {
        PartitionTrigger {
            event_store: "authoring".into(),
            event_type: "marketplace.offer.published".into(),
            partition_key: PartitionKey::parse("foo").unwrap(),
            sequence_id: seq,
            attempt: 0,
        }
    }

    #[tokio::test]
    async fn queue_delivers_in_send_order() {
        let (tx, mut rx) = InMemoryTriggerQueue::channel(8);
        tx.send(trigger(1)).await.unwrap();
        tx.send(trigger(2)).await.unwrap();
        drop(tx);

        assert_eq!(rx.recv().await.unwrap().sequence_id, 1);
        assert_eq!(rx.recv().await.unwrap().sequence_id, 2);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn send_after_receiver_dropped_is_closed() {
        let (tx, rx) = InMemoryTriggerQueue::channel(1);
        drop(rx);
        assert!(matches!(tx.send(trigger(1)).await, Err(TriggerError::Closed)));
    }

    #[test]
    fn redelivery_bumps_attempt_only() {
        let again = trigger(3).redelivery();
        assert_eq!(again.attempt, 1);
        assert_eq!(again.sequence_id, 3);
    }

    #[test]
    fn attempt_defaults_when_missing_on_the_wire() {
        let json = serde_json::json!({
            "event_store": "authoring",
            "event_type": "marketplace.offer.created",
            "partition_key": "foo",
            "sequence_id": 1
        });
        let parsed: PartitionTrigger = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.attempt, 0);
    }
}
