use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::sync::{RetryPolicy, TriggerHandler};
use crate::trigger::{PartitionTrigger, TriggerSink, TriggerSource};

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Stop taking triggers and wait for the ones already running.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            if let Err(err) = join.await {
                warn!(error = %err, "sync worker task ended abnormally");
            }
        }
    }
}

/// Trigger loop for one consumer.
///
/// - Each trigger runs as its own task, so a slow partition never holds up others
/// - Transient failures are re-sent to `requeue` after the policy's backoff
/// - Once attempts run out the trigger is handed to [`TriggerHandler::abandon`]
/// - Shutdown cuts pending backoffs short and drops their redelivery; the cursor has not
///   moved, so the partition's next trigger replays the same events
#[derive(Debug)]
pub struct SyncWorker;

impl SyncWorker {
    pub fn spawn<Src>(
        handler: Arc<dyn TriggerHandler>,
        mut source: Src,
        requeue: Arc<dyn TriggerSink>,
        retry: RetryPolicy,
    ) -> WorkerHandle
    where
        Src: TriggerSource + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let consumer = handler.consumer().to_string();
            info!(consumer = %consumer, "sync worker started");
            let mut tasks = JoinSet::new();

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    next = source.recv() => match next {
                        Some(trigger) => {
                            tasks.spawn(run_one(
                                handler.clone(),
                                requeue.clone(),
                                retry.clone(),
                                trigger,
                                shutdown_rx.clone(),
                            ));
                        }
                        None => break,
                    },
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        if let Err(err) = joined {
                            warn!(consumer = %consumer, error = %err, "trigger task panicked");
                        }
                    }
                }
            }

            while let Some(joined) = tasks.join_next().await {
                if let Err(err) = joined {
                    warn!(consumer = %consumer, error = %err, "trigger task panicked");
                }
            }
            info!(consumer = %consumer, "sync worker stopped");
        });

        WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

async fn run_one(
    handler: Arc<dyn TriggerHandler>,
    requeue: Arc<dyn TriggerSink>,
    retry: RetryPolicy,
    trigger: PartitionTrigger,
    mut shutdown: watch::Receiver<bool>,
) {
    let err = match handler.handle(&trigger).await {
        Ok(outcome) => {
            debug!(partition_key = %trigger.partition_key, outcome = ?outcome, "trigger handled");
            return;
        }
        Err(err) => err,
    };

    if !err.is_retryable() {
        // Poison is already dead-lettered by the handler.
        return;
    }

    if retry.should_retry(trigger.attempt) {
        let next = trigger.redelivery();
        let delay = retry.delay_for_attempt(next.attempt);
        warn!(
            partition_key = %trigger.partition_key,
            attempt = next.attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient sync failure; redelivering"
        );
        if *shutdown.borrow() {
            info!(partition_key = %trigger.partition_key, "worker stopping; redelivery dropped");
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {
                info!(partition_key = %trigger.partition_key, "worker stopping; redelivery dropped");
                return;
            }
        }
        if let Err(send_err) = requeue.send(next).await {
            warn!(partition_key = %trigger.partition_key, error = %send_err, "failed to requeue trigger");
        }
        return;
    }

    if let Err(abandon_err) = handler.abandon(&trigger, &err).await {
        warn!(
            partition_key = %trigger.partition_key,
            error = %abandon_err,
            "failed to dead-letter exhausted trigger"
        );
    }
}
