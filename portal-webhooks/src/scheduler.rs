//! Delayed retry queue drained by a background worker
//!
//! A failed attempt does not sleep: the executor pushes the delivery ID with
//! its backoff onto a [`RetryQueue`] and returns. The [`RetryWorker`] keeps a
//! min-heap keyed by due time and hands each due retry to a [`RetryHandler`]
//! on its own task.

use crate::{Result, WebhookError};
use async_trait::async_trait;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

/// Runs one due retry.
#[async_trait]
pub trait RetryHandler: Send + Sync + 'static {
    /// Re-deliver the lineage whose latest attempt is `delivery_id`
    async fn run_retry(&self, delivery_id: String);
}

/// A retry request sent to the worker.
#[derive(Debug)]
struct ScheduledRetry {
    delivery_id: String,
    due: Instant,
}

/// Sending half: cheap to clone, held by the delivery executor.
#[derive(Debug, Clone)]
pub struct RetryQueue {
    tx: mpsc::UnboundedSender<ScheduledRetry>,
}

impl RetryQueue {
    /// Schedule a retry of `delivery_id` after `delay`
    pub fn schedule(&self, delivery_id: impl Into<String>, delay: Duration) -> Result<()> {
        let retry = ScheduledRetry {
            delivery_id: delivery_id.into(),
            due: Instant::now() + delay,
        };
        self.tx
            .send(retry)
            .map_err(|e| WebhookError::Internal(format!("Retry worker stopped: {}", e.0.delivery_id)))
    }

    /// Whether the worker has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half, turned into a running task by [`RetryWorker::spawn`].
#[derive(Debug)]
pub struct RetryWorker {
    rx: mpsc::UnboundedReceiver<ScheduledRetry>,
}

/// Create a connected queue/worker pair
pub fn retry_queue() -> (RetryQueue, RetryWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RetryQueue { tx }, RetryWorker { rx })
}

/// Handle to a running worker
#[derive(Debug)]
pub struct RetryWorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl RetryWorkerHandle {
    /// Stop the worker. Retries still waiting in the heap are dropped; their
    /// ledger rows keep `next_retry_at` so they can be recovered.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            warn!(error = %e, "Retry worker ended abnormally");
        }
    }

    /// Whether the worker task has exited
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Heap entry ordered so that the earliest due time is popped first
struct TimedRetry {
    due: Instant,
    seq: u64,
    delivery_id: String,
}

impl Eq for TimedRetry {}

impl PartialEq for TimedRetry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Ord for TimedRetry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reverse for min-heap behavior
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimedRetry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl RetryWorker {
    /// Start draining the queue on a background task
    pub fn spawn(self, handler: Arc<dyn RetryHandler>) -> RetryWorkerHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(handler, shutdown_rx));
        RetryWorkerHandle { shutdown, join }
    }

    async fn run(mut self, handler: Arc<dyn RetryHandler>, mut shutdown: watch::Receiver<bool>) {
        let mut heap: BinaryHeap<TimedRetry> = BinaryHeap::new();
        let mut seq = 0u64;
        let mut senders_gone = false;

        loop {
            if senders_gone && heap.is_empty() {
                break;
            }

            let next_due = heap.peek().map(|r| r.due);

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(pending = heap.len(), "Retry worker stopping");
                        break;
                    }
                }
                msg = self.rx.recv(), if !senders_gone => {
                    match msg {
                        Some(retry) => {
                            seq += 1;
                            heap.push(TimedRetry {
                                due: retry.due,
                                seq,
                                delivery_id: retry.delivery_id,
                            });
                        }
                        None => senders_gone = true,
                    }
                }
                _ = wait_until(next_due) => {
                    let now = Instant::now();
                    while heap.peek().is_some_and(|r| r.due <= now) {
                        let Some(retry) = heap.pop() else { break };
                        debug!(delivery_id = %retry.delivery_id, "Retry due");
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            handler.run_retry(retry.delivery_id).await;
                        });
                    }
                }
            }
        }
    }
}

async fn wait_until(due: Option<Instant>) {
    match due {
        Some(due) => sleep_until(due).await,
        None => std::future::pending().await,
    }
}
