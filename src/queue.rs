//! Delayed task queue
//!
//! In-process implementation of the [`TaskScheduler`] seam: the dispatch
//! stage enqueues, worker loops consume per named queue. A task sleeps
//! until its `dispatch_at` and is then delivered exactly once; there are
//! no retries (remove-on-complete, remove-on-fail).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::engine::DelayedTask;
use crate::error::{Result, SurgeflowError};
use crate::followup::TaskScheduler;

pub struct InProcessQueue {
    producers: Mutex<HashMap<String, mpsc::UnboundedSender<DelayedTask>>>,
}

impl InProcessQueue {
    pub fn new() -> Self {
        Self {
            producers: Mutex::new(HashMap::new()),
        }
    }

    /// Register a named queue and take its consumer end. One consumer per
    /// queue; calling twice replaces the producer and severs the old
    /// consumer.
    pub fn subscribe(&self, queue: &str) -> mpsc::UnboundedReceiver<DelayedTask> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.producers
            .lock()
            .expect("queue registry lock poisoned")
            .insert(queue.to_string(), tx);
        rx
    }
}

impl Default for InProcessQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskScheduler for InProcessQueue {
    async fn enqueue(&self, task: DelayedTask) -> Result<()> {
        let tx = {
            let producers = self.producers.lock().expect("queue registry lock poisoned");
            producers
                .get(&task.queue)
                .cloned()
                .ok_or_else(|| SurgeflowError::QueueClosed(task.queue.clone()))?
        };

        let delay_ms = (task.dispatch_at - Utc::now().timestamp_millis()).max(0);
        debug!(queue = %task.queue, kind = %task.kind, delay_ms, "Task scheduled");

        tokio::spawn(async move {
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms as u64)).await;
            }
            if tx.send(task).is_err() {
                warn!("Delayed task dropped: consumer gone");
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(queue: &str, dispatch_at: i64) -> DelayedTask {
        DelayedTask {
            queue: queue.to_string(),
            kind: format!("{queue}_kind"),
            signal_id: "sig-1".into(),
            symbol: "BTCUSDT".into(),
            t_offset_sec: Some(3),
            signal_ts_ms: None,
            dispatch_at,
        }
    }

    #[tokio::test]
    async fn enqueue_without_subscriber_errors() {
        let queue = InProcessQueue::new();
        let err = queue.enqueue(task("nowhere", 0)).await;
        assert!(matches!(err, Err(SurgeflowError::QueueClosed(_))));
    }

    #[tokio::test]
    async fn due_task_is_delivered_once() {
        let queue = InProcessQueue::new();
        let mut rx = queue.subscribe("binance_order");

        queue.enqueue(task("binance_order", 0)).await.unwrap();
        let delivered = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("delivery within a second")
            .expect("channel open");
        assert_eq!(delivered.signal_id, "sig-1");

        // Nothing else arrives.
        let empty = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(empty.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn future_task_waits_for_dispatch_time() {
        let queue = InProcessQueue::new();
        let mut rx = queue.subscribe("binance_price");

        let due = Utc::now().timestamp_millis() + 5_000;
        queue.enqueue(task("binance_price", due)).await.unwrap();

        // Not delivered before the delay elapses in paused time.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(5_000)).await;
        let delivered = rx.recv().await.expect("task after delay");
        assert_eq!(delivered.queue, "binance_price");
    }
}
