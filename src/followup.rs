//! Follow-up dispatcher
//!
//! On every emitted signal: persist the document, then schedule the
//! delayed labelling tasks, three orderbook snapshots (t+3 s, +10 s,
//! +30 s) and one price trajectory (t+31 min). Persistence failure drops
//! the emission entirely; each enqueue failure is independent.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::engine::{DelayedTask, EngineConfig, SignalVector};
use crate::error::Result;

/// Durable destination for signal documents. Returns the assigned id.
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn persist_signal(&self, v: &SignalVector) -> Result<String>;
}

/// Delayed task queue producer.
#[async_trait]
pub trait TaskScheduler: Send + Sync {
    async fn enqueue(&self, task: DelayedTask) -> Result<()>;
}

pub struct FollowupDispatcher {
    sink: Arc<dyn SignalSink>,
    scheduler: Arc<dyn TaskScheduler>,
    exchange: String,
    cfg: Arc<EngineConfig>,
}

impl FollowupDispatcher {
    pub fn new(
        sink: Arc<dyn SignalSink>,
        scheduler: Arc<dyn TaskScheduler>,
        exchange: impl Into<String>,
        cfg: Arc<EngineConfig>,
    ) -> Self {
        Self {
            sink,
            scheduler,
            exchange: exchange.into(),
            cfg,
        }
    }

    /// Persist and fan out the follow-up tasks for one signal.
    pub async fn on_signal(&self, v: &SignalVector) {
        let signal_id = match self.sink.persist_signal(v).await {
            Ok(id) => id,
            Err(e) => {
                error!(symbol = %v.symbol, error = %e, "Signal persist failed; dropping follow-ups");
                return;
            }
        };

        info!(
            signal_id = %signal_id,
            symbol = %v.symbol,
            trigger_price = v.trigger_price,
            volume_ratio = v.volume_ratio_fast_1m,
            slope_z = v.slope_z,
            "Signal emitted"
        );

        let emission_ms = v.signal_timestamp_ms;

        for offset in self.cfg.orderbook_offsets_sec.clone() {
            let task = DelayedTask {
                queue: format!("{}_order", self.exchange),
                kind: format!("{}_orderbook", self.exchange),
                signal_id: signal_id.clone(),
                symbol: v.symbol.clone(),
                t_offset_sec: Some(offset),
                signal_ts_ms: None,
                dispatch_at: emission_ms + offset as i64 * 1_000,
            };
            if let Err(e) = self.scheduler.enqueue(task).await {
                warn!(signal_id = %signal_id, offset, error = %e, "Orderbook task enqueue failed");
            }
        }

        let trajectory = DelayedTask {
            queue: format!("{}_price", self.exchange),
            kind: format!("{}_price", self.exchange),
            signal_id: signal_id.clone(),
            symbol: v.symbol.clone(),
            t_offset_sec: None,
            signal_ts_ms: Some(emission_ms),
            dispatch_at: emission_ms + self.cfg.trajectory_delay_ms,
        };
        if let Err(e) = self.scheduler.enqueue(trajectory).await {
            warn!(signal_id = %signal_id, error = %e, "Trajectory task enqueue failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SurgeflowError;
    use std::sync::Mutex;

    struct RecordingSink {
        fail: bool,
        persisted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SignalSink for RecordingSink {
        async fn persist_signal(&self, v: &SignalVector) -> Result<String> {
            if self.fail {
                return Err(SurgeflowError::Tape("store down".into()));
            }
            self.persisted.lock().unwrap().push(v.id.clone());
            Ok(v.id.clone())
        }
    }

    #[derive(Default)]
    struct RecordingScheduler {
        tasks: Mutex<Vec<DelayedTask>>,
    }

    #[async_trait]
    impl TaskScheduler for RecordingScheduler {
        async fn enqueue(&self, task: DelayedTask) -> Result<()> {
            self.tasks.lock().unwrap().push(task);
            Ok(())
        }
    }

    #[tokio::test]
    async fn four_tasks_with_expected_delays() {
        let sink = Arc::new(RecordingSink {
            fail: false,
            persisted: Mutex::new(Vec::new()),
        });
        let scheduler = Arc::new(RecordingScheduler::default());
        let dispatcher = FollowupDispatcher::new(
            sink.clone(),
            scheduler.clone(),
            "binance",
            Arc::new(EngineConfig::default()),
        );

        let v = SignalVector::sample("sig-42");
        dispatcher.on_signal(&v).await;

        assert_eq!(sink.persisted.lock().unwrap().len(), 1);
        let tasks = scheduler.tasks.lock().unwrap();
        assert_eq!(tasks.len(), 4);

        let emission = v.signal_timestamp_ms;
        let delays: Vec<i64> = tasks.iter().map(|t| t.dispatch_at - emission).collect();
        assert_eq!(delays, vec![3_000, 10_000, 30_000, 1_860_000]);

        for t in tasks.iter().take(3) {
            assert_eq!(t.queue, "binance_order");
            assert_eq!(t.kind, "binance_orderbook");
            assert_eq!(t.signal_id, "sig-42");
        }
        let trajectory = &tasks[3];
        assert_eq!(trajectory.queue, "binance_price");
        assert_eq!(trajectory.kind, "binance_price");
        assert_eq!(trajectory.signal_ts_ms, Some(emission));
    }

    #[tokio::test]
    async fn persist_failure_drops_all_followups() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            persisted: Mutex::new(Vec::new()),
        });
        let scheduler = Arc::new(RecordingScheduler::default());
        let dispatcher = FollowupDispatcher::new(
            sink,
            scheduler.clone(),
            "binance",
            Arc::new(EngineConfig::default()),
        );

        dispatcher.on_signal(&SignalVector::sample("sig-42")).await;
        assert!(scheduler.tasks.lock().unwrap().is_empty());
    }
}
