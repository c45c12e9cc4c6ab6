//! Trajectory worker
//!
//! Consumes delayed price-trajectory tasks 31 minutes after emission,
//! reads the 30-minute second-bar window that followed the signal,
//! resamples it onto a fixed offset grid and computes the realised sigma
//! of the window.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::engine::{
    normalize_symbol, DelayedTask, SecondBar, TrajectoryDoc, TrajectoryPoint,
};
use crate::error::Result;
use crate::metrics;
use crate::storage::DocumentStore;
use crate::tape::BarStore;

/// Post-signal window length.
const WINDOW_MS: i64 = 30 * 60 * 1_000;

/// Offsets: every second for the first 30, a 45 s midpoint, then a 30 s
/// stride out to 30 minutes.
fn offset_grid() -> Vec<u32> {
    let mut offsets: Vec<u32> = (1..=30).collect();
    offsets.push(45);
    offsets.extend((60..=1800).step_by(30).map(|s| s as u32));
    offsets
}

pub struct TrajectoryWorker {
    bars: Arc<dyn BarStore>,
    docs: Arc<DocumentStore>,
    exchange: String,
}

impl TrajectoryWorker {
    pub fn new(bars: Arc<dyn BarStore>, docs: Arc<DocumentStore>, exchange: impl Into<String>) -> Self {
        Self {
            bars,
            docs,
            exchange: exchange.into(),
        }
    }

    /// Consume the price queue until it closes. Tasks are discarded on
    /// failure; the queue never retries.
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<DelayedTask>) {
        info!("Trajectory worker started");
        while let Some(task) = rx.recv().await {
            match self.process(&task).await {
                Ok(()) => metrics::TASKS_COMPLETED.inc(),
                Err(e) => {
                    warn!(signal_id = %task.signal_id, error = %e, "Trajectory task failed");
                    metrics::TASKS_FAILED.inc();
                }
            }
        }
        info!("Trajectory worker stopped");
    }

    pub async fn process(&self, task: &DelayedTask) -> Result<()> {
        let Some(start_ms) = task.signal_ts_ms else {
            warn!(signal_id = %task.signal_id, "Trajectory task without emission timestamp");
            return Ok(());
        };
        let end_ms = start_ms + WINDOW_MS - 1_000;

        let bars = self.bars.read_bars(
            &task.symbol,
            start_ms.div_euclid(1_000),
            end_ms.div_euclid(1_000),
        )?;

        if bars.is_empty() {
            warn!(signal_id = %task.signal_id, symbol = %task.symbol, "No bars in trajectory window");
        }

        let sigma_30m = realised_sigma(&bars);
        let prices = resample(&bars, start_ms);

        let doc = TrajectoryDoc {
            signal_id: task.signal_id.clone(),
            symbol: normalize_symbol(&task.symbol),
            exchange: self.exchange.clone(),
            sigma_30m,
            prices,
        };
        self.docs.save_trajectory(&doc).await?;

        info!(
            signal_id = %task.signal_id,
            symbol = %doc.symbol,
            bars = bars.len(),
            sigma_30m = ?doc.sigma_30m,
            "Trajectory persisted"
        );
        Ok(())
    }
}

/// Population stddev of consecutive-close log returns; `None` with fewer
/// than 2 usable returns.
fn realised_sigma(bars: &[SecondBar]) -> Option<f64> {
    let mut returns = Vec::with_capacity(bars.len().saturating_sub(1));
    for pair in bars.windows(2) {
        if pair[0].close > 0.0 {
            returns.push((pair[1].close / pair[0].close).ln());
        }
    }
    if returns.len() < 2 {
        return None;
    }
    let m = returns.iter().sum::<f64>() / returns.len() as f64;
    let var = returns.iter().map(|r| (r - m) * (r - m)).sum::<f64>() / returns.len() as f64;
    Some(var.sqrt())
}

/// For each grid offset, the first bar at or after `start + s` seconds,
/// else the last available bar; null price when the window is empty.
fn resample(bars: &[SecondBar], start_ms: i64) -> Vec<TrajectoryPoint> {
    offset_grid()
        .into_iter()
        .map(|offset| {
            let target_ms = start_ms + offset as i64 * 1_000;
            let bar = bars
                .iter()
                .find(|b| b.ts_sec * 1_000 >= target_ms)
                .or_else(|| bars.last());
            TrajectoryPoint {
                t_offset_sec: offset,
                price: bar.map(|b| b.close),
                volume: bar.map(|b| b.volume_quote).unwrap_or(0.0),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tape::SqliteBarStore;

    fn task(signal_id: &str, start_ms: i64) -> DelayedTask {
        DelayedTask {
            queue: "binance_price".into(),
            kind: "binance_price".into(),
            signal_id: signal_id.into(),
            symbol: "BTCUSDT".into(),
            t_offset_sec: None,
            signal_ts_ms: Some(start_ms),
            dispatch_at: start_ms + 31 * 60 * 1_000,
        }
    }

    fn dense_bars(start_sec: i64, count: i64) -> Vec<SecondBar> {
        (0..count)
            .map(|i| {
                let price = 100.0 + (i % 7) as f64 * 0.01;
                SecondBar {
                    ts_sec: start_sec + i,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume_quote: 10.0 + i as f64,
                }
            })
            .collect()
    }

    #[test]
    fn grid_shape_matches_contract() {
        let grid = offset_grid();
        assert_eq!(grid[0], 1);
        assert_eq!(grid[29], 30);
        assert_eq!(grid[30], 45);
        assert_eq!(grid[31], 60);
        assert_eq!(*grid.last().unwrap(), 1800);
        assert!(!grid.contains(&2100));
        // 30 one-second offsets + 45 + (60..=1800 step 30).
        assert_eq!(grid.len(), 30 + 1 + 59);
    }

    #[test]
    fn sigma_none_for_sparse_window() {
        assert_eq!(realised_sigma(&[]), None);
        assert_eq!(realised_sigma(&dense_bars(0, 2)), None);
        assert!(realised_sigma(&dense_bars(0, 10)).is_some());
    }

    #[test]
    fn sigma_zero_for_flat_closes() {
        let bars: Vec<SecondBar> = (0..100).map(|i| SecondBar::flat(i, 50.0)).collect();
        assert_eq!(realised_sigma(&bars), Some(0.0));
    }

    #[tokio::test]
    async fn dense_window_fills_every_offset() {
        let bars: Arc<dyn BarStore> = Arc::new(SqliteBarStore::open_in_memory().unwrap());
        let docs = Arc::new(DocumentStore::open_in_memory().await.unwrap());

        let start_ms = 1_700_000_000_000;
        let start_sec = start_ms / 1_000;
        bars.write_bars("BTCUSDT", &dense_bars(start_sec, 1_800)).unwrap();

        let worker = TrajectoryWorker::new(Arc::clone(&bars), Arc::clone(&docs), "binance");
        worker.process(&task("sig-t", start_ms)).await.unwrap();

        let doc = docs.get_trajectory("sig-t").await.unwrap().unwrap();
        assert!(doc.sigma_30m.unwrap() > 0.0);
        assert!(doc.prices.iter().all(|p| p.price.is_some()));

        // Offset 1800 falls past the last in-window bar and clamps to it.
        let last = doc.prices.last().unwrap();
        assert_eq!(last.t_offset_sec, 1800);
        let expected = 100.0 + ((1_799 % 7) as f64) * 0.01;
        assert!((last.price.unwrap() - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn empty_window_persists_null_rows() {
        let bars: Arc<dyn BarStore> = Arc::new(SqliteBarStore::open_in_memory().unwrap());
        let docs = Arc::new(DocumentStore::open_in_memory().await.unwrap());

        let worker = TrajectoryWorker::new(bars, Arc::clone(&docs), "binance");
        worker.process(&task("sig-empty", 42_000)).await.unwrap();

        let doc = docs.get_trajectory("sig-empty").await.unwrap().unwrap();
        assert_eq!(doc.sigma_30m, None);
        assert!(doc.prices.iter().all(|p| p.price.is_none() && p.volume == 0.0));
    }
}
