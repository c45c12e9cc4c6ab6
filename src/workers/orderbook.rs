//! Orderbook worker
//!
//! Consumes delayed orderbook tasks at t+3 s / +10 s / +30 s after a
//! signal, pulls a fresh depth-5 snapshot over REST and appends the
//! liquidity features to the signal's orderbook document. Offsets are
//! independent: one failed snapshot never affects its siblings.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::engine::{DelayedTask, Depth5, DepthLevel, OrderbookSnapshotRow, EPSILON};
use crate::error::{Result, SurgeflowError};
use crate::metrics;
use crate::storage::DocumentStore;

const FETCH_ATTEMPTS: u32 = 3;
const FETCH_BACKOFF_MS: u64 = 250;

/// Depth snapshot source, injected so tests never hit the network.
#[async_trait]
pub trait DepthFetcher: Send + Sync {
    async fn fetch_depth5(&self, symbol: &str) -> Result<Depth5>;
}

/// Exchange REST wire shape: depth levels arrive as decimal strings.
#[derive(Debug, Deserialize)]
struct RestDepthResponse {
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

fn parse_levels(raw: &[[String; 2]]) -> Result<Vec<DepthLevel>> {
    raw.iter()
        .take(5)
        .map(|[p, q]| {
            let price: f64 = p
                .parse()
                .map_err(|_| SurgeflowError::MalformedSnapshot(format!("bad price '{p}'")))?;
            let qty: f64 = q
                .parse()
                .map_err(|_| SurgeflowError::MalformedSnapshot(format!("bad qty '{q}'")))?;
            Ok(DepthLevel { price, qty })
        })
        .collect()
}

/// reqwest-backed fetcher with a short retry/backoff ladder.
pub struct RestDepthFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl RestDepthFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("reqwest client builds");
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl DepthFetcher for RestDepthFetcher {
    async fn fetch_depth5(&self, symbol: &str) -> Result<Depth5> {
        let url = format!("{}/api/v3/depth", self.base_url);
        let mut last_err: Option<SurgeflowError> = None;

        for attempt in 0..FETCH_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(FETCH_BACKOFF_MS << attempt)).await;
            }
            let result = self
                .client
                .get(&url)
                .query(&[("symbol", symbol), ("limit", "5")])
                .send()
                .await
                .and_then(|r| r.error_for_status());

            match result {
                Ok(response) => {
                    let body: RestDepthResponse = response.json().await?;
                    return Ok(Depth5 {
                        bids: parse_levels(&body.bids)?,
                        asks: parse_levels(&body.asks)?,
                    });
                }
                Err(e) => {
                    warn!(symbol = %symbol, attempt, error = %e, "Depth snapshot attempt failed");
                    last_err = Some(e.into());
                }
            }
        }
        Err(last_err.expect("at least one attempt ran"))
    }
}

pub struct OrderbookWorker {
    fetcher: Arc<dyn DepthFetcher>,
    docs: Arc<DocumentStore>,
}

impl OrderbookWorker {
    pub fn new(fetcher: Arc<dyn DepthFetcher>, docs: Arc<DocumentStore>) -> Self {
        Self { fetcher, docs }
    }

    /// Consume the order queue until it closes.
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<DelayedTask>) {
        info!("Orderbook worker started");
        while let Some(task) = rx.recv().await {
            match self.process(&task).await {
                Ok(()) => metrics::TASKS_COMPLETED.inc(),
                Err(e) => {
                    // Snapshot skipped; sibling offsets are unaffected.
                    warn!(
                        signal_id = %task.signal_id,
                        t_offset = ?task.t_offset_sec,
                        error = %e,
                        "Orderbook task failed"
                    );
                    metrics::TASKS_FAILED.inc();
                }
            }
        }
        info!("Orderbook worker stopped");
    }

    pub async fn process(&self, task: &DelayedTask) -> Result<()> {
        let t_offset = task.t_offset_sec.unwrap_or(0);
        let depth = self.fetcher.fetch_depth5(&task.symbol).await?;
        let row = snapshot_row(&depth, t_offset, Utc::now().timestamp_millis())?;

        self.docs
            .append_orderbook_snapshot(&task.signal_id, &task.symbol, &row)
            .await?;

        info!(
            signal_id = %task.signal_id,
            symbol = %task.symbol,
            t_offset,
            imbalance = row.imbalance,
            "Orderbook snapshot appended"
        );
        Ok(())
    }
}

/// Liquidity features over a depth-5 snapshot.
fn snapshot_row(depth: &Depth5, t_offset_sec: u32, ts_ms: i64) -> Result<OrderbookSnapshotRow> {
    let (Some(best_bid), Some(best_ask)) = (depth.bids.first(), depth.asks.first()) else {
        return Err(SurgeflowError::MalformedSnapshot("empty book side".into()));
    };

    let bid_sum: f64 = depth.bids.iter().take(5).map(|l| l.qty).sum();
    let ask_sum: f64 = depth.asks.iter().take(5).map(|l| l.qty).sum();
    let best_bid = best_bid.price;
    let best_ask = best_ask.price;
    let mid = (best_bid + best_ask) / 2.0;

    let bid_sum_usdt = bid_sum * mid;
    let ask_sum_usdt = ask_sum * mid;
    let total_usdt = bid_sum_usdt + ask_sum_usdt;

    Ok(OrderbookSnapshotRow {
        t_offset_sec,
        ts_ms,
        bid_sum,
        ask_sum,
        imbalance: (bid_sum - ask_sum) / (bid_sum + ask_sum + EPSILON),
        bid_sum_usdt,
        ask_sum_usdt,
        total_liquidity_usdt: total_usdt,
        imbalance_usdt: (bid_sum_usdt - ask_sum_usdt) / (total_usdt + EPSILON),
        mid_price: mid,
        best_bid,
        best_ask,
        spread_bps: (best_ask - best_bid) / best_ask * 10_000.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDepth {
        depth: Depth5,
    }

    #[async_trait]
    impl DepthFetcher for FixedDepth {
        async fn fetch_depth5(&self, _symbol: &str) -> Result<Depth5> {
            Ok(self.depth.clone())
        }
    }

    struct FailingDepth;

    #[async_trait]
    impl DepthFetcher for FailingDepth {
        async fn fetch_depth5(&self, _symbol: &str) -> Result<Depth5> {
            Err(SurgeflowError::MalformedSnapshot("boom".into()))
        }
    }

    fn depth() -> Depth5 {
        let level = |p: f64, q: f64| DepthLevel { price: p, qty: q };
        Depth5 {
            bids: vec![
                level(99.9, 4.0),
                level(99.8, 3.0),
                level(99.7, 2.0),
                level(99.6, 0.5),
                level(99.5, 0.5),
            ],
            asks: vec![
                level(100.1, 2.0),
                level(100.2, 2.0),
                level(100.3, 0.5),
                level(100.4, 0.25),
                level(100.5, 0.25),
            ],
        }
    }

    fn task(signal_id: &str, offset: u32) -> DelayedTask {
        DelayedTask {
            queue: "binance_order".into(),
            kind: "binance_orderbook".into(),
            signal_id: signal_id.into(),
            symbol: "BTCUSDT".into(),
            t_offset_sec: Some(offset),
            signal_ts_ms: None,
            dispatch_at: 0,
        }
    }

    #[test]
    fn snapshot_features_are_consistent() {
        let row = snapshot_row(&depth(), 3, 1_700_000_003_000).unwrap();
        assert_eq!(row.bid_sum, 10.0);
        assert_eq!(row.ask_sum, 5.0);
        assert_eq!(row.mid_price, 100.0);
        assert!((row.imbalance - 1.0 / 3.0).abs() < 1e-6);
        assert!((row.bid_sum_usdt - 1_000.0).abs() < 1e-9);
        assert!((row.total_liquidity_usdt - 1_500.0).abs() < 1e-9);
        assert!(row.spread_bps > 0.0 && row.spread_bps < 100.0);
    }

    #[test]
    fn empty_side_is_malformed() {
        let mut d = depth();
        d.asks.clear();
        assert!(snapshot_row(&d, 3, 0).is_err());
    }

    #[test]
    fn rest_levels_parse_decimal_strings() {
        let raw = vec![
            ["100.5".to_string(), "2.25".to_string()],
            ["100.4".to_string(), "1.0".to_string()],
        ];
        let levels = parse_levels(&raw).unwrap();
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].price, 100.5);
        assert_eq!(levels[0].qty, 2.25);

        let bad = vec![["abc".to_string(), "1.0".to_string()]];
        assert!(parse_levels(&bad).is_err());
    }

    #[tokio::test]
    async fn offsets_accumulate_on_one_document() {
        let docs = Arc::new(DocumentStore::open_in_memory().await.unwrap());
        let worker = OrderbookWorker::new(Arc::new(FixedDepth { depth: depth() }), Arc::clone(&docs));

        for offset in [3, 10, 30] {
            worker.process(&task("sig-ob", offset)).await.unwrap();
        }

        let rows = docs.get_orderbook_snapshots("sig-ob").await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].t_offset_sec, 30);
    }

    #[tokio::test]
    async fn fetch_failure_skips_persist() {
        let docs = Arc::new(DocumentStore::open_in_memory().await.unwrap());
        let worker = OrderbookWorker::new(Arc::new(FailingDepth), Arc::clone(&docs));

        assert!(worker.process(&task("sig-fail", 3)).await.is_err());
        let rows = docs.get_orderbook_snapshots("sig-fail").await.unwrap();
        assert!(rows.is_empty());
    }
}
