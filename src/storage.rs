//! Document store
//!
//! Async SQLite persistence for signal documents, per-signal orderbook
//! documents and trajectory documents. Signals are append-only; the
//! orderbook document is an upsert with an array push per snapshot.

use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::info;

use crate::engine::{OrderbookSnapshotRow, SignalVector, TrajectoryDoc};
use crate::error::Result;
use crate::followup::SignalSink;

/// Async SQLite connection wrapper for signal-adjacent documents.
pub struct DocumentStore {
    conn: Mutex<Connection>,
}

impl DocumentStore {
    pub async fn new(db_path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    /// In-memory store for tests.
    pub async fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS orderbook_docs (
                signal_id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                snapshots TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS trajectories (
                signal_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_signals_symbol ON signals(symbol);
            "#,
        )?;
        info!("Document store initialized");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub async fn save_signal(&self, v: &SignalVector) -> Result<String> {
        let payload = serde_json::to_string(v).expect("signal vector serializes");
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO signals (id, symbol, payload) VALUES (?1, ?2, ?3)",
            params![v.id, v.symbol, payload],
        )?;
        Ok(v.id.clone())
    }

    pub async fn get_signal(&self, id: &str) -> Result<Option<SignalVector>> {
        let conn = self.conn.lock().await;
        let payload: Option<String> = conn
            .query_row("SELECT payload FROM signals WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(payload.and_then(|p| serde_json::from_str(&p).ok()))
    }

    /// Upsert the orderbook document for a signal, appending one snapshot
    /// row to its `snapshots` array.
    pub async fn append_orderbook_snapshot(
        &self,
        signal_id: &str,
        symbol: &str,
        row: &OrderbookSnapshotRow,
    ) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT snapshots FROM orderbook_docs WHERE signal_id = ?1",
                params![signal_id],
                |r| r.get(0),
            )
            .optional()?;

        let mut snapshots: Vec<OrderbookSnapshotRow> = existing
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        snapshots.push(row.clone());
        let encoded = serde_json::to_string(&snapshots).expect("snapshot rows serialize");

        tx.execute(
            "INSERT INTO orderbook_docs (signal_id, symbol, snapshots) VALUES (?1, ?2, ?3) \
             ON CONFLICT(signal_id) DO UPDATE SET symbol = ?2, snapshots = ?3",
            params![signal_id, symbol, encoded],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub async fn get_orderbook_snapshots(
        &self,
        signal_id: &str,
    ) -> Result<Vec<OrderbookSnapshotRow>> {
        let conn = self.conn.lock().await;
        let encoded: Option<String> = conn
            .query_row(
                "SELECT snapshots FROM orderbook_docs WHERE signal_id = ?1",
                params![signal_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(encoded
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default())
    }

    pub async fn save_trajectory(&self, doc: &TrajectoryDoc) -> Result<()> {
        let payload = serde_json::to_string(doc).expect("trajectory doc serializes");
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO trajectories (signal_id, payload) VALUES (?1, ?2)",
            params![doc.signal_id, payload],
        )?;
        Ok(())
    }

    pub async fn get_trajectory(&self, signal_id: &str) -> Result<Option<TrajectoryDoc>> {
        let conn = self.conn.lock().await;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM trajectories WHERE signal_id = ?1",
                params![signal_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(payload.and_then(|p| serde_json::from_str(&p).ok()))
    }

    pub async fn signal_count(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM signals", [], |r| r.get(0))?;
        Ok(count as u64)
    }
}

#[async_trait::async_trait]
impl SignalSink for DocumentStore {
    async fn persist_signal(&self, v: &SignalVector) -> Result<String> {
        self.save_signal(v).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TrajectoryPoint;

    #[tokio::test]
    async fn on_disk_store_initializes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs.db");
        let store = DocumentStore::new(path.to_str().unwrap()).await;
        assert!(store.is_ok());
    }

    #[tokio::test]
    async fn signal_roundtrip() {
        let store = DocumentStore::open_in_memory().await.unwrap();
        let v = SignalVector::sample("sig-1");
        let id = store.save_signal(&v).await.unwrap();
        assert_eq!(id, "sig-1");

        let loaded = store.get_signal("sig-1").await.unwrap().unwrap();
        assert_eq!(loaded.symbol, "BTCUSDT");
        assert_eq!(loaded.trigger_price, 100.3);
        assert!(loaded.ema_stacked_bullish);
    }

    #[tokio::test]
    async fn duplicate_signal_id_is_rejected() {
        let store = DocumentStore::open_in_memory().await.unwrap();
        let v = SignalVector::sample("sig-dup");
        store.save_signal(&v).await.unwrap();
        assert!(store.save_signal(&v).await.is_err());
    }

    #[tokio::test]
    async fn orderbook_snapshots_append_in_order() {
        let store = DocumentStore::open_in_memory().await.unwrap();
        for offset in [3u32, 10, 30] {
            let row = OrderbookSnapshotRow {
                t_offset_sec: offset,
                ts_ms: 1_700_000_000_000 + offset as i64 * 1_000,
                bid_sum: 10.0,
                ask_sum: 8.0,
                imbalance: 0.11,
                bid_sum_usdt: 1_000.0,
                ask_sum_usdt: 800.0,
                total_liquidity_usdt: 1_800.0,
                imbalance_usdt: 0.11,
                mid_price: 100.0,
                best_bid: 99.9,
                best_ask: 100.1,
                spread_bps: 20.0,
            };
            store
                .append_orderbook_snapshot("sig-ob", "BTCUSDT", &row)
                .await
                .unwrap();
        }

        let rows = store.get_orderbook_snapshots("sig-ob").await.unwrap();
        assert_eq!(rows.len(), 3);
        let offsets: Vec<u32> = rows.iter().map(|r| r.t_offset_sec).collect();
        assert_eq!(offsets, vec![3, 10, 30]);
    }

    #[tokio::test]
    async fn trajectory_roundtrip() {
        let store = DocumentStore::open_in_memory().await.unwrap();
        let doc = TrajectoryDoc {
            signal_id: "sig-t".into(),
            symbol: "BTCUSDT".into(),
            exchange: "binance".into(),
            sigma_30m: Some(0.012),
            prices: vec![TrajectoryPoint {
                t_offset_sec: 1,
                price: Some(100.1),
                volume: 42.0,
            }],
        };
        store.save_trajectory(&doc).await.unwrap();

        let loaded = store.get_trajectory("sig-t").await.unwrap().unwrap();
        assert_eq!(loaded.sigma_30m, Some(0.012));
        assert_eq!(loaded.prices.len(), 1);
    }
}
