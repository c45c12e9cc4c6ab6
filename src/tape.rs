//! Second-resolution price tape
//!
//! Builds one OHLCV bar per pair per second from the live trade flow and
//! persists finished bars to a time-indexed store. Gaps between observed
//! seconds are filled with flat zero-volume bars so the trajectory worker
//! always sees a dense series.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::{debug, info, warn};

use crate::engine::SecondBar;
use crate::error::{Result, SurgeflowError};

/// Bars are retained 45 days from the pair's last write.
const BAR_TTL_SECS: i64 = 45 * 24 * 3600;

/// Sorted, per-pair keyed bar storage. The stage is the only writer; the
/// trajectory workers read concurrently. Last write wins per (pair, second).
pub trait BarStore: Send + Sync {
    fn write_bars(&self, pair: &str, bars: &[SecondBar]) -> Result<()>;

    /// Every bar with `ts_sec` in `[start_sec, end_sec]`, ascending.
    fn read_bars(&self, pair: &str, start_sec: i64, end_sec: i64) -> Result<Vec<SecondBar>>;
}

/// Encode a bar value as `open,high,low,close,volume`.
pub fn encode_bar(bar: &SecondBar) -> String {
    format!(
        "{},{},{},{},{}",
        bar.open, bar.high, bar.low, bar.close, bar.volume_quote
    )
}

/// Decode the CSV value produced by [`encode_bar`].
pub fn decode_bar(ts_sec: i64, payload: &str) -> Option<SecondBar> {
    let mut fields = payload.split(',').map(|f| f.parse::<f64>());
    let mut next = || fields.next()?.ok();
    Some(SecondBar {
        ts_sec,
        open: next()?,
        high: next()?,
        low: next()?,
        close: next()?,
        volume_quote: next()?,
    })
}

/// SQLite-backed [`BarStore`] (WAL, single bundled connection).
pub struct SqliteBarStore {
    conn: Mutex<Connection>,
}

impl SqliteBarStore {
    pub fn new(db_path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS bars (
                pair TEXT NOT NULL,
                ts_sec INTEGER NOT NULL,
                payload TEXT NOT NULL,
                PRIMARY KEY (pair, ts_sec)
            );

            CREATE TABLE IF NOT EXISTS bar_expiry (
                pair TEXT PRIMARY KEY,
                expires_at INTEGER NOT NULL
            );
            "#,
        )?;
        info!("Bar store initialized");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn purge_expired(conn: &Connection, now_sec: i64) -> rusqlite::Result<()> {
        conn.execute(
            "DELETE FROM bars WHERE pair IN (SELECT pair FROM bar_expiry WHERE expires_at < ?1)",
            params![now_sec],
        )?;
        conn.execute("DELETE FROM bar_expiry WHERE expires_at < ?1", params![now_sec])?;
        Ok(())
    }
}

impl BarStore for SqliteBarStore {
    fn write_bars(&self, pair: &str, bars: &[SecondBar]) -> Result<()> {
        if bars.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().expect("bar store lock poisoned");
        let now_sec = Utc::now().timestamp();

        let tx = conn.transaction()?;
        for bar in bars {
            tx.execute(
                "INSERT OR REPLACE INTO bars (pair, ts_sec, payload) VALUES (?1, ?2, ?3)",
                params![pair, bar.ts_sec, encode_bar(bar)],
            )?;
        }
        // Refresh the pair's retention window on every write.
        tx.execute(
            "INSERT OR REPLACE INTO bar_expiry (pair, expires_at) VALUES (?1, ?2)",
            params![pair, now_sec + BAR_TTL_SECS],
        )?;
        Self::purge_expired(&tx, now_sec)?;
        tx.commit()?;
        Ok(())
    }

    fn read_bars(&self, pair: &str, start_sec: i64, end_sec: i64) -> Result<Vec<SecondBar>> {
        let conn = self.conn.lock().expect("bar store lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT ts_sec, payload FROM bars \
             WHERE pair = ?1 AND ts_sec BETWEEN ?2 AND ?3 ORDER BY ts_sec ASC",
        )?;
        let rows = stmt.query_map(params![pair, start_sec, end_sec], |row| {
            let ts_sec: i64 = row.get(0)?;
            let payload: String = row.get(1)?;
            Ok((ts_sec, payload))
        })?;

        let mut bars = Vec::new();
        for row in rows {
            let (ts_sec, payload) = row?;
            match decode_bar(ts_sec, &payload) {
                Some(bar) => bars.push(bar),
                None => {
                    return Err(SurgeflowError::Tape(format!(
                        "undecodable bar for {pair} at {ts_sec}"
                    )))
                }
            }
        }
        Ok(bars)
    }
}

/// Per-pair current-second bar builders over a shared [`BarStore`].
pub struct PriceTape {
    store: Arc<dyn BarStore>,
    current: HashMap<String, SecondBar>,
}

impl PriceTape {
    pub fn new(store: Arc<dyn BarStore>) -> Self {
        Self {
            store,
            current: HashMap::new(),
        }
    }

    pub fn store(&self) -> Arc<dyn BarStore> {
        Arc::clone(&self.store)
    }

    /// Fold a trade into the pair's current second bar. When the trade's
    /// second advances past the open bucket, the open bar plus flat
    /// gap-fill bars are flushed to the store and a new bar opens.
    pub fn on_trade(&mut self, pair: &str, price: f64, volume_quote: f64, ts_ms: i64) {
        let sec = ts_ms.div_euclid(1_000);

        let Some(bar) = self.current.get_mut(pair) else {
            self.current.insert(
                pair.to_string(),
                SecondBar {
                    ts_sec: sec,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume_quote,
                },
            );
            return;
        };

        if sec == bar.ts_sec {
            bar.high = bar.high.max(price);
            bar.low = bar.low.min(price);
            bar.close = price;
            bar.volume_quote += volume_quote;
            return;
        }

        if sec < bar.ts_sec {
            // Out-of-order trade older than the open bucket.
            debug!(pair = %pair, trade_sec = sec, open_sec = bar.ts_sec, "Stale trade dropped from tape");
            return;
        }

        // Flush the finished bar plus flat fills for every skipped second.
        let finished = *bar;
        let mut batch = Vec::with_capacity((sec - finished.ts_sec) as usize);
        batch.push(finished);
        for gap_sec in (finished.ts_sec + 1)..sec {
            batch.push(SecondBar::flat(gap_sec, finished.close));
        }
        if let Err(e) = self.store.write_bars(pair, &batch) {
            warn!(pair = %pair, error = %e, "Bar flush failed; keeping current bar in memory");
        }

        self.current.insert(
            pair.to_string(),
            SecondBar {
                ts_sec: sec,
                open: price,
                high: price,
                low: price,
                close: price,
                volume_quote,
            },
        );
    }

    /// Range read by millisecond bounds, inclusive on both floor seconds.
    pub fn get_sec_bars(&self, pair: &str, start_ms: i64, end_ms: i64) -> Result<Vec<SecondBar>> {
        self.store
            .read_bars(pair, start_ms.div_euclid(1_000), end_ms.div_euclid(1_000))
    }

    /// Best-effort flush of the in-memory current bar for every pair.
    pub fn flush(&mut self) {
        for (pair, bar) in &self.current {
            if let Err(e) = self.store.write_bars(pair, std::slice::from_ref(bar)) {
                warn!(pair = %pair, error = %e, "Bar flush failed");
            }
        }
    }
}
