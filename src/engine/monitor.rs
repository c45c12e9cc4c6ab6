//! Per-symbol monitor
//!
//! Owns every streaming estimator for one trading pair and runs the fixed
//! 10-step periodic computation each tick. The monitor is single-owner
//! state: only the dispatch stage touches it, one event or tick at a time,
//! so nothing here locks.

use std::sync::Arc;

use crate::engine::config::{EngineConfig, EPSILON, SECONDS_PER_YEAR};
use crate::engine::gate::TimeCache;
use crate::engine::indicators::{mean, stddev_population, stddev_sample, Ema, Ewma, Ppo, Rsi};
use crate::engine::models::{AggTrade, BookTicker, Depth5, TickerStats, Tier};
use crate::ring::RingBuffer;

/// One sampled log return, at most one per second.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReturnSample {
    pub time_ms: i64,
    pub ret: f64,
}

/// One 100 ms price bucket.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PriceBucket {
    pub bucket_ts_ms: i64,
    pub price: f64,
}

pub struct SymbolMonitor {
    pub symbol: String,
    pub tier: Tier,
    pub(crate) cfg: Arc<EngineConfig>,

    // Quotes
    pub(crate) last_price: f64,
    pub(crate) best_bid: f64,
    pub(crate) best_ask: f64,
    pub(crate) mid: f64,

    // 24h ticker context
    pub(crate) ticker_24h_volume_usdt: f64,
    pub(crate) ticker_24h_change_pct: f64,
    pub(crate) ticker_24h_high: f64,
    pub(crate) ticker_24h_low: f64,
    pub(crate) ticker_24h_last: f64,

    // Trades
    pub(crate) agg_trades: RingBuffer<AggTrade>,
    pub(crate) effective_spread_bps: RingBuffer<f64>,
    pub(crate) effective_spread_mean: f64,
    pub(crate) trade_imbalance: RingBuffer<f64>,

    // Depth-5
    pub(crate) depth5_bid_volume: f64,
    pub(crate) depth5_ask_volume: f64,
    pub(crate) depth5_total_volume: f64,
    pub(crate) depth5_volume_ratio: f64,
    pub(crate) depth5_ob_imbalance: f64,
    pub(crate) imbalance_history: RingBuffer<f64>,
    pub(crate) imbalance_ma5: f64,
    pub(crate) imbalance_ma20: f64,
    pub(crate) imbalance_velocity: f64,
    pub(crate) imbalance_volatility: f64,

    // Realised volatility from second-resolution log returns
    pub(crate) returns: RingBuffer<ReturnSample>,
    pub(crate) last_return_sample_ms: i64,
    pub(crate) prev_return_ref_price: f64,
    pub(crate) volatility_30s: f64,
    pub(crate) volatility_5m: f64,
    pub(crate) volatility_ratio: f64,

    // Trailing-second trade aggregation
    pub(crate) vol_1s: f64,
    pub(crate) trade_count_1s: u32,
    pub(crate) taker_buy_1s: f64,
    pub(crate) taker_sell_1s: f64,

    // Volume EWMAs and acceleration
    pub(crate) ewma_fast: Ewma,
    pub(crate) ewma_1m: Ewma,
    pub(crate) ewma_5m: Ewma,
    pub(crate) volume_accel: f64,
    pub(crate) accel_history: RingBuffer<f64>,
    pub(crate) accel_sigma: f64,

    // Rolling price buckets
    pub(crate) price_buckets: RingBuffer<PriceBucket>,

    // EMA stack
    pub(crate) ema9: Ema,
    pub(crate) ema21: Ema,
    pub(crate) ema50: Ema,
    pub(crate) ema_stacked_bullish: bool,
    pub(crate) ema_stacked_bearish: bool,
    pub(crate) ema9_21_spread: f64,
    pub(crate) ema21_50_spread: f64,
    pub(crate) ema_alignment_strength: f64,
    pub(crate) price_above_ema9: bool,

    // Oscillators
    pub(crate) rsi: Rsi,
    pub(crate) ppo: Ppo,

    // Taker flow
    pub(crate) taker_flow_imbalance: f64,
    pub(crate) taker_flow_magnitude: f64,
    pub(crate) taker_flow_ratio: f64,
    pub(crate) taker_ratio_smoothed: Ewma,

    // Price slope
    pub(crate) slope_ewma: Ewma,
    pub(crate) price_slope: f64,
    pub(crate) slope_history: RingBuffer<f64>,
    pub(crate) price_slope_sigma: f64,

    // Gate bookkeeping
    pub(crate) last_signal_trigger_ms: i64,
    pub(crate) time_cache: TimeCache,
}

impl SymbolMonitor {
    pub fn new(symbol: impl Into<String>, tier: Tier, cfg: Arc<EngineConfig>) -> Self {
        Self {
            symbol: symbol.into(),
            tier,
            last_price: 0.0,
            best_bid: 0.0,
            best_ask: 0.0,
            mid: 0.0,
            ticker_24h_volume_usdt: 0.0,
            ticker_24h_change_pct: 0.0,
            ticker_24h_high: 0.0,
            ticker_24h_low: 0.0,
            ticker_24h_last: 0.0,
            agg_trades: RingBuffer::new(cfg.agg_trade_buffer_size),
            effective_spread_bps: RingBuffer::new(cfg.spread_history_size),
            effective_spread_mean: 0.0,
            trade_imbalance: RingBuffer::new(cfg.trade_imbalance_history_size),
            depth5_bid_volume: 0.0,
            depth5_ask_volume: 0.0,
            depth5_total_volume: 0.0,
            depth5_volume_ratio: 0.0,
            depth5_ob_imbalance: 0.0,
            imbalance_history: RingBuffer::new(cfg.imbalance_history_size),
            imbalance_ma5: 0.0,
            imbalance_ma20: 0.0,
            imbalance_velocity: 0.0,
            imbalance_volatility: 0.0,
            returns: RingBuffer::new(cfg.return_history_size),
            last_return_sample_ms: 0,
            prev_return_ref_price: 0.0,
            volatility_30s: 0.0,
            volatility_5m: 0.0,
            volatility_ratio: 1.0,
            vol_1s: 0.0,
            trade_count_1s: 0,
            taker_buy_1s: 0.0,
            taker_sell_1s: 0.0,
            ewma_fast: Ewma::new(cfg.ewma_fast_alpha),
            ewma_1m: Ewma::new(cfg.ewma_1m_alpha),
            ewma_5m: Ewma::new(cfg.ewma_5m_alpha),
            volume_accel: 0.0,
            accel_history: RingBuffer::new(cfg.accel_history_size),
            accel_sigma: 0.0,
            price_buckets: RingBuffer::new(cfg.price_bucket_count),
            ema9: Ema::new(9),
            ema21: Ema::new(21),
            ema50: Ema::new(50),
            ema_stacked_bullish: false,
            ema_stacked_bearish: false,
            ema9_21_spread: 0.0,
            ema21_50_spread: 0.0,
            ema_alignment_strength: 0.0,
            price_above_ema9: false,
            rsi: Rsi::new(9, cfg.rsi_history_size),
            ppo: Ppo::new(3, 10, 16),
            taker_flow_imbalance: 0.0,
            taker_flow_magnitude: 0.0,
            taker_flow_ratio: 0.0,
            taker_ratio_smoothed: Ewma::new(cfg.taker_ratio_alpha),
            slope_ewma: Ewma::new(cfg.price_slope_alpha),
            price_slope: 0.0,
            slope_history: RingBuffer::new(cfg.slope_history_size),
            price_slope_sigma: 0.0,
            last_signal_trigger_ms: i64::MIN / 2,
            time_cache: TimeCache::new(),
            cfg,
        }
    }

    // ------------------------------------------------------------------
    // Event handlers
    // ------------------------------------------------------------------

    pub fn apply_ticker(&mut self, stats: &TickerStats) {
        self.ticker_24h_volume_usdt = stats.quote_volume_24h;
        self.ticker_24h_change_pct = stats.change_pct_24h;
        self.ticker_24h_high = stats.high_24h;
        self.ticker_24h_low = stats.low_24h;
        self.ticker_24h_last = stats.last;
    }

    pub fn apply_book_ticker(&mut self, book: &BookTicker) {
        if book.best_bid.is_finite() && book.best_bid > 0.0 {
            self.best_bid = book.best_bid;
        }
        if book.best_ask.is_finite() && book.best_ask > 0.0 {
            self.best_ask = book.best_ask;
        }
        if self.best_bid > 0.0 && self.best_ask > 0.0 {
            self.mid = (self.best_bid + self.best_ask) / 2.0;
        }
    }

    pub fn add_agg_trade(&mut self, trade: AggTrade) {
        self.last_price = trade.price;

        if self.mid > 0.0 {
            let eff_bps = (trade.price - self.mid).abs() / self.mid * 10_000.0;
            self.effective_spread_bps.add(eff_bps);
            self.effective_spread_mean = {
                let snapshot = self.effective_spread_bps.to_vec();
                mean(&snapshot)
            };
        }

        let signed = if trade.buyer_is_maker { -trade.qty } else { trade.qty };
        self.trade_imbalance.add(signed);

        self.agg_trades.add(trade);
    }

    pub fn update_depth_snapshot(&mut self, depth: &Depth5) {
        let bid: f64 = depth.bids.iter().take(5).map(|l| l.qty).sum();
        let ask: f64 = depth.asks.iter().take(5).map(|l| l.qty).sum();

        self.depth5_bid_volume = bid;
        self.depth5_ask_volume = ask;
        self.depth5_total_volume = bid + ask;
        self.depth5_volume_ratio = bid / (ask + EPSILON);
        self.depth5_ob_imbalance = (bid - ask) / (bid + ask + EPSILON);

        let previous = self.imbalance_history.newest().copied();
        self.imbalance_history.add(self.depth5_ob_imbalance);

        let snapshot = self.imbalance_history.to_vec();
        let n = snapshot.len();
        let last5 = &snapshot[n.saturating_sub(5)..];
        self.imbalance_ma5 = mean(last5);
        self.imbalance_ma20 = mean(&snapshot);
        self.imbalance_velocity = match previous {
            Some(prev) => self.depth5_ob_imbalance - prev,
            None => 0.0,
        };
        let last10 = &snapshot[n.saturating_sub(10)..];
        self.imbalance_volatility = stddev_population(last10);
    }

    // ------------------------------------------------------------------
    // Periodic computation (one tick, fixed step order)
    // ------------------------------------------------------------------

    pub fn perform_periodic_calculations(&mut self, now_ms: i64) {
        self.sample_realised_volatility(now_ms);
        self.aggregate_trailing_second(now_ms);
        self.update_volume_ewmas();
        self.record_price_bucket(now_ms);
        self.update_ema_stack();
        self.update_oscillators();
        self.update_taker_flow();
        self.update_accel_sigma();
        self.update_price_slope(now_ms);
    }

    /// Step 1: log-return sampling (at most once per second) and the 30 s /
    /// 5 m realised volatility windows.
    fn sample_realised_volatility(&mut self, now_ms: i64) {
        if self.last_price > 0.0 && now_ms - self.last_return_sample_ms >= 1_000 {
            if self.prev_return_ref_price > 0.0 {
                let ret = (self.last_price / self.prev_return_ref_price).ln();
                self.returns.add(ReturnSample { time_ms: now_ms, ret });
            }
            self.prev_return_ref_price = self.last_price;
            self.last_return_sample_ms = now_ms;
        }

        self.volatility_30s = self.window_volatility(now_ms, 30_000, 10);
        self.volatility_5m = self.window_volatility(now_ms, 300_000, 30);
        self.volatility_ratio = if self.volatility_5m > 0.0 {
            self.volatility_30s / self.volatility_5m
        } else {
            1.0
        };
    }

    fn window_volatility(&self, now_ms: i64, window_ms: i64, min_samples: usize) -> f64 {
        let cutoff = now_ms - window_ms;
        let rets: Vec<f64> = self
            .returns
            .iter()
            .filter(|s| s.time_ms >= cutoff)
            .map(|s| s.ret)
            .collect();
        if rets.len() < min_samples {
            return 0.0;
        }
        stddev_sample(&rets) * SECONDS_PER_YEAR.sqrt()
    }

    /// Step 2: scan the trade ring newest-first while events are within the
    /// trailing second. Late trades stay in the ring but never count here.
    fn aggregate_trailing_second(&mut self, now_ms: i64) {
        let cutoff = now_ms - 1_000;
        let mut vol = 0.0;
        let mut count = 0u32;
        let mut buy = 0.0;
        let mut sell = 0.0;

        for i in (0..self.agg_trades.len()).rev() {
            let trade = match self.agg_trades.get(i) {
                Some(t) => *t,
                None => break,
            };
            if trade.event_time_ms < cutoff {
                break;
            }
            let notional = trade.price * trade.qty;
            vol += notional;
            count += 1;
            if trade.buyer_is_maker {
                sell += notional;
            } else {
                buy += notional;
            }
        }

        self.vol_1s = vol;
        self.trade_count_1s = count;
        self.taker_buy_1s = buy;
        self.taker_sell_1s = sell;
    }

    /// Step 3: fast / 1 m / 5 m volume EWMAs, seeded lazily to the first
    /// positive 1-second volume, and the fast-EWMA acceleration.
    fn update_volume_ewmas(&mut self) {
        if !self.ewma_fast.is_seeded() {
            if self.vol_1s > 0.0 {
                self.ewma_fast.update(self.vol_1s);
                self.ewma_1m.update(self.vol_1s);
                self.ewma_5m.update(self.vol_1s);
            }
            return;
        }
        let prev_fast = self.ewma_fast.value().unwrap_or(0.0);
        let fast = self.ewma_fast.update(self.vol_1s);
        self.ewma_1m.update(self.vol_1s);
        self.ewma_5m.update(self.vol_1s);
        self.volume_accel = fast - prev_fast;
    }

    /// Step 4: open or overwrite the 100 ms price bucket for this tick.
    fn record_price_bucket(&mut self, now_ms: i64) {
        if self.last_price <= 0.0 {
            return;
        }
        let bucket_floor =
            now_ms / self.cfg.price_bucket_duration_ms * self.cfg.price_bucket_duration_ms;
        let price = self.last_price;
        if let Some(open) = self.price_buckets.newest_mut() {
            if open.bucket_ts_ms == bucket_floor {
                open.price = price;
                return;
            }
        }
        self.price_buckets.add(PriceBucket {
            bucket_ts_ms: bucket_floor,
            price,
        });
    }

    /// Bucketed price as of `target_ms`: the newest bucket at or before the
    /// target still held in the ring.
    pub(crate) fn bucket_price_at(&self, target_ms: i64) -> Option<f64> {
        for i in (0..self.price_buckets.len()).rev() {
            let bucket = self.price_buckets.get(i)?;
            if bucket.bucket_ts_ms <= target_ms {
                return Some(bucket.price);
            }
        }
        None
    }

    /// Step 5: EMA 9/21/50 over last price and the derived stack shape.
    fn update_ema_stack(&mut self) {
        if self.last_price <= 0.0 {
            return;
        }
        let e9 = self.ema9.update(self.last_price);
        let e21 = self.ema21.update(self.last_price);
        let e50 = self.ema50.update(self.last_price);

        self.ema_stacked_bullish = e9 > e21 && e21 > e50;
        self.ema_stacked_bearish = e9 < e21 && e21 < e50;
        self.ema9_21_spread = (e9 - e21) / self.last_price;
        self.ema21_50_spread = (e21 - e50) / self.last_price;
        self.ema_alignment_strength = self.ema9_21_spread + self.ema21_50_spread;
        self.price_above_ema9 = self.last_price > e9;
    }

    /// Steps 6 and 7: RSI(9) and PPO(3, 10, 16) over last price.
    fn update_oscillators(&mut self) {
        if self.last_price <= 0.0 {
            return;
        }
        self.rsi.update(self.last_price);
        self.ppo.update(self.last_price);
    }

    /// Step 8: taker flow imbalance, magnitude and the clipped ratio plus
    /// its EWMA-smoothed track.
    fn update_taker_flow(&mut self) {
        let buy = self.taker_buy_1s;
        let sell = self.taker_sell_1s;
        self.taker_flow_imbalance = (buy - sell) / (buy + sell + EPSILON);
        self.taker_flow_magnitude = buy + sell;
        self.taker_flow_ratio = (buy / (sell + EPSILON)).min(100.0);
        self.taker_ratio_smoothed.update(self.taker_flow_ratio);
    }

    /// Step 9: volume-acceleration sigma over the last 60 ticks.
    fn update_accel_sigma(&mut self) {
        self.accel_history.add(self.volume_accel);
        if self.accel_history.len() >= 20 {
            let snapshot = self.accel_history.to_vec();
            self.accel_sigma = stddev_population(&snapshot);
        }
    }

    /// Step 10: percent-per-second price slope against the bucket price two
    /// seconds back, EWMA-smoothed, with its own sigma.
    fn update_price_slope(&mut self, now_ms: i64) {
        if self.last_price <= 0.0 {
            return;
        }
        let Some(price_then) = self.bucket_price_at(now_ms - 2_000) else {
            return;
        };
        if price_then <= 0.0 {
            return;
        }
        let slope_per_sec = ((self.last_price - price_then) / price_then) / 2.0;
        self.price_slope = self.slope_ewma.update(slope_per_sec);
        self.slope_history.add(self.price_slope);
        if self.slope_history.len() >= 20 {
            let snapshot = self.slope_history.to_vec();
            self.price_slope_sigma = stddev_population(&snapshot);
        }
    }

    // ------------------------------------------------------------------
    // Read accessors used outside the engine
    // ------------------------------------------------------------------

    pub fn last_price(&self) -> f64 {
        self.last_price
    }

    /// Last price as reported by the 24 h ticker stream (context only; the
    /// engine's own last price comes from trades).
    pub fn ticker_last(&self) -> f64 {
        self.ticker_24h_last
    }

    pub fn spread_pct(&self) -> Option<f64> {
        if self.best_ask > self.best_bid && self.best_bid > 0.0 {
            Some((self.best_ask - self.best_bid) / self.best_ask)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> SymbolMonitor {
        SymbolMonitor::new("BTCUSDT", Tier::Mega, Arc::new(EngineConfig::default()))
    }

    fn trade(price: f64, qty: f64, ts: i64, buyer_is_maker: bool) -> AggTrade {
        AggTrade {
            price,
            qty,
            event_time_ms: ts,
            buyer_is_maker,
        }
    }

    #[test]
    fn book_ticker_ignores_nonpositive_quotes() {
        let mut m = monitor();
        m.apply_book_ticker(&BookTicker {
            best_bid: 100.0,
            best_ask: 100.2,
        });
        assert_eq!(m.mid, 100.1);

        m.apply_book_ticker(&BookTicker {
            best_bid: -1.0,
            best_ask: f64::NAN,
        });
        assert_eq!(m.best_bid, 100.0);
        assert_eq!(m.best_ask, 100.2);
    }

    #[test]
    fn spread_pct_bounded_when_quotes_valid() {
        let mut m = monitor();
        m.apply_book_ticker(&BookTicker {
            best_bid: 99.5,
            best_ask: 100.5,
        });
        let spread = m.spread_pct().unwrap();
        assert!(spread > 0.0 && spread < 1.0);
    }

    #[test]
    fn trailing_second_skips_late_trades() {
        let mut m = monitor();
        let now = 1_000_000;
        m.add_agg_trade(trade(100.0, 1.0, now - 5_000, false)); // late
        m.add_agg_trade(trade(100.0, 2.0, now - 500, false));
        m.add_agg_trade(trade(100.0, 3.0, now - 100, true));

        m.perform_periodic_calculations(now);

        assert_eq!(m.trade_count_1s, 2);
        assert!((m.vol_1s - 500.0).abs() < 1e-9);
        assert!((m.taker_buy_1s - 200.0).abs() < 1e-9);
        assert!((m.taker_sell_1s - 300.0).abs() < 1e-9);
        // Ring and last price still see the late trade.
        assert_eq!(m.agg_trades.len(), 3);
    }

    #[test]
    fn constant_price_stream_has_zero_volatility() {
        let mut m = monitor();
        let mut now = 1_000_000;
        m.add_agg_trade(trade(250.0, 1.0, now, false));
        // 40 seconds of ticks over an unmoving price.
        for _ in 0..160 {
            m.perform_periodic_calculations(now);
            now += 250;
        }
        assert_eq!(m.volatility_30s, 0.0);
        assert!(m.returns.len() >= 10);
    }

    #[test]
    fn volume_ewmas_seed_on_first_positive_second() {
        let mut m = monitor();
        let mut now = 1_000_000;

        // Ticks with no trades leave the EWMAs unseeded.
        for _ in 0..8 {
            m.perform_periodic_calculations(now);
            now += 250;
        }
        assert!(!m.ewma_fast.is_seeded());

        m.add_agg_trade(trade(10.0, 5.0, now - 10, false));
        m.perform_periodic_calculations(now);
        assert_eq!(m.ewma_fast.value(), Some(50.0));
        assert_eq!(m.ewma_5m.value(), Some(50.0));
    }

    #[test]
    fn depth_snapshot_updates_imbalance_block() {
        let mut m = monitor();
        let level = |p: f64, q: f64| crate::engine::models::DepthLevel { price: p, qty: q };
        let depth = Depth5 {
            bids: vec![level(99.0, 6.0); 5],
            asks: vec![level(101.0, 2.0); 5],
        };
        m.update_depth_snapshot(&depth);

        assert_eq!(m.depth5_bid_volume, 30.0);
        assert_eq!(m.depth5_ask_volume, 10.0);
        assert!(m.depth5_ob_imbalance > 0.0);
        assert_eq!(m.imbalance_velocity, 0.0);

        let depth2 = Depth5 {
            bids: vec![level(99.0, 2.0); 5],
            asks: vec![level(101.0, 6.0); 5],
        };
        m.update_depth_snapshot(&depth2);
        assert!(m.imbalance_velocity < 0.0);
        assert_eq!(m.imbalance_history.len(), 2);
    }

    #[test]
    fn effective_spread_tracks_distance_from_mid() {
        let mut m = monitor();
        m.apply_book_ticker(&BookTicker {
            best_bid: 99.99,
            best_ask: 100.01,
        });
        m.add_agg_trade(trade(100.10, 1.0, 0, false));
        // |100.10 - 100.00| / 100.00 * 1e4 = 10 bps
        assert!((m.effective_spread_mean - 10.0).abs() < 1e-6);
    }

    #[test]
    fn bucket_price_lookup_returns_as_of_price() {
        let mut m = monitor();
        let t0 = 1_000_000;
        m.add_agg_trade(trade(100.0, 1.0, t0, false));
        m.perform_periodic_calculations(t0);
        m.add_agg_trade(trade(101.0, 1.0, t0 + 2_000, false));
        m.perform_periodic_calculations(t0 + 2_000);

        assert_eq!(m.bucket_price_at(t0 + 2_000 - 2_000), Some(100.0));
        assert_eq!(m.bucket_price_at(t0 + 2_500), Some(101.0));
        assert_eq!(m.bucket_price_at(t0 - 1_000), None);
    }

    #[test]
    fn rising_prices_produce_positive_smoothed_slope() {
        let mut m = monitor();
        let mut now = 1_000_000;
        let mut price = 100.0;
        for _ in 0..40 {
            m.add_agg_trade(trade(price, 1.0, now, false));
            m.perform_periodic_calculations(now);
            price *= 1.0005;
            now += 250;
        }
        assert!(m.price_slope > 0.0);
        assert!(m.price_slope_sigma > 0.0);
    }
}
