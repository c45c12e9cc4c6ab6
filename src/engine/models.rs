//! Data models for the signal engine
//!
//! Canonical stream events, market-cap tiers, second bars, the emitted
//! signal document and the delayed follow-up task shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Market-cap tier controlling liquidity floors and volatility caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Mega,
    Large,
    Mid,
    Small,
    Micro,
}

impl Tier {
    /// Upper bound on 5-minute annualised volatility for this tier.
    #[inline(always)]
    pub fn volatility_cap(&self) -> f64 {
        match self {
            Tier::Mega => 0.50,
            Tier::Large => 0.80,
            Tier::Mid => 1.20,
            Tier::Small => 2.00,
            Tier::Micro => 3.00,
        }
    }

    /// Minimum acceptable 1-second quote volume for this tier.
    #[inline(always)]
    pub fn volume_floor(&self) -> f64 {
        match self {
            Tier::Mega => 1000.0,
            Tier::Large => 600.0,
            Tier::Mid => 500.0,
            Tier::Small => 400.0,
            Tier::Micro => 300.0,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mega" => Some(Tier::Mega),
            "large" => Some(Tier::Large),
            "mid" => Some(Tier::Mid),
            "small" => Some(Tier::Small),
            "micro" => Some(Tier::Micro),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Tier::Mega => "mega",
            Tier::Large => "large",
            Tier::Mid => "mid",
            Tier::Small => "small",
            Tier::Micro => "micro",
        };
        write!(f, "{s}")
    }
}

/// One aggregated trade as held in the per-symbol trade ring.
#[derive(Debug, Clone, Copy)]
pub struct AggTrade {
    pub price: f64,
    pub qty: f64,
    pub event_time_ms: i64,
    pub buyer_is_maker: bool,
}

/// 24 h rolling ticker statistics.
#[derive(Debug, Clone, Copy)]
pub struct TickerStats {
    pub quote_volume_24h: f64,
    pub change_pct_24h: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub last: f64,
}

/// Best bid / best ask quotes.
#[derive(Debug, Clone, Copy)]
pub struct BookTicker {
    pub best_bid: f64,
    pub best_ask: f64,
}

/// One price level of a depth snapshot.
#[derive(Debug, Clone, Copy)]
pub struct DepthLevel {
    pub price: f64,
    pub qty: f64,
}

/// Top-5 levels on each side of the book.
#[derive(Debug, Clone)]
pub struct Depth5 {
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
}

/// Canonical event delivered by the transport to the dispatch stage.
///
/// Every variant carries the upper-cased symbol. Numeric fields are finite
/// and strictly positive by the time an event reaches the stage; the parser
/// drops anything that fails those checks.
#[derive(Debug, Clone)]
pub enum CanonicalEvent {
    AggTrade { symbol: String, trade: AggTrade },
    Ticker { symbol: String, stats: TickerStats },
    BookTicker { symbol: String, book: BookTicker },
    DepthSnapshot { symbol: String, depth: Depth5 },
}

impl CanonicalEvent {
    pub fn symbol(&self) -> &str {
        match self {
            CanonicalEvent::AggTrade { symbol, .. }
            | CanonicalEvent::Ticker { symbol, .. }
            | CanonicalEvent::BookTicker { symbol, .. }
            | CanonicalEvent::DepthSnapshot { symbol, .. } => symbol,
        }
    }
}

/// Second-resolution OHLCV bar in quote currency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SecondBar {
    pub ts_sec: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume_quote: f64,
}

impl SecondBar {
    /// Flat zero-volume bar used for gap filling.
    pub fn flat(ts_sec: i64, close: f64) -> Self {
        Self {
            ts_sec,
            open: close,
            high: close,
            low: close,
            close,
            volume_quote: 0.0,
        }
    }
}

/// Signal document emitted on gate success. Field names follow the wire
/// contract of the downstream store; all values are captured at trigger
/// time and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalVector {
    pub id: String,
    pub exchange: String,
    pub created_at: DateTime<Utc>,
    /// Upper-cased, alphanumeric-only symbol.
    pub symbol: String,
    pub signal_timestamp_ms: i64,
    pub trigger_price: f64,

    // Price impulse
    pub price_change_pct: f64,
    pub price_slope: f64,
    pub slope_z: f64,
    pub price_z_score: f64,

    // Volume spike
    pub volume_ratio_fast_1m: f64,
    pub volume_ratio_1m_5m: f64,
    pub volume_accel_z: f64,
    pub current_1s_volume_usdt: f64,
    pub volume_per_dollar: f64,
    pub dyn_volume_thresh: f64,

    // Realised volatility
    pub volatility_30s: f64,
    pub volatility_5m: f64,
    pub volatility_ratio: f64,

    // Spread
    pub spread_pct: f64,
    pub spread_bps: f64,
    pub normalized_spread: f64,
    pub effective_spread_bps: f64,

    // Depth
    pub depth5_ob_imbalance: f64,
    pub depth5_bid_volume: f64,
    pub depth5_ask_volume: f64,
    pub depth5_total_volume: f64,
    pub depth5_volume_ratio: f64,
    #[serde(rename = "imbalanceMA5")]
    pub imbalance_ma5: f64,
    #[serde(rename = "imbalanceMA20")]
    pub imbalance_ma20: f64,
    pub imbalance_velocity: f64,
    pub imbalance_volatility: f64,

    // Taker flow
    pub taker_ratio_smoothed: f64,
    pub taker_buy_volume_abs: f64,
    pub taker_flow_imbalance: f64,
    pub taker_flow_magnitude: f64,
    pub taker_flow_ratio: f64,

    // Oscillators
    pub ppo_histogram: f64,
    pub ppo_line: f64,
    pub signal_line: f64,
    pub rsi9: f64,

    // EMA stack
    pub ema9_over_21: bool,
    pub ema21_over_50: bool,
    pub ema_alignment_strength: f64,
    pub ema_stacked_bullish: bool,
    pub ema_stacked_bearish: bool,
    pub ema_stacked_neutral: bool,
    pub price_above_ema9: bool,

    // 24h ticker context
    pub ticker_24hr_volume_usdt: f64,
    pub ticker_24hr_price_change_pct: f64,
    pub ticker_24hr_high: f64,
    pub ticker_24hr_low: f64,

    // Session
    pub hour_of_day: u32,
    pub day_of_week: u32,
    pub is_weekend: bool,
}

/// Delayed follow-up task. `dispatch_at` is emission time plus delay; the
/// queue is durable only between enqueue and first attempt (fire once,
/// never retried).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayedTask {
    pub queue: String,
    pub kind: String,
    pub signal_id: String,
    pub symbol: String,
    /// Present for orderbook snapshot tasks.
    pub t_offset_sec: Option<u32>,
    /// Present for price-trajectory tasks: the signal emission time.
    pub signal_ts_ms: Option<i64>,
    pub dispatch_at: i64,
}

/// One resampled point on the post-signal trajectory grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrajectoryPoint {
    pub t_offset_sec: u32,
    pub price: Option<f64>,
    pub volume: f64,
}

/// Document persisted by the trajectory worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrajectoryDoc {
    pub signal_id: String,
    pub symbol: String,
    pub exchange: String,
    pub sigma_30m: Option<f64>,
    pub prices: Vec<TrajectoryPoint>,
}

/// One depth snapshot row appended to a signal's orderbook document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderbookSnapshotRow {
    pub t_offset_sec: u32,
    pub ts_ms: i64,
    pub bid_sum: f64,
    pub ask_sum: f64,
    pub imbalance: f64,
    pub bid_sum_usdt: f64,
    pub ask_sum_usdt: f64,
    pub total_liquidity_usdt: f64,
    pub imbalance_usdt: f64,
    pub mid_price: f64,
    pub best_bid: f64,
    pub best_ask: f64,
    pub spread_bps: f64,
}

#[cfg(test)]
impl SignalVector {
    /// Fully-populated plausible vector for store and dispatcher tests.
    pub(crate) fn sample(id: &str) -> Self {
        Self {
            id: id.to_string(),
            exchange: "binance".into(),
            created_at: Utc::now(),
            symbol: "BTCUSDT".into(),
            signal_timestamp_ms: 1_700_000_000_000,
            trigger_price: 100.3,
            price_change_pct: 0.003,
            price_slope: 0.0015,
            slope_z: 3.0,
            price_z_score: 21.0,
            volume_ratio_fast_1m: 20.0,
            volume_ratio_1m_5m: 10.0,
            volume_accel_z: 20.0,
            current_1s_volume_usdt: 2_000.0,
            volume_per_dollar: 19.94,
            dyn_volume_thresh: 4.03,
            volatility_30s: 0.8,
            volatility_5m: 0.6,
            volatility_ratio: 1.33,
            spread_pct: 0.0002,
            spread_bps: 2.0,
            normalized_spread: 0.82,
            effective_spread_bps: 1.1,
            depth5_ob_imbalance: 0.2,
            depth5_bid_volume: 100.0,
            depth5_ask_volume: 80.0,
            depth5_total_volume: 180.0,
            depth5_volume_ratio: 1.25,
            imbalance_ma5: 0.1,
            imbalance_ma20: 0.05,
            imbalance_velocity: 0.02,
            imbalance_volatility: 0.01,
            taker_ratio_smoothed: 5.0,
            taker_buy_volume_abs: 2_000.0,
            taker_flow_imbalance: 1.0,
            taker_flow_magnitude: 2_000.0,
            taker_flow_ratio: 100.0,
            ppo_histogram: 0.01,
            ppo_line: 0.05,
            signal_line: 0.04,
            rsi9: 88.0,
            ema9_over_21: true,
            ema21_over_50: true,
            ema_alignment_strength: 0.002,
            ema_stacked_bullish: true,
            ema_stacked_bearish: false,
            ema_stacked_neutral: false,
            price_above_ema9: true,
            ticker_24hr_volume_usdt: 5_000_000.0,
            ticker_24hr_price_change_pct: 2.5,
            ticker_24hr_high: 101.0,
            ticker_24hr_low: 97.0,
            hour_of_day: 14,
            day_of_week: 3,
            is_weekend: false,
        }
    }
}

/// Upper-case and strip every non-alphanumeric character.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_parse_roundtrip() {
        for tier in [Tier::Mega, Tier::Large, Tier::Mid, Tier::Small, Tier::Micro] {
            assert_eq!(Tier::parse(&tier.to_string()), Some(tier));
        }
        assert_eq!(Tier::parse("galactic"), None);
    }

    #[test]
    fn tier_caps_are_ordered() {
        assert!(Tier::Mega.volatility_cap() < Tier::Micro.volatility_cap());
        assert!(Tier::Mega.volume_floor() > Tier::Micro.volume_floor());
    }

    #[test]
    fn normalize_strips_separators() {
        assert_eq!(normalize_symbol("btc-usdt"), "BTCUSDT");
        assert_eq!(normalize_symbol("SOL/USDT"), "SOLUSDT");
        assert_eq!(normalize_symbol("ethusdt"), "ETHUSDT");
    }

    #[test]
    fn flat_bar_carries_close() {
        let bar = SecondBar::flat(1_000, 42.5);
        assert_eq!(bar.open, 42.5);
        assert_eq!(bar.high, 42.5);
        assert_eq!(bar.low, 42.5);
        assert_eq!(bar.close, 42.5);
        assert_eq!(bar.volume_quote, 0.0);
    }
}
