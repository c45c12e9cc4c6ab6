//! Engine tunables
//!
//! Every knob of the feature engine and gate predicate as a typed record
//! with its production default. The dispatch stage and monitors take the
//! config by reference; tests override individual fields.

/// Seconds in a (non-leap) year, the annualisation base for realised
/// volatility from second-resolution log returns.
pub const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 3600.0;

/// Division guard for ratio features.
pub const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Tick period driving periodic computation and gate evaluation.
    pub check_signal_interval_ms: i64,
    /// Width of one rolling price bucket.
    pub price_bucket_duration_ms: i64,
    /// Capacity of the per-symbol aggregated-trade ring.
    pub agg_trade_buffer_size: usize,
    /// How far back the price-impulse guard looks.
    pub price_lookback_window_ms: i64,
    /// EWMA smoothing for the percent-per-second price slope.
    pub price_slope_alpha: f64,
    /// Minimum slope z-score for the impulse guard.
    pub price_slope_zscore: f64,
    /// Minimum number of trades in the trailing second.
    pub min_trades_in_1s: u32,
    /// Maximum (ask - bid) / ask.
    pub max_bid_ask_spread_pct: f64,
    /// Maximum spread after normalising by instantaneous volatility.
    pub max_normalized_spread: f64,

    /// Volume EWMA alphas: roughly 1 s, 1 m and 5 m horizons at tick rate.
    pub ewma_fast_alpha: f64,
    pub ewma_1m_alpha: f64,
    pub ewma_5m_alpha: f64,
    /// EWMA smoothing for the clipped taker buy/sell ratio.
    pub taker_ratio_alpha: f64,

    /// Minimum 1m/5m volume EWMA ratio.
    pub min_volume_spike_ratio_1m_5m: f64,
    /// Minimum volume-acceleration z-score.
    pub volume_accel_zscore: f64,
    /// Minimum 24 h quote volume to consider a symbol at all.
    pub min_24h_volume_usdt: f64,
    /// Expected trade size times the minimum execution multiplier; depth on
    /// the thinner side must cover this much notional.
    pub min_depth_notional_usdt: f64,
    /// Minimum 1-second quote volume regardless of tier.
    pub min_1s_volume_usdt: f64,
    /// Minimum price z-score (price change over instantaneous volatility).
    pub min_price_zscore: f64,
    /// Annualised 5m volatility floor below which the symbol is dormant.
    pub min_volatility_5m: f64,

    /// Dynamic volume threshold base multiple and clamp range.
    pub volume_thresh_base: f64,
    pub volume_thresh_min: f64,
    pub volume_thresh_max: f64,

    /// Minimum time between two emissions for the same symbol.
    pub signal_cooldown_ms: i64,
    /// Hour/day/weekend lookup refresh period.
    pub time_cache_duration_ms: i64,

    /// Capacities of the streaming histories.
    pub return_history_size: usize,
    pub spread_history_size: usize,
    pub trade_imbalance_history_size: usize,
    pub imbalance_history_size: usize,
    pub accel_history_size: usize,
    pub slope_history_size: usize,
    pub rsi_history_size: usize,
    pub price_bucket_count: usize,

    /// Follow-up task delays.
    pub orderbook_offsets_sec: Vec<u32>,
    pub trajectory_delay_ms: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            check_signal_interval_ms: 250,
            price_bucket_duration_ms: 100,
            agg_trade_buffer_size: 250,
            price_lookback_window_ms: 2500,
            price_slope_alpha: 0.4,
            price_slope_zscore: 1.9,
            min_trades_in_1s: 5,
            max_bid_ask_spread_pct: 0.003,
            max_normalized_spread: 3.0,

            ewma_fast_alpha: 0.1175,
            ewma_1m_alpha: 0.00416,
            ewma_5m_alpha: 0.000833,
            taker_ratio_alpha: 0.20,

            min_volume_spike_ratio_1m_5m: 1.5,
            volume_accel_zscore: 2.0,
            min_24h_volume_usdt: 1_000_000.0,
            min_depth_notional_usdt: 500.0 * 5.0,
            min_1s_volume_usdt: 500.0,
            min_price_zscore: 1.5,
            min_volatility_5m: 0.05,

            volume_thresh_base: 4.0,
            volume_thresh_min: 2.5,
            volume_thresh_max: 20.0,

            signal_cooldown_ms: 6_000,
            time_cache_duration_ms: 60_000,

            return_history_size: 300,
            spread_history_size: 60,
            trade_imbalance_history_size: 60,
            imbalance_history_size: 20,
            accel_history_size: 60,
            slope_history_size: 40,
            rsi_history_size: 20,
            // 100 ms buckets spanning comfortably more than the 2.5 s lookback.
            price_bucket_count: 32,

            orderbook_offsets_sec: vec![3, 10, 30],
            trajectory_delay_ms: 31 * 60 * 1000,
        }
    }
}
