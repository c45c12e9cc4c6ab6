//! Signal gate
//!
//! The multi-stage predicate evaluated for every monitor on every tick,
//! after periodic computation. Every guard must pass before a
//! [`SignalVector`] is constructed; a single emission arms the per-symbol
//! cooldown.

use chrono::{Datelike, TimeZone, Timelike, Utc};
use uuid::Uuid;

use crate::engine::config::SECONDS_PER_YEAR;
use crate::engine::models::{normalize_symbol, SignalVector};
use crate::engine::monitor::SymbolMonitor;

/// Cached hour-of-day / day-of-week / weekend lookup, refreshed at most
/// once per `time_cache_duration_ms`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TimeCache {
    pub hour_of_day: u32,
    pub day_of_week: u32,
    pub is_weekend: bool,
    refreshed_ms: i64,
}

impl TimeCache {
    pub(crate) fn new() -> Self {
        Self {
            hour_of_day: 0,
            day_of_week: 0,
            is_weekend: false,
            refreshed_ms: i64::MIN,
        }
    }

    pub(crate) fn refresh(&mut self, now_ms: i64, ttl_ms: i64) {
        if now_ms.saturating_sub(self.refreshed_ms) < ttl_ms {
            return;
        }
        if let Some(dt) = Utc.timestamp_millis_opt(now_ms).single() {
            self.hour_of_day = dt.hour();
            // 0 = Sunday, matching the downstream document convention.
            self.day_of_week = dt.weekday().num_days_from_sunday();
            self.is_weekend = self.day_of_week == 0 || self.day_of_week == 6;
            self.refreshed_ms = now_ms;
        }
    }

    /// Session multiplier for the dynamic volume threshold.
    pub(crate) fn session_factor(&self) -> f64 {
        if self.is_weekend {
            0.8
        } else if (13..=17).contains(&self.hour_of_day) {
            1.5
        } else if self.hour_of_day < 7 {
            0.75
        } else {
            1.0
        }
    }
}

impl SymbolMonitor {
    /// Evaluate the gate. Returns a signal vector when every guard passes,
    /// arming the cooldown as a side effect.
    pub fn check_signal(&mut self, now_ms: i64, exchange: &str) -> Option<SignalVector> {
        // Warm state: a price, a seeded 5m volume baseline, enough return
        // history and live short-horizon volatility.
        let ewma_5m = self.ewma_5m.value().unwrap_or(0.0);
        if self.last_price <= 0.0 || ewma_5m <= 0.0 {
            return None;
        }
        if self.returns.len() < 30 || self.volatility_30s <= 0.0 {
            return None;
        }

        // Symbol-level liquidity floors.
        if self.ticker_24h_volume_usdt < self.cfg.min_24h_volume_usdt {
            return None;
        }
        let thin_side = self.depth5_bid_volume.min(self.depth5_ask_volume);
        if thin_side * self.mid < self.cfg.min_depth_notional_usdt
            || self.vol_1s < self.cfg.min_1s_volume_usdt
        {
            return None;
        }

        // Cooldown.
        if now_ms - self.last_signal_trigger_ms < self.cfg.signal_cooldown_ms {
            return None;
        }

        // Tier volatility band.
        if self.volatility_5m > self.tier.volatility_cap()
            || self.volatility_5m < self.cfg.min_volatility_5m
        {
            return None;
        }

        // Quote sanity and spread guards.
        if !self.best_bid.is_finite() || !self.best_ask.is_finite() {
            return None;
        }
        if !(self.best_ask > self.best_bid && self.best_bid > 0.0) {
            return None;
        }
        let spread_pct = (self.best_ask - self.best_bid) / self.best_ask;
        if spread_pct > self.cfg.max_bid_ask_spread_pct {
            return None;
        }
        let instant_vol = self.volatility_30s / SECONDS_PER_YEAR.sqrt();
        let normalized_spread = spread_pct / (instant_vol + 1e-4);
        if normalized_spread > self.cfg.max_normalized_spread {
            return None;
        }

        // Volume spike against the dynamic threshold.
        self.time_cache
            .refresh(now_ms, self.cfg.time_cache_duration_ms);
        let dyn_thresh = self.dynamic_volume_threshold(instant_vol);

        let ewma_fast = self.ewma_fast.value().unwrap_or(0.0);
        let ewma_1m = self.ewma_1m.value().unwrap_or(0.0);
        if ewma_1m <= 0.0 {
            return None;
        }
        let ratio_fast_1m = ewma_fast / ewma_1m;
        let ratio_1m_5m = ewma_1m / ewma_5m;
        if ratio_fast_1m < dyn_thresh || ratio_1m_5m < self.cfg.min_volume_spike_ratio_1m_5m {
            return None;
        }
        if self.accel_sigma <= 0.0 {
            return None;
        }
        let accel_z = self.volume_accel / self.accel_sigma;
        if accel_z < self.cfg.volume_accel_zscore {
            return None;
        }
        let abs_floor = self
            .tier
            .volume_floor()
            .max(self.ticker_24h_volume_usdt / 86_400.0 * 0.25);
        if self.vol_1s < abs_floor || self.trade_count_1s < self.cfg.min_trades_in_1s {
            return None;
        }

        // Upward price impulse over the lookback window.
        let price_then = self.bucket_price_at(now_ms - self.cfg.price_lookback_window_ms)?;
        if price_then <= 0.0 || self.last_price <= price_then {
            return None;
        }
        if self.price_slope_sigma <= 0.0 {
            return None;
        }
        let slope_z = self.price_slope / self.price_slope_sigma;
        if slope_z < self.cfg.price_slope_zscore {
            return None;
        }
        let price_change_pct = (self.last_price - price_then) / price_then;
        let price_z = price_change_pct / instant_vol;
        if price_z < self.cfg.min_price_zscore {
            return None;
        }

        self.last_signal_trigger_ms = now_ms;

        Some(self.build_vector(BuildCtx {
            now_ms,
            exchange,
            spread_pct,
            normalized_spread,
            dyn_thresh,
            ratio_fast_1m,
            ratio_1m_5m,
            accel_z,
            price_change_pct,
            price_z,
            slope_z,
        }))
    }

    /// D = clamp(min, max, base * volFactor * sessionFactor) with the
    /// regime modifier folded into volFactor.
    fn dynamic_volume_threshold(&self, instant_vol: f64) -> f64 {
        let regime_modifier = if self.volatility_ratio > 1.5 {
            1.25
        } else if self.volatility_ratio < 0.8 {
            0.75
        } else {
            1.0
        };
        let vol_factor = 1.0 + instant_vol * 50.0 * regime_modifier;
        let session_factor = self.time_cache.session_factor();
        (self.cfg.volume_thresh_base * vol_factor * session_factor)
            .clamp(self.cfg.volume_thresh_min, self.cfg.volume_thresh_max)
    }

    fn build_vector(&self, ctx: BuildCtx<'_>) -> SignalVector {
        let e9 = self.ema9.value().unwrap_or(0.0);
        let e21 = self.ema21.value().unwrap_or(0.0);
        let e50 = self.ema50.value().unwrap_or(0.0);

        SignalVector {
            id: Uuid::new_v4().to_string(),
            exchange: ctx.exchange.to_string(),
            created_at: Utc::now(),
            symbol: normalize_symbol(&self.symbol),
            signal_timestamp_ms: ctx.now_ms,
            trigger_price: self.last_price,

            price_change_pct: ctx.price_change_pct,
            price_slope: self.price_slope,
            slope_z: ctx.slope_z,
            price_z_score: ctx.price_z,

            volume_ratio_fast_1m: ctx.ratio_fast_1m,
            volume_ratio_1m_5m: ctx.ratio_1m_5m,
            volume_accel_z: ctx.accel_z,
            current_1s_volume_usdt: self.vol_1s,
            volume_per_dollar: self.vol_1s / self.last_price,
            dyn_volume_thresh: ctx.dyn_thresh,

            volatility_30s: self.volatility_30s,
            volatility_5m: self.volatility_5m,
            volatility_ratio: self.volatility_ratio,

            spread_pct: ctx.spread_pct,
            spread_bps: ctx.spread_pct * 10_000.0,
            normalized_spread: ctx.normalized_spread,
            effective_spread_bps: self.effective_spread_mean,

            depth5_ob_imbalance: self.depth5_ob_imbalance,
            depth5_bid_volume: self.depth5_bid_volume,
            depth5_ask_volume: self.depth5_ask_volume,
            depth5_total_volume: self.depth5_total_volume,
            depth5_volume_ratio: self.depth5_volume_ratio,
            imbalance_ma5: self.imbalance_ma5,
            imbalance_ma20: self.imbalance_ma20,
            imbalance_velocity: self.imbalance_velocity,
            imbalance_volatility: self.imbalance_volatility,

            taker_ratio_smoothed: self.taker_ratio_smoothed.value().unwrap_or(0.0),
            taker_buy_volume_abs: self.taker_buy_1s,
            taker_flow_imbalance: self.taker_flow_imbalance,
            taker_flow_magnitude: self.taker_flow_magnitude,
            taker_flow_ratio: self.taker_flow_ratio,

            ppo_histogram: self.ppo.histogram(),
            ppo_line: self.ppo.line(),
            signal_line: self.ppo.signal_line(),
            rsi9: self.rsi.value().unwrap_or(50.0),

            ema9_over_21: e9 > e21,
            ema21_over_50: e21 > e50,
            ema_alignment_strength: self.ema_alignment_strength,
            ema_stacked_bullish: self.ema_stacked_bullish,
            ema_stacked_bearish: self.ema_stacked_bearish,
            ema_stacked_neutral: !self.ema_stacked_bullish && !self.ema_stacked_bearish,
            price_above_ema9: self.price_above_ema9,

            ticker_24hr_volume_usdt: self.ticker_24h_volume_usdt,
            ticker_24hr_price_change_pct: self.ticker_24h_change_pct,
            ticker_24hr_high: self.ticker_24h_high,
            ticker_24hr_low: self.ticker_24h_low,

            hour_of_day: self.time_cache.hour_of_day,
            day_of_week: self.time_cache.day_of_week,
            is_weekend: self.time_cache.is_weekend,
        }
    }
}

struct BuildCtx<'a> {
    now_ms: i64,
    exchange: &'a str,
    spread_pct: f64,
    normalized_spread: f64,
    dyn_thresh: f64,
    ratio_fast_1m: f64,
    ratio_1m_5m: f64,
    accel_z: f64,
    price_change_pct: f64,
    price_z: f64,
    slope_z: f64,
}
