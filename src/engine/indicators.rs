//! Streaming indicator primitives
//!
//! Incremental estimators used by the symbol monitor: fixed-alpha EWMAs,
//! period EMAs, Wilder-smoothed RSI, PPO/MACD and rolling moment helpers.
//! All updates are O(1); nothing here reprocesses history.

use crate::ring::RingBuffer;

/// Exponentially weighted moving average with a fixed smoothing factor.
///
/// Unseeded until the owner decides to seed it (the volume EWMAs seed on
/// the first positive observation, not the first observation).
#[derive(Debug, Clone)]
pub struct Ewma {
    alpha: f64,
    value: Option<f64>,
}

impl Ewma {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, value: None }
    }

    #[inline(always)]
    pub fn update(&mut self, x: f64) -> f64 {
        let next = match self.value {
            None => x,
            Some(v) => v + self.alpha * (x - v),
        };
        self.value = Some(next);
        next
    }

    #[inline(always)]
    pub fn value(&self) -> Option<f64> {
        self.value
    }

    #[inline(always)]
    pub fn is_seeded(&self) -> bool {
        self.value.is_some()
    }
}

/// Period EMA, alpha = 2 / (N + 1), seeded to the first observation.
#[derive(Debug, Clone)]
pub struct Ema {
    alpha: f64,
    value: Option<f64>,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        Self {
            alpha: 2.0 / (period as f64 + 1.0),
            value: None,
        }
    }

    #[inline(always)]
    pub fn update(&mut self, x: f64) -> f64 {
        let next = match self.value {
            None => x,
            Some(v) => v + self.alpha * (x - v),
        };
        self.value = Some(next);
        next
    }

    #[inline(always)]
    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// RSI with Wilder smoothing.
///
/// Seeded by the simple average of gains and losses over the first
/// `period + 1` prices, then `avg <- ((period - 1) * avg + x) / period`.
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    prices: RingBuffer<f64>,
    avg_gain: f64,
    avg_loss: f64,
    prev_price: Option<f64>,
    seeded: bool,
}

impl Rsi {
    pub fn new(period: usize, history_size: usize) -> Self {
        Self {
            period,
            prices: RingBuffer::new(history_size),
            avg_gain: 0.0,
            avg_loss: 0.0,
            prev_price: None,
            seeded: false,
        }
    }

    pub fn update(&mut self, price: f64) {
        self.prices.add(price);

        if !self.seeded {
            // Seed once the initial window (period + 1 prices) is complete.
            if self.prices.len() >= self.period + 1 {
                let window = self.prices.to_vec();
                let n = window.len();
                let mut gain_sum = 0.0;
                let mut loss_sum = 0.0;
                for i in (n - self.period)..n {
                    let delta = window[i] - window[i - 1];
                    if delta > 0.0 {
                        gain_sum += delta;
                    } else {
                        loss_sum += -delta;
                    }
                }
                self.avg_gain = gain_sum / self.period as f64;
                self.avg_loss = loss_sum / self.period as f64;
                self.seeded = true;
            }
            self.prev_price = Some(price);
            return;
        }

        if let Some(prev) = self.prev_price {
            let delta = price - prev;
            let gain = delta.max(0.0);
            let loss = (-delta).max(0.0);
            let p = self.period as f64;
            self.avg_gain = ((p - 1.0) * self.avg_gain + gain) / p;
            self.avg_loss = ((p - 1.0) * self.avg_loss + loss) / p;
        }
        self.prev_price = Some(price);
    }

    /// Current RSI in [0, 100]; `None` until seeded.
    pub fn value(&self) -> Option<f64> {
        if !self.seeded {
            return None;
        }
        if self.avg_gain == 0.0 && self.avg_loss == 0.0 {
            return Some(50.0);
        }
        if self.avg_loss == 0.0 {
            return Some(100.0);
        }
        let rs = self.avg_gain / self.avg_loss;
        Some((100.0 - 100.0 / (1.0 + rs)).clamp(0.0, 100.0))
    }
}

/// Percentage price oscillator: MACD expressed as a percentage of the
/// slow EMA, with its own signal EWMA and histogram.
#[derive(Debug, Clone)]
pub struct Ppo {
    ema_fast: Ema,
    ema_slow: Ema,
    signal: Ema,
    ppo: Option<f64>,
}

impl Ppo {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self {
            ema_fast: Ema::new(fast),
            ema_slow: Ema::new(slow),
            signal: Ema::new(signal),
            ppo: None,
        }
    }

    pub fn update(&mut self, price: f64) {
        let fast = self.ema_fast.update(price);
        let slow = self.ema_slow.update(price);
        if slow != 0.0 {
            let ppo = (fast - slow) / slow * 100.0;
            self.ppo = Some(ppo);
            self.signal.update(ppo);
        }
    }

    pub fn line(&self) -> f64 {
        self.ppo.unwrap_or(0.0)
    }

    pub fn signal_line(&self) -> f64 {
        self.signal.value().unwrap_or(0.0)
    }

    pub fn histogram(&self) -> f64 {
        self.line() - self.signal_line()
    }
}

#[inline]
pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Sample standard deviation (n - 1 denominator); 0 for fewer than 2 points.
pub fn stddev_sample(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    let var = xs.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / (xs.len() - 1) as f64;
    var.sqrt()
}

/// Population standard deviation (n denominator); 0 for an empty slice.
pub fn stddev_population(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let m = mean(xs);
    let var = xs.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / xs.len() as f64;
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ewma_converges_to_constant_input() {
        let alpha = 0.1175;
        let mut ewma = Ewma::new(alpha);
        let v = 1234.5;

        // 5 / alpha updates puts the EWMA within 1% of a constant input.
        let rounds = (5.0 / alpha).ceil() as usize;
        for _ in 0..rounds {
            ewma.update(v);
        }
        let got = ewma.value().unwrap();
        assert!((got - v).abs() / v < 0.01, "ewma {got} too far from {v}");
    }

    #[test]
    fn ewma_unseeded_until_first_update() {
        let mut ewma = Ewma::new(0.5);
        assert!(!ewma.is_seeded());
        ewma.update(10.0);
        assert_eq!(ewma.value(), Some(10.0));
    }

    #[test]
    fn rsi_saturates_at_100_on_rising_prices() {
        let mut rsi = Rsi::new(9, 20);
        for i in 0..12 {
            rsi.update(100.0 + i as f64);
        }
        assert_eq!(rsi.value(), Some(100.0));
    }

    #[test]
    fn rsi_saturates_at_0_on_falling_prices() {
        let mut rsi = Rsi::new(9, 20);
        for i in 0..12 {
            rsi.update(100.0 - i as f64);
        }
        let v = rsi.value().unwrap();
        assert!(v < 1e-9, "rsi {v} should be 0 for strictly falling prices");
    }

    #[test]
    fn rsi_alternating_sequence_stays_neutral() {
        let mut rsi = Rsi::new(9, 20);
        let mut price = 100.0;
        for i in 0..40 {
            price += if i % 2 == 0 { 0.5 } else { -0.5 };
            rsi.update(price);
        }
        let v = rsi.value().unwrap();
        assert!(v > 30.0 && v < 70.0, "alternating rsi {v} outside (30, 70)");
    }

    #[test]
    fn rsi_flat_prices_read_50() {
        let mut rsi = Rsi::new(9, 20);
        for _ in 0..15 {
            rsi.update(250.0);
        }
        assert_eq!(rsi.value(), Some(50.0));
    }

    #[test]
    fn ppo_flat_prices_have_zero_histogram() {
        let mut ppo = Ppo::new(3, 10, 16);
        for _ in 0..50 {
            ppo.update(500.0);
        }
        assert!(ppo.line().abs() < 1e-12);
        assert!(ppo.histogram().abs() < 1e-12);
    }

    #[test]
    fn ppo_positive_when_price_trending_up() {
        let mut ppo = Ppo::new(3, 10, 16);
        for i in 0..50 {
            ppo.update(100.0 * (1.0 + 0.001 * i as f64));
        }
        assert!(ppo.line() > 0.0);
    }

    #[test]
    fn stddev_of_constant_is_zero() {
        let xs = vec![3.0; 25];
        assert_eq!(stddev_sample(&xs), 0.0);
        assert_eq!(stddev_population(&xs), 0.0);
    }

    #[test]
    fn sample_stddev_matches_known_value() {
        let xs = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        // Population stddev of this classic set is exactly 2.
        assert!((stddev_population(&xs) - 2.0).abs() < 1e-12);
        assert!(stddev_sample(&xs) > stddev_population(&xs));
    }
}
