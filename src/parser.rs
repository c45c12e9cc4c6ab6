//! Stream frame parser
//!
//! Normalises combined-stream frames `{stream, data}` into
//! [`CanonicalEvent`]s. Parsing is best-effort: frames with unknown stream
//! suffixes, missing fields or non-finite / non-positive numerics are
//! dropped silently (the transport logs nothing either; malformed input is
//! expected noise).

use serde::Deserialize;
use serde_json::Value;

use crate::engine::{AggTrade, BookTicker, CanonicalEvent, Depth5, DepthLevel, TickerStats};

#[derive(Debug, Deserialize)]
struct Frame {
    stream: String,
    data: Value,
}

#[derive(Debug, Deserialize)]
struct RawAggTrade {
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    qty: String,
    #[serde(rename = "E")]
    event_time_ms: i64,
    #[serde(rename = "m")]
    buyer_is_maker: bool,
}

#[derive(Debug, Deserialize)]
struct RawTicker {
    #[serde(rename = "q")]
    quote_volume: String,
    #[serde(rename = "P")]
    change_pct: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    last: String,
}

#[derive(Debug, Deserialize)]
struct RawBookTicker {
    #[serde(rename = "b")]
    best_bid: String,
    #[serde(rename = "a")]
    best_ask: String,
}

#[derive(Debug, Deserialize)]
struct RawDepth {
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

/// A strictly positive finite price or quantity.
fn positive(s: &str) -> Option<f64> {
    let v: f64 = s.parse().ok()?;
    (v.is_finite() && v > 0.0).then_some(v)
}

/// A finite value with no sign constraint (percent changes, volumes).
fn finite(s: &str) -> Option<f64> {
    let v: f64 = s.parse().ok()?;
    v.is_finite().then_some(v)
}

fn parse_levels(raw: &[[String; 2]]) -> Option<Vec<DepthLevel>> {
    raw.iter()
        .take(5)
        .map(|[p, q]| {
            let price = positive(p)?;
            let qty: f64 = q.parse().ok()?;
            (qty.is_finite() && qty >= 0.0).then_some(DepthLevel { price, qty })
        })
        .collect()
}

/// Parse one transport frame. `None` means the frame is dropped.
pub fn parse_event(text: &str) -> Option<CanonicalEvent> {
    let frame: Frame = serde_json::from_str(text).ok()?;

    let (symbol_lc, suffix) = frame.stream.split_once('@')?;
    let symbol = symbol_lc.to_uppercase();

    match suffix {
        "aggTrade" => {
            let raw: RawAggTrade = serde_json::from_value(frame.data).ok()?;
            let trade = AggTrade {
                price: positive(&raw.price)?,
                qty: positive(&raw.qty)?,
                event_time_ms: raw.event_time_ms,
                buyer_is_maker: raw.buyer_is_maker,
            };
            Some(CanonicalEvent::AggTrade { symbol, trade })
        }
        "ticker" => {
            let raw: RawTicker = serde_json::from_value(frame.data).ok()?;
            let stats = TickerStats {
                quote_volume_24h: finite(&raw.quote_volume).filter(|v| *v >= 0.0)?,
                change_pct_24h: finite(&raw.change_pct)?,
                high_24h: positive(&raw.high)?,
                low_24h: positive(&raw.low)?,
                last: positive(&raw.last)?,
            };
            Some(CanonicalEvent::Ticker { symbol, stats })
        }
        "bookTicker" => {
            let raw: RawBookTicker = serde_json::from_value(frame.data).ok()?;
            let book = BookTicker {
                best_bid: positive(&raw.best_bid)?,
                best_ask: positive(&raw.best_ask)?,
            };
            if book.best_ask <= book.best_bid {
                return None;
            }
            Some(CanonicalEvent::BookTicker { symbol, book })
        }
        "depth5@100ms" => {
            let raw: RawDepth = serde_json::from_value(frame.data).ok()?;
            let depth = Depth5 {
                bids: parse_levels(&raw.bids)?,
                asks: parse_levels(&raw.asks)?,
            };
            Some(CanonicalEvent::DepthSnapshot { symbol, depth })
        }
        _ => None,
    }
}
