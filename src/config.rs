//! Process configuration
//!
//! Environment-driven settings with production defaults. Engine tunables
//! live in [`crate::engine::EngineConfig`]; this covers the process
//! surface: endpoints, store paths and the pair universe.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::Tier;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Exchange label used in queue names, task kinds and documents.
    pub exchange: String,
    /// Combined-stream WebSocket endpoint.
    pub ws_url: String,
    /// REST endpoint for depth snapshots.
    pub rest_url: String,
    /// SQLite path for signal / orderbook / trajectory documents.
    pub database_path: String,
    /// SQLite path for the second-bar tape.
    pub tape_path: String,
    /// Health and metrics port.
    pub health_port: u16,
    /// Pair universe with tiers; empty at startup is fatal.
    pub pairs: Vec<(String, Tier)>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchange: "binance".to_string(),
            ws_url: "wss://stream.binance.com:9443".to_string(),
            rest_url: "https://api.binance.com".to_string(),
            database_path: "/data/surgeflow.db".to_string(),
            tape_path: "/data/surgeflow-tape.db".to_string(),
            health_port: 9090,
            pairs: vec![
                ("BTCUSDT".to_string(), Tier::Mega),
                ("ETHUSDT".to_string(), Tier::Mega),
                ("SOLUSDT".to_string(), Tier::Large),
                ("XRPUSDT".to_string(), Tier::Large),
            ],
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to the
    /// defaults field by field.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("EXCHANGE") {
            if !v.is_empty() {
                config.exchange = v.to_lowercase();
            }
        }
        if let Ok(v) = std::env::var("WS_URL") {
            if !v.is_empty() {
                config.ws_url = v;
            }
        }
        if let Ok(v) = std::env::var("REST_URL") {
            if !v.is_empty() {
                config.rest_url = v;
            }
        }
        if let Ok(v) = std::env::var("DATABASE_PATH") {
            if !v.is_empty() {
                config.database_path = v;
            }
        }
        if let Ok(v) = std::env::var("TAPE_PATH") {
            if !v.is_empty() {
                config.tape_path = v;
            }
        }
        if let Ok(v) = std::env::var("HEALTH_PORT") {
            if let Ok(port) = v.parse() {
                config.health_port = port;
            }
        }
        if let Ok(v) = std::env::var("SYMBOLS") {
            config.pairs = parse_pairs(&v);
        }

        config
    }

    pub fn symbols(&self) -> Vec<String> {
        self.pairs.iter().map(|(s, _)| s.clone()).collect()
    }
}

/// Parse `SYMBOLS` entries of the form `btcusdt:mega,solusdt:large`.
/// Entries with an unknown tier are skipped with a warning.
fn parse_pairs(raw: &str) -> Vec<(String, Tier)> {
    raw.split(',')
        .filter_map(|entry| {
            let entry = entry.trim();
            if entry.is_empty() {
                return None;
            }
            let (symbol, tier_str) = entry.split_once(':')?;
            match Tier::parse(tier_str) {
                Some(tier) => Some((symbol.trim().to_uppercase(), tier)),
                None => {
                    warn!(entry = %entry, "Unknown tier; pair skipped");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_symbol_tier_entries() {
        let pairs = parse_pairs("btcusdt:mega, solusdt:large ,pepeusdt:micro");
        assert_eq!(
            pairs,
            vec![
                ("BTCUSDT".to_string(), Tier::Mega),
                ("SOLUSDT".to_string(), Tier::Large),
                ("PEPEUSDT".to_string(), Tier::Micro),
            ]
        );
    }

    #[test]
    fn unknown_tier_entries_are_skipped() {
        let pairs = parse_pairs("btcusdt:mega,badusdt:galactic,ethusdt:mega");
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn empty_input_yields_empty_universe() {
        assert!(parse_pairs("").is_empty());
        assert!(parse_pairs(" , ,").is_empty());
    }
}
