//! Signal engine
//!
//! Per-symbol streaming feature state, the periodic computation pipeline
//! and the signal gate. The dispatch stage owns one [`SymbolMonitor`] per
//! configured pair and drives it with canonical events plus a fixed tick.

mod config;
mod gate;
mod indicators;
mod models;
mod monitor;

pub use config::{EngineConfig, EPSILON, SECONDS_PER_YEAR};
pub use models::{
    normalize_symbol, AggTrade, BookTicker, CanonicalEvent, Depth5, DepthLevel, DelayedTask,
    OrderbookSnapshotRow, SecondBar, SignalVector, TickerStats, Tier, TrajectoryDoc,
    TrajectoryPoint,
};
pub use monitor::SymbolMonitor;
