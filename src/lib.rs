//! surgeflow - real-time volume-surge / price-impulse signal detector
//!
//! Subscribes to live trade, ticker, book-ticker and depth streams for a
//! curated pair universe, maintains per-pair streaming statistics at
//! millisecond resolution and emits a signal document whenever a
//! coincident volume spike and upward price impulse pass the multi-stage
//! gate. Each emission schedules delayed follow-up tasks that capture the
//! future price trajectory and order-book snapshots for supervised
//! labelling.
//!
//! ## Architecture
//!
//! - **Transport**: sharded WebSocket connections normalised into one
//!   canonical event channel
//! - **Dispatch stage**: single owner of all per-symbol monitors; 250 ms
//!   tick drives periodic computation and the signal gate
//! - **Price tape**: per-pair second bars with gap-fill, persisted with a
//!   45-day retention window
//! - **Follow-ups**: delayed orderbook-snapshot and price-trajectory
//!   workers fed by an in-process task queue

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod followup;
pub mod metrics;
pub mod parser;
pub mod queue;
pub mod ring;
pub mod storage;
pub mod tape;
pub mod websocket;
pub mod workers;

pub use config::Config;
pub use dispatch::DispatchStage;
pub use engine::{CanonicalEvent, EngineConfig, SignalVector, SymbolMonitor, Tier};
pub use error::{Result, SurgeflowError};
pub use followup::{FollowupDispatcher, SignalSink, TaskScheduler};
pub use queue::InProcessQueue;
pub use ring::RingBuffer;
pub use storage::DocumentStore;
pub use tape::{BarStore, PriceTape, SqliteBarStore};
pub use websocket::WsTransport;
pub use workers::{OrderbookWorker, RestDepthFetcher, TrajectoryWorker};
