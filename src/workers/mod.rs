//! Delayed-task workers
//!
//! Independent consumers of the follow-up queues. They share nothing with
//! the dispatch stage except the bar store and the document store.

mod orderbook;
mod trajectory;

pub use orderbook::{DepthFetcher, OrderbookWorker, RestDepthFetcher};
pub use trajectory::TrajectoryWorker;
