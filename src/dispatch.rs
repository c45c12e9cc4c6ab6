//! Dispatch stage
//!
//! Single owner of every [`SymbolMonitor`]. Routes canonical events to the
//! owning monitor (trades also feed the price tape) and drives the 250 ms
//! tick that runs periodic computation plus the signal gate across all
//! monitors. Events and ticks are serialised into this one task; monitor
//! state is never touched concurrently.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::engine::{CanonicalEvent, EngineConfig, SymbolMonitor, Tier};
use crate::followup::FollowupDispatcher;
use crate::metrics;
use crate::tape::PriceTape;

pub struct DispatchStage {
    /// Keyed by upper-cased symbol; BTreeMap keeps tick iteration
    /// deterministic.
    monitors: BTreeMap<String, SymbolMonitor>,
    tape: PriceTape,
    followup: FollowupDispatcher,
    exchange: String,
    cfg: Arc<EngineConfig>,
}

impl DispatchStage {
    /// Build one monitor per configured pair. The universe is fixed for the
    /// life of the process; unknown symbols are dropped at routing time.
    pub fn new(
        pairs: &[(String, Tier)],
        tape: PriceTape,
        followup: FollowupDispatcher,
        exchange: impl Into<String>,
        cfg: Arc<EngineConfig>,
    ) -> Self {
        let monitors = pairs
            .iter()
            .map(|(symbol, tier)| {
                let symbol = symbol.to_uppercase();
                let monitor = SymbolMonitor::new(symbol.clone(), *tier, Arc::clone(&cfg));
                (symbol, monitor)
            })
            .collect();

        Self {
            monitors,
            tape,
            followup,
            exchange: exchange.into(),
            cfg,
        }
    }

    pub fn monitor_count(&self) -> usize {
        self.monitors.len()
    }

    /// Route one canonical event to its monitor; silently drop on miss.
    pub fn route_event(&mut self, event: &CanonicalEvent) {
        let Some(monitor) = self.monitors.get_mut(event.symbol()) else {
            metrics::EVENTS_DROPPED.inc();
            return;
        };
        metrics::EVENTS_ROUTED.inc();

        match event {
            CanonicalEvent::AggTrade { symbol, trade } => {
                monitor.add_agg_trade(*trade);
                self.tape.on_trade(
                    symbol,
                    trade.price,
                    trade.price * trade.qty,
                    trade.event_time_ms,
                );
            }
            CanonicalEvent::Ticker { stats, .. } => monitor.apply_ticker(stats),
            CanonicalEvent::BookTicker { book, .. } => monitor.apply_book_ticker(book),
            CanonicalEvent::DepthSnapshot { depth, .. } => monitor.update_depth_snapshot(depth),
        }
    }

    /// One tick: periodic computation then gate evaluation per monitor,
    /// each monitor visited exactly once.
    pub async fn tick(&mut self, now_ms: i64) {
        let mut emitted = Vec::new();
        for monitor in self.monitors.values_mut() {
            monitor.perform_periodic_calculations(now_ms);
            if let Some(vector) = monitor.check_signal(now_ms, &self.exchange) {
                emitted.push(vector);
            }
        }
        for vector in emitted {
            metrics::SIGNALS_EMITTED.inc();
            self.followup.on_signal(&vector).await;
        }
    }

    /// Event/tick loop. Exits when the transport channel closes or the
    /// shutdown flag flips, then flushes the tape.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<CanonicalEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut tick = tokio::time::interval(Duration::from_millis(
            self.cfg.check_signal_interval_ms as u64,
        ));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(monitors = self.monitors.len(), "Dispatch stage started");

        loop {
            tokio::select! {
                maybe_event = events.recv() => {
                    match maybe_event {
                        Some(event) => self.route_event(&event),
                        None => {
                            debug!("Event channel closed");
                            break;
                        }
                    }
                }
                _ = tick.tick() => {
                    let now_ms = Utc::now().timestamp_millis();
                    self.tick(now_ms).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.tape.flush();
        info!("Dispatch stage stopped; tape flushed");
    }
}
