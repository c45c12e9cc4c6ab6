//! Process counters
//!
//! Registered against the default prometheus registry and exported by the
//! health server's `/metrics` endpoint.

use once_cell::sync::Lazy;
use prometheus::{register_int_counter, IntCounter};

pub static EVENTS_ROUTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("surgeflow_events_routed_total", "Canonical events routed to a monitor")
        .expect("register events_routed")
});

pub static EVENTS_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "surgeflow_events_dropped_total",
        "Events for unknown symbols or unparseable frames"
    )
    .expect("register events_dropped")
});

pub static SIGNALS_EMITTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("surgeflow_signals_emitted_total", "Signals that passed the gate")
        .expect("register signals_emitted")
});

pub static TASKS_COMPLETED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("surgeflow_tasks_completed_total", "Delayed follow-up tasks completed")
        .expect("register tasks_completed")
});

pub static TASKS_FAILED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("surgeflow_tasks_failed_total", "Delayed follow-up tasks that failed")
        .expect("register tasks_failed")
});
