//! surgeflow - market-microstructure signal detector
//!
//! Single binary wiring the whole pipeline:
//! - Market data (sharded WebSocket connections to the exchange)
//! - Per-symbol feature engine and signal gate on a 250 ms tick
//! - Second-resolution price tape with 45-day retention
//! - Delayed follow-up workers (orderbook snapshots, price trajectory)
//! - Health/metrics server

use std::sync::Arc;

use anyhow::Context;
use axum::{extract::State, routing::get, Json, Router};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use surgeflow::engine::EngineConfig;
use surgeflow::followup::{SignalSink, TaskScheduler};
use surgeflow::tape::BarStore;
use surgeflow::{
    Config, DispatchStage, DocumentStore, FollowupDispatcher, InProcessQueue, OrderbookWorker,
    PriceTape, RestDepthFetcher, SqliteBarStore, TrajectoryWorker, WsTransport,
};

/// State shared with the health server.
struct AppState {
    docs: Arc<DocumentStore>,
    exchange: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("========================================");
    info!("surgeflow - microstructure signal engine");
    info!("========================================");

    let config = Config::from_env();
    if config.pairs.is_empty() {
        error!("Empty pair universe; nothing to monitor");
        return Err(surgeflow::SurgeflowError::EmptyUniverse.into());
    }
    info!(
        exchange = %config.exchange,
        pairs = config.pairs.len(),
        "Configuration loaded"
    );

    let engine_cfg = Arc::new(EngineConfig::default());

    // Stores shared between the stage and the workers.
    let docs = Arc::new(
        DocumentStore::new(&config.database_path)
            .await
            .context("open document store")?,
    );
    let bars: Arc<dyn BarStore> =
        Arc::new(SqliteBarStore::new(&config.tape_path).context("open bar store")?);

    // Delayed task queue plus its two consumers.
    let queue = Arc::new(InProcessQueue::new());
    let order_rx = queue.subscribe(&format!("{}_order", config.exchange));
    let price_rx = queue.subscribe(&format!("{}_price", config.exchange));

    let orderbook_worker = OrderbookWorker::new(
        Arc::new(RestDepthFetcher::new(config.rest_url.clone())),
        Arc::clone(&docs),
    );
    tokio::spawn(orderbook_worker.run(order_rx));

    let trajectory_worker =
        TrajectoryWorker::new(Arc::clone(&bars), Arc::clone(&docs), config.exchange.clone());
    tokio::spawn(trajectory_worker.run(price_rx));

    // The stage: monitors, tape, follow-up dispatch.
    let followup = FollowupDispatcher::new(
        Arc::clone(&docs) as Arc<dyn SignalSink>,
        Arc::clone(&queue) as Arc<dyn TaskScheduler>,
        config.exchange.clone(),
        Arc::clone(&engine_cfg),
    );
    let stage = DispatchStage::new(
        &config.pairs,
        PriceTape::new(Arc::clone(&bars)),
        followup,
        config.exchange.clone(),
        engine_cfg,
    );

    // Transport fan-in.
    let (event_tx, event_rx) = mpsc::channel(8_192);
    let transport = WsTransport::new(config.ws_url.clone(), event_tx);
    transport.start(&config.symbols());

    // Health / metrics surface.
    let state = Arc::new(AppState {
        docs: Arc::clone(&docs),
        exchange: config.exchange.clone(),
    });
    let health_port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(state, health_port).await {
            warn!(error = %e, "Health server error");
        }
    });

    // Ctrl-C flips the shutdown flag; the stage drains, flushes the tape
    // and returns.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    info!("All services started");
    stage.run(event_rx, shutdown_rx).await;

    info!("surgeflow stopped");
    Ok(())
}

async fn start_health_server(state: Arc<AppState>, port: u16) -> anyhow::Result<()> {
    use std::net::SocketAddr;

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(addr = %addr, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let signals = state.docs.signal_count().await.unwrap_or(0);
    Json(serde_json::json!({
        "status": "healthy",
        "component": "surgeflow",
        "exchange": state.exchange,
        "signals_persisted": signals,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn prometheus_metrics() -> String {
    use prometheus::{Encoder, TextEncoder};
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
