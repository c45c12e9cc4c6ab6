//! WebSocket transport
//!
//! Subscribes to the four market streams for every configured pair over
//! combined-stream connections, sharded at no more than 180 topics per
//! connection. Each connection pings every 20 s and reconnects with the
//! same topic chunk after a fixed delay. Frames are normalised through the
//! parser and fanned into the dispatch stage's channel; monitor state
//! survives reconnects untouched.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::engine::CanonicalEvent;
use crate::parser::parse_event;

/// Hard cap on topics multiplexed over one connection.
const MAX_TOPICS_PER_CONNECTION: usize = 180;

const PING_INTERVAL: Duration = Duration::from_secs(20);
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// The four streams the engine consumes for one pair.
fn topics_for_symbol(symbol: &str) -> [String; 4] {
    let lc = symbol.to_lowercase();
    [
        format!("{lc}@aggTrade"),
        format!("{lc}@ticker"),
        format!("{lc}@bookTicker"),
        format!("{lc}@depth5@100ms"),
    ]
}

/// All topics for the pair universe, in stable order.
pub fn build_topics(symbols: &[String]) -> Vec<String> {
    symbols
        .iter()
        .flat_map(|s| topics_for_symbol(s))
        .collect()
}

/// Split topics into connection-sized chunks.
pub fn shard_topics(topics: &[String]) -> Vec<Vec<String>> {
    topics
        .chunks(MAX_TOPICS_PER_CONNECTION)
        .map(|c| c.to_vec())
        .collect()
}

pub struct WsTransport {
    base_url: String,
    event_tx: mpsc::Sender<CanonicalEvent>,
}

impl WsTransport {
    pub fn new(base_url: impl Into<String>, event_tx: mpsc::Sender<CanonicalEvent>) -> Self {
        Self {
            base_url: base_url.into(),
            event_tx,
        }
    }

    /// Spawn one connection task per topic shard. Tasks run until the
    /// event receiver is dropped.
    pub fn start(&self, symbols: &[String]) {
        let topics = build_topics(symbols);
        let shards = shard_topics(&topics);
        info!(
            symbols = symbols.len(),
            topics = topics.len(),
            connections = shards.len(),
            "Starting market data transport"
        );

        for (index, shard) in shards.into_iter().enumerate() {
            let url = self.base_url.clone();
            let tx = self.event_tx.clone();
            tokio::spawn(async move {
                run_connection(index, url, shard, tx).await;
            });
        }
    }
}

/// One connection's lifecycle: connect, pump, reconnect with the same
/// chunk on any failure.
async fn run_connection(
    index: usize,
    base_url: String,
    topics: Vec<String>,
    event_tx: mpsc::Sender<CanonicalEvent>,
) {
    let url = format!("{}/stream?streams={}", base_url, topics.join("/"));

    loop {
        match connect_async(&url).await {
            Ok((ws_stream, _)) => {
                info!(connection = index, topics = topics.len(), "Stream connected");
                let (mut write, mut read) = ws_stream.split();

                let (ping_stop_tx, mut ping_stop_rx) = mpsc::channel::<()>(1);
                let ping_task = tokio::spawn(async move {
                    let mut interval = tokio::time::interval(PING_INTERVAL);
                    loop {
                        tokio::select! {
                            _ = interval.tick() => {
                                if write.send(Message::Ping(Vec::new().into())).await.is_err() {
                                    debug!("Ping failed; connection likely dead");
                                    break;
                                }
                            }
                            _ = ping_stop_rx.recv() => break,
                        }
                    }
                });

                while let Some(msg) = read.next().await {
                    match msg {
                        Ok(Message::Text(text)) => {
                            if let Some(event) = parse_event(&text) {
                                if event_tx.send(event).await.is_err() {
                                    warn!(connection = index, "Event receiver dropped; transport stopping");
                                    let _ = ping_stop_tx.send(()).await;
                                    ping_task.abort();
                                    return;
                                }
                            }
                        }
                        Ok(Message::Close(_)) => {
                            info!(connection = index, "Server closed stream");
                            break;
                        }
                        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                        Ok(_) => {}
                        Err(e) => {
                            error!(connection = index, error = %e, "Stream error");
                            break;
                        }
                    }
                }

                let _ = ping_stop_tx.send(()).await;
                ping_task.abort();
            }
            Err(e) => {
                error!(connection = index, error = %e, "Stream connect failed");
            }
        }

        if event_tx.is_closed() {
            return;
        }
        debug!(connection = index, delay = ?RECONNECT_DELAY, "Reconnecting same topic chunk");
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbols(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("SYM{i}USDT")).collect()
    }

    #[test]
    fn four_topics_per_symbol() {
        let topics = build_topics(&symbols(3));
        assert_eq!(topics.len(), 12);
        assert!(topics.contains(&"sym0usdt@aggTrade".to_string()));
        assert!(topics.contains(&"sym2usdt@depth5@100ms".to_string()));
    }

    #[test]
    fn shards_respect_connection_cap() {
        // 50 symbols x 4 topics = 200 topics -> two connections.
        let topics = build_topics(&symbols(50));
        let shards = shard_topics(&topics);
        assert_eq!(shards.len(), 2);
        assert_eq!(shards[0].len(), 180);
        assert_eq!(shards[1].len(), 20);
        assert!(shards.iter().all(|s| s.len() <= 180));
    }

    #[test]
    fn small_universe_uses_one_connection() {
        let topics = build_topics(&symbols(10));
        let shards = shard_topics(&topics);
        assert_eq!(shards.len(), 1);
    }
}
