//! WebSocket change feed for remote result collections.
//!
//! Realtime backends push a small message whenever a row in the results
//! collection is inserted or updated. We only care that *something* changed:
//! the message is turned into a `ChangeEvent` and the store re-reads the
//! whole collection over HTTP.
//!
//! ```text
//!  WS Server ──push──▶ change feed task
//!                         │  parse_change_message → ChangeEvent
//!                         ▼
//!              broadcast::Sender<ChangeEvent> ──▶ ResultStore
//! ```
//!
//! Accepted message shapes (all JSON):
//! - `{"type": "insert", "id": "42"}`
//! - `{"event": "UPDATE", "record": {...}}`
//! - `{"eventType": "INSERT", "new": {...}}`

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::db::models::{ChangeEvent, ChangeKind};

const PING_INTERVAL: Duration = Duration::from_secs(25);
const MAX_BACKOFF_SECS: u64 = 30;

/// Spawn a background listener that forwards change messages from `url`
/// into `changes`, reconnecting forever with exponential backoff.
pub fn spawn_change_feed(
    name: &str,
    url: &str,
    changes: broadcast::Sender<ChangeEvent>,
) -> JoinHandle<()> {
    let name = name.to_string();
    let url = url.to_string();
    tokio::spawn(async move {
        ws_connection_loop(&name, &url, changes).await;
    })
}

/// Persistent WebSocket connection loop with auto-reconnect and exponential
/// backoff.
async fn ws_connection_loop(name: &str, url: &str, changes: broadcast::Sender<ChangeEvent>) {
    let mut backoff_secs = 1u64;

    loop {
        info!("[{}] Connecting to change feed: {}", name, url);

        match tokio_tungstenite::connect_async(url).await {
            Ok((ws_stream, _response)) => {
                info!("[{}] Change feed connected", name);
                backoff_secs = 1;

                let (mut write, mut read) = ws_stream.split();
                let mut ping_interval = tokio::time::interval(PING_INTERVAL);

                loop {
                    tokio::select! {
                        msg = read.next() => {
                            match msg {
                                Some(Ok(Message::Text(text))) => {
                                    if text.trim() == "ping" {
                                        let _ = write.send(Message::Text("pong".to_string())).await;
                                        continue;
                                    }
                                    match parse_change_message(&text) {
                                        Some(ev) => {
                                            debug!("[{}] {:?} notification", name, ev.kind);
                                            // No receivers just means nobody is subscribed yet
                                            let _ = changes.send(ev);
                                        }
                                        None => debug!("[{}] Ignoring message: {}", name, text),
                                    }
                                }
                                Some(Ok(Message::Ping(data))) => {
                                    let _ = write.send(Message::Pong(data)).await;
                                }
                                Some(Ok(Message::Close(_))) => {
                                    warn!("[{}] Server closed change feed", name);
                                    break;
                                }
                                Some(Err(e)) => {
                                    error!("[{}] Change feed error: {}", name, e);
                                    break;
                                }
                                None => {
                                    warn!("[{}] Change feed stream ended", name);
                                    break;
                                }
                                _ => {}
                            }
                        }
                        _ = ping_interval.tick() => {
                            if let Err(e) = write.send(Message::Ping(vec![])).await {
                                error!("[{}] Ping failed: {}", name, e);
                                break;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                error!("[{}] Change feed connection failed: {}", name, e);
            }
        }

        let delay = Duration::from_secs(backoff_secs) + jitter();
        warn!("[{}] Reconnecting in {:?}...", name, delay);
        tokio::time::sleep(delay).await;
        backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
    }
}

/// Up to half a second of random delay so many scoreboards don't reconnect in lockstep.
fn jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..500))
}

/// Turn a raw feed message into a change notification.
/// Deletes, heartbeats and anything unrecognised yield `None`.
pub fn parse_change_message(text: &str) -> Option<ChangeEvent> {
    let val: serde_json::Value = serde_json::from_str(text).ok()?;

    let kind_str = ["type", "event", "eventType"]
        .iter()
        .find_map(|key| val.get(*key).and_then(|v| v.as_str()))?;
    let kind = match kind_str.to_lowercase().as_str() {
        "insert" | "inserted" | "added" => ChangeKind::Insert,
        "update" | "updated" | "modified" => ChangeKind::Update,
        _ => return None,
    };

    let record = val
        .get("record")
        .or_else(|| val.get("new"))
        .unwrap_or(&val);
    let id = record.get("id").and_then(|id| {
        id.as_str()
            .map(|s| s.to_string())
            .or_else(|| id.as_i64().map(|n| n.to_string()))
    });

    Some(ChangeEvent { kind, id })
}
