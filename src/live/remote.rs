use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::source::{ResultSource, CHANGE_CHANNEL_CAPACITY};
use super::websocket::spawn_change_feed;
use crate::db::models::{sort_newest_first, ChangeEvent, ChangeKind, ResultItem};
use crate::error::{FetchError, MalformedRecord};

/// Result source backed by a remote HTTP JSON collection.
///
/// Change notifications come from two places: a poller that re-reads the
/// collection every `poll_interval` and reports when its digest moves, and an
/// optional WebSocket change feed for instant push.
pub struct RemoteSource {
    http: Client,
    url: String,
    changes: broadcast::Sender<ChangeEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl RemoteSource {
    pub fn new(url: &str, poll_interval: Duration, ws_url: Option<&str>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        let mut tasks = vec![tokio::spawn(poll_loop(
            http.clone(),
            url.to_string(),
            poll_interval,
            changes.clone(),
        ))];
        if let Some(ws_url) = ws_url {
            tasks.push(spawn_change_feed("remote-ws", ws_url, changes.clone()));
        }

        Ok(RemoteSource {
            http,
            url: url.to_string(),
            changes,
            tasks,
        })
    }
}

impl Drop for RemoteSource {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait]
impl ResultSource for RemoteSource {
    fn name(&self) -> &str {
        "remote"
    }

    async fn fetch_results(&self) -> Result<Vec<ResultItem>, FetchError> {
        get_results(&self.http, &self.url).await
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

async fn get_results(http: &Client, url: &str) -> Result<Vec<ResultItem>, FetchError> {
    debug!("Fetching results from {}", url);
    let resp = http.get(url).send().await?;
    if !resp.status().is_success() {
        return Err(FetchError::Status(resp.status()));
    }
    let body = resp.text().await?;
    let raw: Value = serde_json::from_str(&body)?;
    parse_results_response(&raw)
}

/// Re-read the collection periodically and emit a change whenever it differs
/// from the previous read. The first successful read only sets the baseline.
async fn poll_loop(
    http: Client,
    url: String,
    poll_interval: Duration,
    changes: broadcast::Sender<ChangeEvent>,
) {
    info!("Result poller started (url={}, interval={:?})", url, poll_interval);
    let mut prev: Option<CollectionDigest> = None;
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        match get_results(&http, &url).await {
            Ok(items) => {
                let digest = CollectionDigest::of(&items);
                if let Some(kind) = detect_change(prev.as_ref(), &digest) {
                    info!("Remote results changed ({:?}, {} results)", kind, digest.count);
                    let _ = changes.send(ChangeEvent { kind, id: None });
                }
                prev = Some(digest);
            }
            Err(e) => warn!("Result poll failed: {}", e),
        }
    }
}

/// Cheap summary of a collection read, enough to tell whether it changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionDigest {
    pub count: usize,
    pub fingerprint: u64,
}

impl CollectionDigest {
    /// `items` must already be in canonical (newest first) order.
    pub fn of(items: &[ResultItem]) -> Self {
        let mut hasher = DefaultHasher::new();
        items.hash(&mut hasher);
        CollectionDigest {
            count: items.len(),
            fingerprint: hasher.finish(),
        }
    }
}

/// Compare two reads of the collection.
/// Growth is an insert; any other difference (including removals) is an update.
pub fn detect_change(prev: Option<&CollectionDigest>, curr: &CollectionDigest) -> Option<ChangeKind> {
    let prev = prev?;
    if curr.count > prev.count {
        Some(ChangeKind::Insert)
    } else if curr.fingerprint != prev.fingerprint {
        Some(ChangeKind::Update)
    } else {
        None
    }
}

/// Parse a collection response: a bare array, or an object wrapping one in
/// `results`, `data` or `documents`. Malformed records are logged and dropped.
pub fn parse_results_response(raw: &Value) -> Result<Vec<ResultItem>, FetchError> {
    let records = raw
        .as_array()
        .or_else(|| {
            ["results", "data", "documents"]
                .iter()
                .find_map(|key| raw.get(*key).and_then(|v| v.as_array()))
        })
        .ok_or_else(|| FetchError::Schema("expected an array of results".to_string()))?;

    let mut items: Vec<ResultItem> = records
        .iter()
        .enumerate()
        .filter_map(|(index, record)| match parse_record(index, record) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Dropping {}", e);
                None
            }
        })
        .collect();
    sort_newest_first(&mut items);
    Ok(items)
}

/// Decode one record. Numeric ids are accepted and kept as strings.
pub fn parse_record(index: usize, record: &Value) -> Result<ResultItem, MalformedRecord> {
    let mut record = record.clone();
    if let Some(obj) = record.as_object_mut() {
        if let Some(n) = obj.get("id").and_then(|id| id.as_i64()) {
            obj.insert("id".to_string(), Value::String(n.to_string()));
        }
    }
    serde_json::from_value::<ResultItem>(record)
        .map(ResultItem::normalized)
        .map_err(|e| MalformedRecord {
            index,
            reason: e.to_string(),
        })
}
