use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::source::{ResultSource, CHANGE_CHANNEL_CAPACITY};
use crate::db::models::{ChangeEvent, ChangeKind, ResultItem};
use crate::db::Database;
use crate::error::FetchError;

/// Result source backed by the local SQLite `results` table.
///
/// Results are announced through this source (dashboard `POST /api/results`),
/// and every write is broadcast as a change notification.
pub struct SqliteSource {
    db: Database,
    changes: broadcast::Sender<ChangeEvent>,
}

impl SqliteSource {
    pub fn new(db: Database) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        SqliteSource { db, changes }
    }

    /// Record a newly announced result and notify subscribers.
    pub fn announce(&self, item: &ResultItem) -> Result<i64> {
        let id = self.db.insert_result(item)?;
        info!("Result announced: #{} {}", id, item.title());
        self.notify(ChangeKind::Insert, id);
        Ok(id)
    }

    /// Correct a previously announced result. Returns false for an unknown id.
    pub fn amend(&self, id: i64, item: &ResultItem) -> Result<bool> {
        let updated = self.db.update_result(id, item)?;
        if updated {
            info!("Result amended: #{} {}", id, item.title());
            self.notify(ChangeKind::Update, id);
        }
        Ok(updated)
    }

    fn notify(&self, kind: ChangeKind, id: i64) {
        let ev = ChangeEvent {
            kind,
            id: Some(id.to_string()),
        };
        if self.changes.send(ev).is_err() {
            debug!("Change #{} emitted with no subscribers", id);
        }
    }
}

#[async_trait]
impl ResultSource for SqliteSource {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn fetch_results(&self) -> Result<Vec<ResultItem>, FetchError> {
        self.db
            .list_results()
            .map_err(|e| FetchError::Database(e.to_string()))
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}
