use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::db::models::{ChangeEvent, ResultItem};
use crate::error::FetchError;

/// Capacity of each source's change-notification channel.
pub const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Trait that every result source must implement.
#[async_trait]
pub trait ResultSource: Send + Sync {
    /// Read the whole results collection, most recently announced first.
    async fn fetch_results(&self) -> Result<Vec<ResultItem>, FetchError>;

    /// Stream of insert/update notifications on the collection.
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}
