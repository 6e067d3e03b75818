pub mod remote;
pub mod source;
pub mod sqlite;
pub mod store;
pub mod websocket;

pub use remote::RemoteSource;
pub use source::ResultSource;
pub use sqlite::SqliteSource;
pub use store::{RefreshTrigger, ResultStore, SyncStatus};
