//! New-order notifications for station viewers.

mod deduplicator;
mod poller;
mod sqlite_store;
mod store;
mod types;

pub use deduplicator::Deduplicator;
pub use poller::{
    AlertCallback, FeedSupplier, NotificationPoller, PollSummary, StationFeed, Watcher,
};
pub use sqlite_store::SqliteNotificationStore;
pub use store::NotificationStore;
pub use types::{FeedEntry, NotificationRecord, Observation};
