//! Pickup and delivery jobs offered to drivers.

mod dispatcher;
mod sqlite_store;
mod store;
mod types;

pub use dispatcher::{Dispatcher, DriverHistory, HistoryIter};
pub use sqlite_store::SqliteJobStore;
pub use store::JobStore;
pub use types::{DriverJob, JobStatus, JobType, NewJob};
