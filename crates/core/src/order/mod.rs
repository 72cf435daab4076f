//! Orders, their line items and the station log.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteOrderStore;
pub use store::{BypassWrite, OrderCommit, OrderFilter, OrderStore};
pub use types::{
    LineItem, NewLineItem, NewOrder, Order, OrderStatus, Station, StationFeedEntry,
    StationLogEntry, StationOutcome, SubmittedItem,
};
