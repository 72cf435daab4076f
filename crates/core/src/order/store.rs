//! Order storage trait and types.

use chrono::{DateTime, Utc};

use crate::bypass::{BypassFilter, BypassRequest};
use crate::error::WorkflowError;

use super::{NewOrder, Order, Station, StationFeedEntry, StationLogEntry};

/// Filter for querying orders.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    /// Filter by status type (`at_station`, `on_hold`, `completed`).
    pub status: Option<String>,
    /// Filter by current station (implies `at_station`).
    pub station: Option<Station>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl OrderFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            status: None,
            station: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_station(mut self, station: Station) -> Self {
        self.station = Some(station);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Bypass row written together with an order transition.
#[derive(Debug, Clone, Copy)]
pub enum BypassWrite<'a> {
    /// Insert a new pending request. Fails with `AlreadyOpen` if the order
    /// already has one.
    Open(&'a BypassRequest),
    /// Move a pending request to its terminal status. Fails with
    /// `AlreadyResolved` if it is no longer pending.
    Resolve(&'a BypassRequest),
}

/// One atomic order transition.
///
/// `order.version` must be the version that was read; the commit fails with
/// `InvalidState` if another transition committed in between.
#[derive(Debug, Clone, Copy)]
pub struct OrderCommit<'a> {
    pub order: &'a Order,
    pub bypass: Option<BypassWrite<'a>>,
    pub log: Option<&'a StationLogEntry>,
}

impl<'a> OrderCommit<'a> {
    pub fn new(order: &'a Order) -> Self {
        Self {
            order,
            bypass: None,
            log: None,
        }
    }

    pub fn with_bypass(mut self, write: BypassWrite<'a>) -> Self {
        self.bypass = Some(write);
        self
    }

    pub fn with_log(mut self, entry: &'a StationLogEntry) -> Self {
        self.log = Some(entry);
        self
    }
}

/// Storage collaborator for orders, their bypass requests and the station log.
pub trait OrderStore: Send + Sync {
    /// Register a new order at the first station.
    fn create_order(&self, request: NewOrder) -> Result<Order, WorkflowError>;

    /// Get an order by ID, with its attached bypass request.
    fn get_order(&self, id: &str) -> Result<Option<Order>, WorkflowError>;

    /// List orders matching the filter, oldest first.
    fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, WorkflowError>;

    /// Count orders matching the filter.
    fn count_orders(&self, filter: &OrderFilter) -> Result<i64, WorkflowError>;

    /// Orders waiting at `station`, plus orders held by a bypass raised there.
    fn station_feed(&self, station: Station) -> Result<Vec<StationFeedEntry>, WorkflowError>;

    /// Apply a transition atomically. Returns the stored order.
    fn commit_order(&self, commit: OrderCommit<'_>) -> Result<Order, WorkflowError>;

    /// Get a bypass request by ID.
    fn get_bypass(&self, id: &str) -> Result<Option<BypassRequest>, WorkflowError>;

    /// List bypass requests matching the filter, oldest first.
    fn list_bypasses(&self, filter: &BypassFilter) -> Result<Vec<BypassRequest>, WorkflowError>;

    /// Store the justification of a pending request.
    fn record_bypass_reason(
        &self,
        bypass_id: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<BypassRequest, WorkflowError>;

    /// A worker's station log, most recent first.
    fn worker_history(
        &self,
        worker_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StationLogEntry>, WorkflowError>;
}
