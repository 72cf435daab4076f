//! Order, line item and station types.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bypass::{BypassRequest, BypassStatus};
use crate::error::{ParseEnumError, WorkflowError};

// ============================================================================
// Stations
// ============================================================================

/// Processing station. The declaration order is the processing order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Station {
    Washing,
    Ironing,
    Packing,
}

impl Station {
    /// All stations in processing order.
    pub const ALL: [Station; 3] = [Station::Washing, Station::Ironing, Station::Packing];

    /// Station every new order enters first.
    pub fn first() -> Self {
        Station::Washing
    }

    /// Station that follows this one, `None` after packing.
    pub fn next(self) -> Option<Station> {
        match self {
            Station::Washing => Some(Station::Ironing),
            Station::Ironing => Some(Station::Packing),
            Station::Packing => None,
        }
    }

    /// Whether submissions at this station are checked against expected counts.
    ///
    /// Packing is not: washing and ironing have already verified the counts.
    pub fn verifies_quantities(self) -> bool {
        !matches!(self, Station::Packing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Station::Washing => "washing",
            Station::Ironing => "ironing",
            Station::Packing => "packing",
        }
    }
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Station {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "washing" => Ok(Station::Washing),
            "ironing" => Ok(Station::Ironing),
            "packing" => Ok(Station::Packing),
            _ => Err(ParseEnumError::new("station", s)),
        }
    }
}

// ============================================================================
// Order status
// ============================================================================

/// Lifecycle status of an order. No other value exists.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderStatus {
    /// Waiting to be processed at `station`.
    AtStation { station: Station },
    /// Locked by a bypass request; cannot be processed anywhere.
    OnHold,
    /// Packed. Terminal.
    Completed,
}

impl OrderStatus {
    pub fn at(station: Station) -> Self {
        OrderStatus::AtStation { station }
    }

    /// The station the order is waiting at, if any.
    pub fn station(&self) -> Option<Station> {
        match self {
            OrderStatus::AtStation { station } => Some(*station),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed)
    }

    /// Returns the status type as a string (for filtering).
    pub fn state_type(&self) -> &'static str {
        match self {
            OrderStatus::AtStation { .. } => "at_station",
            OrderStatus::OnHold => "on_hold",
            OrderStatus::Completed => "completed",
        }
    }

    /// Human-readable form including the station.
    pub fn describe(&self) -> String {
        match self {
            OrderStatus::AtStation { station } => format!("at_station({})", station),
            other => other.state_type().to_string(),
        }
    }
}

// ============================================================================
// Line items
// ============================================================================

/// One line of an order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineItem {
    pub id: String,
    pub name: String,
    /// Count the current station must confirm.
    pub expected_qty: u32,
    /// Count reported by the station worker; equals `expected_qty` until edited.
    pub actual_qty: u32,
}

impl LineItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>, quantity: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            expected_qty: quantity,
            actual_qty: quantity,
        }
    }

    pub fn matches(&self) -> bool {
        self.expected_qty == self.actual_qty
    }
}

/// A worker's count for one item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmittedItem {
    pub item_id: String,
    pub quantity: u32,
}

impl SubmittedItem {
    pub fn new(item_id: impl Into<String>, quantity: u32) -> Self {
        Self {
            item_id: item_id.into(),
            quantity,
        }
    }
}

// ============================================================================
// Orders
// ============================================================================

/// An order moving through the stations.
///
/// Owns its line items and its active bypass request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: String,
    /// Display number shown to staff.
    pub order_number: String,
    pub items: Vec<LineItem>,
    pub status: OrderStatus,
    /// Pending or rejected bypass request attached to the order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bypass: Option<BypassRequest>,
    /// Incremented on every committed transition.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn item(&self, item_id: &str) -> Option<&LineItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub(crate) fn item_mut(&mut self, item_id: &str) -> Result<&mut LineItem, WorkflowError> {
        let order_id = &self.id;
        self.items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| WorkflowError::UnknownItem {
                order_id: order_id.clone(),
                item_id: item_id.to_string(),
            })
    }

    /// Sum of expected quantities.
    pub fn total_quantity(&self) -> u64 {
        self.items.iter().map(|i| u64::from(i.expected_qty)).sum()
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.status, OrderStatus::OnHold)
    }

    /// The attached bypass request, if it is still waiting for a decision.
    pub fn open_bypass(&self) -> Option<&BypassRequest> {
        self.bypass
            .as_ref()
            .filter(|b| b.status == BypassStatus::Pending)
    }

    /// Accept the current counts at `station` and move on.
    ///
    /// Actual quantities become the expected quantities of the next station;
    /// leaving the last station completes the order.
    pub(crate) fn advance_from(&mut self, station: Station) {
        for item in &mut self.items {
            item.expected_qty = item.actual_qty;
        }
        self.status = match station.next() {
            Some(next) => OrderStatus::at(next),
            None => OrderStatus::Completed,
        };
    }

    /// Discard unconfirmed counts.
    pub(crate) fn reset_counts(&mut self) {
        for item in &mut self.items {
            item.actual_qty = item.expected_qty;
        }
    }
}

/// Line item of an order being registered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewLineItem {
    pub id: String,
    pub name: String,
    pub quantity: u32,
}

impl NewLineItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>, quantity: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            quantity,
        }
    }
}

/// Request to register an order at the first station.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewOrder {
    pub order_number: String,
    pub items: Vec<NewLineItem>,
}

impl NewOrder {
    pub fn new(order_number: impl Into<String>) -> Self {
        Self {
            order_number: order_number.into(),
            items: Vec::new(),
        }
    }

    pub fn with_item(mut self, id: impl Into<String>, name: impl Into<String>, qty: u32) -> Self {
        self.items.push(NewLineItem::new(id, name, qty));
        self
    }

    pub(crate) fn validate(&self) -> Result<(), WorkflowError> {
        if self.order_number.trim().is_empty() {
            return Err(WorkflowError::InvalidRequest(
                "order number must not be empty".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for item in &self.items {
            if !seen.insert(item.id.as_str()) {
                return Err(WorkflowError::InvalidRequest(format!(
                    "duplicate line item id {}",
                    item.id
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Station feed and log
// ============================================================================

/// An order as listed on a station's board.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StationFeedEntry {
    pub order_id: String,
    pub order_number: String,
    /// On hold awaiting a bypass decision raised at this station.
    pub locked: bool,
    pub total_quantity: u64,
}

impl From<&Order> for StationFeedEntry {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id.clone(),
            order_number: order.order_number.clone(),
            locked: order.is_locked(),
            total_quantity: order.total_quantity(),
        }
    }
}

/// Result of one processing submission, as kept in the station log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StationOutcome {
    Advanced,
    Completed,
    Mismatch,
}

impl StationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StationOutcome::Advanced => "advanced",
            StationOutcome::Completed => "completed",
            StationOutcome::Mismatch => "mismatch",
        }
    }
}

impl FromStr for StationOutcome {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "advanced" => Ok(StationOutcome::Advanced),
            "completed" => Ok(StationOutcome::Completed),
            "mismatch" => Ok(StationOutcome::Mismatch),
            _ => Err(ParseEnumError::new("station outcome", s)),
        }
    }
}

/// Entry of the station log; backs the worker's task history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StationLogEntry {
    pub order_id: String,
    pub order_number: String,
    pub station: Station,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    pub outcome: StationOutcome,
    pub recorded_at: DateTime<Utc>,
}
