//! Types for the station pipeline.

use serde::{Deserialize, Serialize};

use crate::bypass::{BypassRequest, Discrepancy};
use crate::dispatch::DriverJob;
use crate::order::{Order, Station, StationOutcome, SubmittedItem};

/// A worker's processing submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessingRequest {
    pub order_id: String,
    /// Counted quantities. Items left out keep their current count.
    pub items: Vec<SubmittedItem>,
    /// Station the caller works at. When set, the order must be waiting there.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub station: Option<Station>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

impl ProcessingRequest {
    pub fn new(order_id: impl Into<String>, items: Vec<SubmittedItem>) -> Self {
        Self {
            order_id: order_id.into(),
            items,
            station: None,
            worker_id: None,
        }
    }

    pub fn at_station(mut self, station: Station) -> Self {
        self.station = Some(station);
        self
    }

    pub fn by_worker(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }
}

/// Result of a processing submission.
///
/// A mismatch is a normal outcome, not an error.
#[derive(Debug, Clone)]
pub enum ProcessingOutcome {
    /// Counts matched; the order moved to the next station.
    Advanced {
        order: Order,
        from: Station,
        to: Station,
    },
    /// Packed. `delivery_job` is set when a delivery was dispatched.
    Completed {
        order: Order,
        delivery_job: Option<DriverJob>,
    },
    /// Counts differed; the order is on hold behind `bypass`.
    Mismatch { order: Order, bypass: BypassRequest },
}

impl ProcessingOutcome {
    /// The order as committed.
    pub fn order(&self) -> &Order {
        match self {
            ProcessingOutcome::Advanced { order, .. }
            | ProcessingOutcome::Completed { order, .. }
            | ProcessingOutcome::Mismatch { order, .. } => order,
        }
    }

    pub fn station_outcome(&self) -> StationOutcome {
        match self {
            ProcessingOutcome::Advanced { .. } => StationOutcome::Advanced,
            ProcessingOutcome::Completed { .. } => StationOutcome::Completed,
            ProcessingOutcome::Mismatch { .. } => StationOutcome::Mismatch,
        }
    }

    pub fn is_mismatch(&self) -> bool {
        matches!(self, ProcessingOutcome::Mismatch { .. })
    }

    /// Every mismatching item. Empty unless this is a mismatch.
    pub fn discrepancies(&self) -> &[Discrepancy] {
        match self {
            ProcessingOutcome::Mismatch { bypass, .. } => &bypass.discrepancies,
            _ => &[],
        }
    }
}
