//! Bypass request types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;
use crate::order::Station;

/// Minimum length, in characters, of a bypass justification.
pub const MIN_REASON_LEN: usize = 5;

/// Approval status of a bypass request. `Approved` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BypassStatus {
    Pending,
    Approved,
    Rejected,
}

impl BypassStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BypassStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BypassStatus::Pending => "pending",
            BypassStatus::Approved => "approved",
            BypassStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for BypassStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BypassStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BypassStatus::Pending),
            "approved" => Ok(BypassStatus::Approved),
            "rejected" => Ok(BypassStatus::Rejected),
            _ => Err(ParseEnumError::new("bypass status", s)),
        }
    }
}

/// An approver's verdict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BypassDecision {
    Approve,
    Reject,
}

impl BypassDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            BypassDecision::Approve => "approve",
            BypassDecision::Reject => "reject",
        }
    }
}

impl From<BypassDecision> for BypassStatus {
    fn from(decision: BypassDecision) -> Self {
        match decision {
            BypassDecision::Approve => BypassStatus::Approved,
            BypassDecision::Reject => BypassStatus::Rejected,
        }
    }
}

/// Expected versus counted quantity for one item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Discrepancy {
    pub item_id: String,
    pub item_name: String,
    pub expected: u32,
    pub actual: u32,
}

/// Request to continue processing despite a quantity mismatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BypassRequest {
    pub id: String,
    pub order_id: String,
    /// Station where the mismatch was found.
    pub station: Station,
    /// Every mismatching item, not just the first.
    pub discrepancies: Vec<Discrepancy>,
    /// Worker's justification, absent until submitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub status: BypassStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_submitted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
}

impl BypassRequest {
    pub(crate) fn open(
        order_id: impl Into<String>,
        station: Station,
        discrepancies: Vec<Discrepancy>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            order_id: order_id.into(),
            station,
            discrepancies,
            reason: None,
            status: BypassStatus::Pending,
            created_at: at,
            reason_submitted_at: None,
            resolved_at: None,
            resolved_by: None,
        }
    }

    /// True once the worker has submitted a justification.
    pub fn is_submitted(&self) -> bool {
        self.reason.is_some()
    }
}

/// Filter for querying bypass requests.
#[derive(Debug, Clone, Default)]
pub struct BypassFilter {
    pub status: Option<BypassStatus>,
    pub order_id: Option<String>,
    /// Negative means unlimited.
    pub limit: i64,
    pub offset: i64,
}

impl BypassFilter {
    pub fn new() -> Self {
        Self {
            limit: 100,
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: BypassStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
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
