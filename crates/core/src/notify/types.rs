//! Notification types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::order::StationFeedEntry;

/// One order in a viewer's active feed.
///
/// Deduplication is keyed on `order_id`; the number is only displayed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedEntry {
    pub order_id: String,
    pub order_number: String,
}

impl FeedEntry {
    pub fn new(order_id: impl Into<String>, order_number: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            order_number: order_number.into(),
        }
    }
}

impl From<&StationFeedEntry> for FeedEntry {
    fn from(entry: &StationFeedEntry) -> Self {
        Self {
            order_id: entry.order_id.clone(),
            order_number: entry.order_number.clone(),
        }
    }
}

/// "New order" notice shown to one viewer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationRecord {
    pub id: String,
    pub viewer_id: String,
    pub order_id: String,
    pub order_number: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

/// Notifications created by one call to observe, in feed order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Observation {
    pub created: Vec<NotificationRecord>,
}

impl Observation {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
    }

    /// The notification to surface as an interrupting alert: the last one
    /// created.
    pub fn alert(&self) -> Option<&NotificationRecord> {
        self.created.last()
    }

    /// Everything except the alert. These are listed without interrupting.
    pub fn queued(&self) -> &[NotificationRecord] {
        match self.created.split_last() {
            Some((_, rest)) => rest,
            None => &[],
        }
    }
}
