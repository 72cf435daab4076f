//! Notification storage trait.

use chrono::{DateTime, Utc};

use crate::error::WorkflowError;

use super::{FeedEntry, NotificationRecord};

/// Storage collaborator for per-viewer notifications and seen-sets.
pub trait NotificationStore: Send + Sync {
    /// Add every unseen order in `feed` to the viewer's seen-set and create
    /// one unread notification for each, in one transaction.
    ///
    /// Returns the created notifications in feed order.
    fn record_observations(
        &self,
        viewer_id: &str,
        feed: &[FeedEntry],
        at: DateTime<Utc>,
    ) -> Result<Vec<NotificationRecord>, WorkflowError>;

    /// The viewer's notifications, newest first.
    fn list(&self, viewer_id: &str) -> Result<Vec<NotificationRecord>, WorkflowError>;

    fn unread_count(&self, viewer_id: &str) -> Result<i64, WorkflowError>;

    /// Returns `UnknownNotification` if the viewer has no such notification.
    fn mark_read(
        &self,
        viewer_id: &str,
        notification_id: &str,
    ) -> Result<NotificationRecord, WorkflowError>;

    /// Delete the viewer's notifications, keeping the seen-set. Returns the
    /// number deleted.
    fn clear_all(&self, viewer_id: &str) -> Result<usize, WorkflowError>;

    fn has_seen(&self, viewer_id: &str, order_id: &str) -> Result<bool, WorkflowError>;
}
