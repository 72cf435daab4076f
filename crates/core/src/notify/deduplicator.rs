//! Exactly-once "new order" notifications per viewer.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::audit::{AuditEvent, AuditHandle};
use crate::error::WorkflowError;
use crate::metrics;

use super::{FeedEntry, NotificationRecord, NotificationStore, Observation};

/// Turns feed snapshots into notifications, once per (viewer, order).
///
/// The seen-set is durable, so an order never re-notifies across refreshes,
/// restarts, or after the viewer clears their notifications.
pub struct Deduplicator {
    store: Arc<dyn NotificationStore>,
    audit: Option<AuditHandle>,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self { store, audit: None }
    }

    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Notify `viewer_id` of every order in `feed` they have not seen before.
    ///
    /// Safe to call repeatedly with overlapping snapshots.
    pub fn observe(&self, viewer_id: &str, feed: &[FeedEntry]) -> Result<Observation, WorkflowError> {
        if feed.is_empty() {
            return Ok(Observation::default());
        }

        let created = self.store.record_observations(viewer_id, feed, Utc::now())?;
        let observation = Observation { created };

        if observation.is_empty() {
            debug!(viewer_id, feed_len = feed.len(), "No new orders in feed");
            return Ok(observation);
        }

        metrics::NOTIFICATIONS_CREATED.inc_by(observation.created.len() as u64);
        info!(
            viewer_id,
            created = observation.created.len(),
            "New orders observed"
        );
        if let Some(ref audit) = self.audit {
            audit.try_emit(AuditEvent::NotificationsCreated {
                viewer_id: viewer_id.to_string(),
                order_ids: observation
                    .created
                    .iter()
                    .map(|r| r.order_id.clone())
                    .collect(),
            });
        }

        Ok(observation)
    }

    /// Marking an already-read notification is a no-op.
    pub fn mark_read(
        &self,
        viewer_id: &str,
        notification_id: &str,
    ) -> Result<NotificationRecord, WorkflowError> {
        self.store.mark_read(viewer_id, notification_id)
    }

    /// Remove the viewer's notifications. Orders already seen stay seen.
    pub fn clear_all(&self, viewer_id: &str) -> Result<usize, WorkflowError> {
        let cleared = self.store.clear_all(viewer_id)?;
        debug!(viewer_id, cleared, "Notifications cleared");
        Ok(cleared)
    }

    /// Newest first.
    pub fn list(&self, viewer_id: &str) -> Result<Vec<NotificationRecord>, WorkflowError> {
        self.store.list(viewer_id)
    }

    pub fn unread_count(&self, viewer_id: &str) -> Result<i64, WorkflowError> {
        self.store.unread_count(viewer_id)
    }

    pub fn has_seen(&self, viewer_id: &str, order_id: &str) -> Result<bool, WorkflowError> {
        self.store.has_seen(viewer_id, order_id)
    }
}
