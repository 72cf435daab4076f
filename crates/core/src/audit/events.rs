use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Station pipeline
    OrderRegistered {
        order_id: String,
        order_number: String,
        item_count: u32,
        total_quantity: u64,
    },
    /// Order left a station with matching counts.
    OrderAdvanced {
        order_id: String,
        from_station: String,
        to_station: String,
        worker_id: Option<String>,
    },
    /// Order left the packing station.
    OrderCompleted {
        order_id: String,
        order_number: String,
        worker_id: Option<String>,
    },

    // Bypass engine
    BypassOpened {
        order_id: String,
        bypass_id: String,
        station: String,
        /// Number of mismatching items
        discrepancies: u32,
        worker_id: Option<String>,
    },
    BypassReasonSubmitted {
        order_id: String,
        bypass_id: String,
        reason: String,
    },
    BypassResolved {
        order_id: String,
        bypass_id: String,
        /// "approve" or "reject"
        decision: String,
        approver_id: String,
    },
    /// Rejected order sent back to its station for recount.
    OrderReinstated {
        order_id: String,
        bypass_id: String,
        station: String,
        supervisor_id: String,
    },

    // Driver dispatch
    JobOpened {
        job_id: String,
        order_id: String,
        job_type: String,
    },
    JobAccepted {
        job_id: String,
        order_id: String,
        driver_id: String,
    },
    JobCompleted {
        job_id: String,
        order_id: String,
        driver_id: String,
    },

    // Notifications
    NotificationsCreated {
        viewer_id: String,
        /// Orders that were new to the viewer
        order_ids: Vec<String>,
    },
}

impl AuditEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::OrderRegistered { .. } => "order_registered",
            Self::OrderAdvanced { .. } => "order_advanced",
            Self::OrderCompleted { .. } => "order_completed",
            Self::BypassOpened { .. } => "bypass_opened",
            Self::BypassReasonSubmitted { .. } => "bypass_reason_submitted",
            Self::BypassResolved { .. } => "bypass_resolved",
            Self::OrderReinstated { .. } => "order_reinstated",
            Self::JobOpened { .. } => "job_opened",
            Self::JobAccepted { .. } => "job_accepted",
            Self::JobCompleted { .. } => "job_completed",
            Self::NotificationsCreated { .. } => "notifications_created",
        }
    }

    /// Extract order_id if this event concerns a single order
    pub fn order_id(&self) -> Option<&str> {
        match self {
            Self::OrderRegistered { order_id, .. }
            | Self::OrderAdvanced { order_id, .. }
            | Self::OrderCompleted { order_id, .. }
            | Self::BypassOpened { order_id, .. }
            | Self::BypassReasonSubmitted { order_id, .. }
            | Self::BypassResolved { order_id, .. }
            | Self::OrderReinstated { order_id, .. }
            | Self::JobOpened { order_id, .. }
            | Self::JobAccepted { order_id, .. }
            | Self::JobCompleted { order_id, .. } => Some(order_id),
            _ => None,
        }
    }

    /// Extract user_id if this event was triggered by a person
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::OrderAdvanced { worker_id, .. }
            | Self::OrderCompleted { worker_id, .. }
            | Self::BypassOpened { worker_id, .. } => worker_id.as_deref(),
            Self::BypassResolved { approver_id, .. } => Some(approver_id),
            Self::OrderReinstated { supervisor_id, .. } => Some(supervisor_id),
            Self::JobAccepted { driver_id, .. } | Self::JobCompleted { driver_id, .. } => {
                Some(driver_id)
            }
            Self::NotificationsCreated { viewer_id, .. } => Some(viewer_id),
            _ => None,
        }
    }
}

/// A stored audit record with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub order_id: Option<String>,
    pub user_id: Option<String>,
    pub data: AuditEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_service_started() {
        let event = AuditEvent::ServiceStarted {
            version: "0.1.0".to_string(),
            config_hash: "abc123".to_string(),
        };
        assert_eq!(event.event_type(), "service_started");
        assert_eq!(event.order_id(), None);
        assert_eq!(event.user_id(), None);
    }

    #[test]
    fn test_event_type_order_advanced() {
        let event = AuditEvent::OrderAdvanced {
            order_id: "order-1".to_string(),
            from_station: "washing".to_string(),
            to_station: "ironing".to_string(),
            worker_id: Some("worker-7".to_string()),
        };
        assert_eq!(event.event_type(), "order_advanced");
        assert_eq!(event.order_id(), Some("order-1"));
        assert_eq!(event.user_id(), Some("worker-7"));
    }

    #[test]
    fn test_anonymous_submission_has_no_user() {
        let event = AuditEvent::OrderCompleted {
            order_id: "order-1".to_string(),
            order_number: "ORD-1".to_string(),
            worker_id: None,
        };
        assert_eq!(event.order_id(), Some("order-1"));
        assert_eq!(event.user_id(), None);
    }

    #[test]
    fn test_event_type_bypass_resolved() {
        let event = AuditEvent::BypassResolved {
            order_id: "order-1".to_string(),
            bypass_id: "bypass-1".to_string(),
            decision: "approve".to_string(),
            approver_id: "admin".to_string(),
        };
        assert_eq!(event.event_type(), "bypass_resolved");
        assert_eq!(event.user_id(), Some("admin"));
    }

    #[test]
    fn test_event_type_job_accepted() {
        let event = AuditEvent::JobAccepted {
            job_id: "job-1".to_string(),
            order_id: "order-1".to_string(),
            driver_id: "driver-1".to_string(),
        };
        assert_eq!(event.event_type(), "job_accepted");
        assert_eq!(event.order_id(), Some("order-1"));
        assert_eq!(event.user_id(), Some("driver-1"));
    }

    #[test]
    fn test_notifications_created_is_per_viewer() {
        let event = AuditEvent::NotificationsCreated {
            viewer_id: "viewer-1".to_string(),
            order_ids: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(event.order_id(), None);
        assert_eq!(event.user_id(), Some("viewer-1"));
    }

    #[test]
    fn test_serialize_deserialize_bypass_opened() {
        let event = AuditEvent::BypassOpened {
            order_id: "order-1".to_string(),
            bypass_id: "bypass-1".to_string(),
            station: "ironing".to_string(),
            discrepancies: 2,
            worker_id: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"bypass_opened\""));
        assert!(json.contains("\"station\":\"ironing\""));

        let deserialized: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.event_type(), "bypass_opened");
        assert_eq!(deserialized.order_id(), Some("order-1"));
    }

    #[test]
    fn test_audit_record_serialize() {
        let record = AuditRecord {
            id: 1,
            timestamp: Utc::now(),
            event_type: "service_started".to_string(),
            order_id: None,
            user_id: None,
            data: AuditEvent::ServiceStarted {
                version: "0.1.0".to_string(),
                config_hash: "abc123".to_string(),
            },
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"event_type\":\"service_started\""));
    }
}
