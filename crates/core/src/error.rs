//! Error taxonomy shared by every workflow component.

use thiserror::Error;

/// Error returned by workflow operations.
///
/// Every variant is recoverable by the caller. A quantity mismatch during
/// processing is not an error; it is reported as
/// [`ProcessingOutcome::Mismatch`](crate::pipeline::ProcessingOutcome).
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The entity is not in a state that permits the operation.
    #[error("Cannot {operation} {entity} {id}: current state is {current_state}")]
    InvalidState {
        entity: &'static str,
        id: String,
        current_state: String,
        operation: String,
    },

    #[error("Order not found: {0}")]
    UnknownOrder(String),

    #[error("Item {item_id} does not belong to order {order_id}")]
    UnknownItem { order_id: String, item_id: String },

    #[error("Job not found: {0}")]
    UnknownJob(String),

    #[error("Bypass request not found: {0}")]
    UnknownBypass(String),

    #[error("Notification not found: {0}")]
    UnknownNotification(String),

    #[error("Order {order_id} already has an open bypass request ({bypass_id})")]
    AlreadyOpen { order_id: String, bypass_id: String },

    #[error("Bypass request {0} is already resolved")]
    AlreadyResolved(String),

    #[error("Bypass reason must be at least {min} characters, got {actual}")]
    ReasonTooShort { min: usize, actual: usize },

    #[error("Driver {driver_id} already holds active job {active_job_id}")]
    DriverBusy {
        driver_id: String,
        active_job_id: String,
    },

    #[error("Job {job_id} is not assigned to driver {driver_id}")]
    NotOwner { job_id: String, driver_id: String },

    /// Malformed input that no state could accept (empty order number,
    /// duplicate line item ids).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Storage collaborator failure.
    #[error("Database error: {0}")]
    Database(String),
}

impl WorkflowError {
    pub(crate) fn invalid_state(
        entity: &'static str,
        id: impl Into<String>,
        current_state: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        WorkflowError::InvalidState {
            entity,
            id: id.into(),
            current_state: current_state.into(),
            operation: operation.into(),
        }
    }

    /// Stable snake_case identifier of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::InvalidState { .. } => "invalid_state",
            WorkflowError::UnknownOrder(_) => "unknown_order",
            WorkflowError::UnknownItem { .. } => "unknown_item",
            WorkflowError::UnknownJob(_) => "unknown_job",
            WorkflowError::UnknownBypass(_) => "unknown_bypass",
            WorkflowError::UnknownNotification(_) => "unknown_notification",
            WorkflowError::AlreadyOpen { .. } => "already_open",
            WorkflowError::AlreadyResolved(_) => "already_resolved",
            WorkflowError::ReasonTooShort { .. } => "reason_too_short",
            WorkflowError::DriverBusy { .. } => "driver_busy",
            WorkflowError::NotOwner { .. } => "not_owner",
            WorkflowError::InvalidRequest(_) => "invalid_request",
            WorkflowError::Database(_) => "database",
        }
    }

    /// Actionable message for the person who triggered the operation.
    pub fn user_message(&self) -> &'static str {
        match self {
            WorkflowError::InvalidState { .. } => {
                "This record changed or is locked; refresh and try again"
            }
            WorkflowError::UnknownOrder(_) => "That order no longer exists",
            WorkflowError::UnknownItem { .. } => "One of the items is not part of this order",
            WorkflowError::UnknownJob(_) => "That job no longer exists",
            WorkflowError::UnknownBypass(_) => "That bypass request no longer exists",
            WorkflowError::UnknownNotification(_) => "That notification no longer exists",
            WorkflowError::AlreadyOpen { .. } => {
                "A bypass request is already waiting for approval on this order"
            }
            WorkflowError::AlreadyResolved(_) => "This bypass request has already been decided",
            WorkflowError::ReasonTooShort { .. } => {
                "Please describe the discrepancy in at least 5 characters"
            }
            WorkflowError::DriverBusy { .. } => "Finish your active job first",
            WorkflowError::NotOwner { .. } => "This job is not assigned to you",
            WorkflowError::InvalidRequest(_) => "The request is incomplete or malformed",
            WorkflowError::Database(_) => "Temporary storage problem; please retry",
        }
    }

    /// True when retrying the same call unchanged may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkflowError::Database(_))
    }
}

/// A stored or configured enum value that matches no variant.
#[derive(Debug, Error)]
#[error("Unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

impl From<rusqlite::Error> for WorkflowError {
    fn from(e: rusqlite::Error) -> Self {
        WorkflowError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(e: serde_json::Error) -> Self {
        WorkflowError::Database(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn every_kind() -> Vec<WorkflowError> {
        vec![
            WorkflowError::invalid_state("order", "o1", "on_hold", "process"),
            WorkflowError::UnknownOrder("o1".into()),
            WorkflowError::UnknownItem {
                order_id: "o1".into(),
                item_id: "i1".into(),
            },
            WorkflowError::UnknownJob("j1".into()),
            WorkflowError::UnknownBypass("b1".into()),
            WorkflowError::UnknownNotification("n1".into()),
            WorkflowError::AlreadyOpen {
                order_id: "o1".into(),
                bypass_id: "b1".into(),
            },
            WorkflowError::AlreadyResolved("b1".into()),
            WorkflowError::ReasonTooShort { min: 5, actual: 2 },
            WorkflowError::DriverBusy {
                driver_id: "d1".into(),
                active_job_id: "j1".into(),
            },
            WorkflowError::NotOwner {
                job_id: "j1".into(),
                driver_id: "d2".into(),
            },
            WorkflowError::InvalidRequest("empty".into()),
            WorkflowError::Database("locked".into()),
        ]
    }

    #[test]
    fn test_every_kind_has_distinct_message() {
        let errors = every_kind();
        let kinds: HashSet<_> = errors.iter().map(|e| e.kind()).collect();
        let messages: HashSet<_> = errors.iter().map(|e| e.user_message()).collect();
        assert_eq!(kinds.len(), errors.len());
        assert_eq!(messages.len(), errors.len());
    }

    #[test]
    fn test_driver_busy_message() {
        let err = WorkflowError::DriverBusy {
            driver_id: "d1".into(),
            active_job_id: "j1".into(),
        };
        assert_eq!(err.user_message(), "Finish your active job first");
        assert_eq!(err.to_string(), "Driver d1 already holds active job j1");
    }

    #[test]
    fn test_only_database_errors_are_retryable() {
        for err in every_kind() {
            assert_eq!(err.is_retryable(), err.kind() == "database");
        }
    }

    #[test]
    fn test_invalid_state_display() {
        let err = WorkflowError::invalid_state("order", "o1", "completed", "process");
        assert_eq!(
            err.to_string(),
            "Cannot process order o1: current state is completed"
        );
    }
}
