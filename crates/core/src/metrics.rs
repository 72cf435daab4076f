//! Prometheus metrics for core components.
//!
//! Counters only; gauges that reflect stored state are collected by the
//! daemon before each export.

use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, Opts};

// =============================================================================
// Station pipeline
// =============================================================================

/// Processing submissions by station and outcome.
pub static SUBMISSIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "workfloor_submissions_total",
            "Processing submissions by station and outcome",
        ),
        &["station", "outcome"], // outcome: "advanced", "completed", "mismatch"
    )
    .unwrap()
});

/// Orders registered at the first station.
pub static ORDERS_REGISTERED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "workfloor_orders_registered_total",
        "Total orders registered",
    )
    .unwrap()
});

// =============================================================================
// Bypass engine
// =============================================================================

/// Bypass requests opened by station.
pub static BYPASSES_OPENED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "workfloor_bypasses_opened_total",
            "Bypass requests opened after a quantity mismatch",
        ),
        &["station"],
    )
    .unwrap()
});

/// Bypass resolutions by decision.
pub static BYPASS_RESOLUTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "workfloor_bypass_resolutions_total",
            "Bypass requests resolved",
        ),
        &["decision"], // "approve", "reject"
    )
    .unwrap()
});

// =============================================================================
// Driver dispatch
// =============================================================================

/// Job accept attempts by result.
pub static JOB_ACCEPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("workfloor_job_accepts_total", "Job accept attempts"),
        &["result"], // "accepted", "driver_busy", "taken", "error"
    )
    .unwrap()
});

/// Jobs completed by type.
pub static JOBS_COMPLETED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("workfloor_jobs_completed_total", "Jobs completed"),
        &["job_type"],
    )
    .unwrap()
});

// =============================================================================
// Notifications
// =============================================================================

/// Notifications created across all viewers.
pub static NOTIFICATIONS_CREATED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "workfloor_notifications_created_total",
        "Notifications created for newly seen orders",
    )
    .unwrap()
});

/// Station feed polls by result.
pub static FEED_POLLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("workfloor_feed_polls_total", "Station feed polls"),
        &["result"], // "ok", "error"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(SUBMISSIONS_TOTAL.clone()),
        Box::new(ORDERS_REGISTERED.clone()),
        Box::new(BYPASSES_OPENED.clone()),
        Box::new(BYPASS_RESOLUTIONS.clone()),
        Box::new(JOB_ACCEPTS.clone()),
        Box::new(JOBS_COMPLETED.clone()),
        Box::new(NOTIFICATIONS_CREATED.clone()),
        Box::new(FEED_POLLS.clone()),
    ]
}
