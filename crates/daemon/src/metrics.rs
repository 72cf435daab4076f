//! Prometheus metrics for observability.
//!
//! Counters live in `workfloor_core::metrics`; this module adds gauges that
//! mirror stored state and writes the text exposition for the node exporter
//! textfile collector.

use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use prometheus::{self, Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use workfloor_core::{Coordinator, NotificationPoller};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// Floor state (collected dynamically)
// =============================================================================

/// Orders by status. Orders at a station are labelled with the station.
pub static ORDERS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("workfloor_orders_by_status", "Current order count by status"),
        &["status"], // "washing", "ironing", "packing", "on_hold", "completed"
    )
    .unwrap()
});

/// Bypass requests waiting for a decision.
pub static BYPASSES_PENDING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "workfloor_bypasses_pending",
        "Bypass requests waiting for approval",
    )
    .unwrap()
});

/// Driver jobs by status.
pub static JOBS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("workfloor_jobs_by_status", "Current driver job count by status"),
        &["status"], // "available", "assigned"
    )
    .unwrap()
});

// =============================================================================
// Notifier
// =============================================================================

pub static POLLER_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "workfloor_notification_poller_running",
        "Whether the notification poller is running (1) or not (0)",
    )
    .unwrap()
});

pub static WATCHERS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "workfloor_notification_watchers",
        "Viewers whose station feed is polled",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(ORDERS_BY_STATUS.clone()))
        .unwrap();
    registry
        .register(Box::new(BYPASSES_PENDING.clone()))
        .unwrap();
    registry
        .register(Box::new(JOBS_BY_STATUS.clone()))
        .unwrap();
    registry
        .register(Box::new(POLLER_RUNNING.clone()))
        .unwrap();
    registry.register(Box::new(WATCHERS.clone())).unwrap();

    // Core counters (pipeline, bypass, dispatch, notifications)
    for metric in workfloor_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics output is not UTF-8")
}

/// Update gauges from the current stored state.
pub fn collect_dynamic_metrics(coordinator: &Coordinator, poller: Option<&NotificationPoller>) {
    match coordinator.status() {
        Ok(status) => {
            for (label, count) in [
                ("washing", status.at_washing),
                ("ironing", status.at_ironing),
                ("packing", status.at_packing),
                ("on_hold", status.on_hold),
                ("completed", status.completed),
            ] {
                ORDERS_BY_STATUS.with_label_values(&[label]).set(count);
            }
            BYPASSES_PENDING.set(status.pending_bypasses);
            JOBS_BY_STATUS
                .with_label_values(&["available"])
                .set(status.available_jobs);
            JOBS_BY_STATUS
                .with_label_values(&["assigned"])
                .set(status.assigned_jobs);
        }
        Err(e) => tracing::warn!(error = %e, "Failed to collect floor status"),
    }

    match poller {
        Some(poller) => {
            POLLER_RUNNING.set(i64::from(poller.is_running()));
            WATCHERS.set(poller.watchers().len() as i64);
        }
        None => {
            POLLER_RUNNING.set(0);
            WATCHERS.set(0);
        }
    }
}

/// Write the exposition to `path` through a temporary file so the collector
/// never reads a partial file.
pub fn write_textfile(path: &Path) -> Result<()> {
    let output = encode_metrics()?;
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, output).with_context(|| format!("Failed to write {:?}", tmp))?;
    std::fs::rename(&tmp, path).with_context(|| format!("Failed to move metrics to {:?}", path))?;
    Ok(())
}
