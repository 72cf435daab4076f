//! Bypass approval workflow.
//!
//! A request is opened when a station count disagrees with the expected
//! count, holds the order until an approver decides, and is terminal once
//! approved or rejected.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::audit::{AuditEvent, AuditHandle};
use crate::error::WorkflowError;
use crate::metrics;
use crate::order::{
    BypassWrite, Order, OrderCommit, OrderStatus, OrderStore, Station, StationLogEntry,
};

use super::{
    BypassDecision, BypassFilter, BypassRequest, BypassStatus, Discrepancy, MIN_REASON_LEN,
};

/// Result of resolving a bypass request.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The request in its terminal status.
    pub bypass: BypassRequest,
    /// The order after the decision was applied.
    pub order: Order,
}

/// Drives bypass requests from `Pending` to a terminal status.
pub struct BypassEngine {
    orders: Arc<dyn OrderStore>,
    audit: Option<AuditHandle>,
}

impl BypassEngine {
    pub fn new(orders: Arc<dyn OrderStore>) -> Self {
        Self {
            orders,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    fn emit(&self, event: AuditEvent) {
        if let Some(ref audit) = self.audit {
            audit.try_emit(event);
        }
    }

    /// Hold an order waiting at `station` because of `discrepancies`.
    ///
    /// Each discrepancy's actual count is recorded on the order.
    pub fn open_bypass(
        &self,
        order_id: &str,
        station: Station,
        discrepancies: Vec<Discrepancy>,
    ) -> Result<BypassRequest, WorkflowError> {
        let mut order = self
            .orders
            .get_order(order_id)?
            .ok_or_else(|| WorkflowError::UnknownOrder(order_id.to_string()))?;

        if let Some(open) = order.open_bypass() {
            return Err(WorkflowError::AlreadyOpen {
                order_id: order.id.clone(),
                bypass_id: open.id.clone(),
            });
        }
        if order.status != OrderStatus::at(station) {
            return Err(WorkflowError::invalid_state(
                "order",
                &order.id,
                order.status.describe(),
                format!("open a bypass at {} for", station),
            ));
        }

        for discrepancy in &discrepancies {
            order.item_mut(&discrepancy.item_id)?.actual_qty = discrepancy.actual;
        }

        let (_, bypass) = self.open_on(order, station, discrepancies, None)?;
        Ok(bypass)
    }

    /// Commit `order` as held by a new request. The caller has already
    /// validated the order and applied the counted quantities.
    pub(crate) fn open_on(
        &self,
        order: Order,
        station: Station,
        discrepancies: Vec<Discrepancy>,
        log: Option<&StationLogEntry>,
    ) -> Result<(Order, BypassRequest), WorkflowError> {
        if let Some(open) = order.open_bypass() {
            return Err(WorkflowError::AlreadyOpen {
                order_id: order.id.clone(),
                bypass_id: open.id.clone(),
            });
        }

        let bypass = BypassRequest::open(&order.id, station, discrepancies, Utc::now());

        let mut held = order;
        held.status = OrderStatus::OnHold;
        held.bypass = Some(bypass.clone());

        let mut commit = OrderCommit::new(&held).with_bypass(BypassWrite::Open(&bypass));
        if let Some(entry) = log {
            commit = commit.with_log(entry);
        }
        let stored = self.orders.commit_order(commit)?;

        metrics::BYPASSES_OPENED
            .with_label_values(&[station.as_str()])
            .inc();
        info!(
            order_id = %stored.id,
            bypass_id = %bypass.id,
            station = %station,
            discrepancies = bypass.discrepancies.len(),
            "Order put on hold pending bypass approval"
        );
        self.emit(AuditEvent::BypassOpened {
            order_id: stored.id.clone(),
            bypass_id: bypass.id.clone(),
            station: station.as_str().to_string(),
            discrepancies: bypass.discrepancies.len() as u32,
            worker_id: log.and_then(|entry| entry.worker_id.clone()),
        });

        Ok((stored, bypass))
    }

    /// Record the worker's justification and forward the request for approval.
    ///
    /// May be repeated while the request is pending; the latest reason wins.
    pub fn submit_reason(
        &self,
        bypass_id: &str,
        reason: &str,
    ) -> Result<BypassRequest, WorkflowError> {
        let reason = reason.trim();
        let length = reason.chars().count();
        if length < MIN_REASON_LEN {
            return Err(WorkflowError::ReasonTooShort {
                min: MIN_REASON_LEN,
                actual: length,
            });
        }

        let bypass = self
            .orders
            .record_bypass_reason(bypass_id, reason, Utc::now())?;

        info!(
            order_id = %bypass.order_id,
            bypass_id = %bypass.id,
            "Bypass reason submitted for approval"
        );
        self.emit(AuditEvent::BypassReasonSubmitted {
            order_id: bypass.order_id.clone(),
            bypass_id: bypass.id.clone(),
            reason: reason.to_string(),
        });

        Ok(bypass)
    }

    /// Apply an approver's decision.
    ///
    /// Approval accepts the counted quantities and advances the order past
    /// the station where the mismatch was found. Rejection leaves the order
    /// on hold with the rejected request attached.
    pub fn resolve(
        &self,
        bypass_id: &str,
        decision: BypassDecision,
        approver_id: &str,
    ) -> Result<Resolution, WorkflowError> {
        let bypass = self.get(bypass_id)?;
        if bypass.status.is_terminal() {
            return Err(WorkflowError::AlreadyResolved(bypass.id));
        }

        let order = self
            .orders
            .get_order(&bypass.order_id)?
            .ok_or_else(|| WorkflowError::UnknownOrder(bypass.order_id.clone()))?;

        if order.open_bypass().map(|b| b.id.as_str()) != Some(bypass.id.as_str()) {
            return Err(WorkflowError::invalid_state(
                "order",
                &order.id,
                order.status.describe(),
                "resolve a bypass for",
            ));
        }

        let mut resolved = bypass;
        resolved.status = BypassStatus::from(decision);
        resolved.resolved_at = Some(Utc::now());
        resolved.resolved_by = Some(approver_id.to_string());

        let mut next = order;
        match decision {
            BypassDecision::Approve => {
                for discrepancy in &resolved.discrepancies {
                    next.item_mut(&discrepancy.item_id)?.actual_qty = discrepancy.actual;
                }
                next.advance_from(resolved.station);
                next.bypass = None;
            }
            BypassDecision::Reject => {
                next.bypass = Some(resolved.clone());
            }
        }

        let stored = self
            .orders
            .commit_order(OrderCommit::new(&next).with_bypass(BypassWrite::Resolve(&resolved)))?;

        metrics::BYPASS_RESOLUTIONS
            .with_label_values(&[decision.as_str()])
            .inc();
        info!(
            order_id = %stored.id,
            bypass_id = %resolved.id,
            decision = decision.as_str(),
            status = %stored.status.describe(),
            "Bypass resolved"
        );
        self.emit(AuditEvent::BypassResolved {
            order_id: stored.id.clone(),
            bypass_id: resolved.id.clone(),
            decision: decision.as_str().to_string(),
            approver_id: approver_id.to_string(),
        });

        Ok(Resolution {
            bypass: resolved,
            order: stored,
        })
    }

    /// Send an order held by a rejected request back to its station for a recount.
    ///
    /// Expected quantities are kept; the rejected counts are discarded.
    pub fn reinstate(&self, order_id: &str, supervisor_id: &str) -> Result<Order, WorkflowError> {
        let order = self
            .orders
            .get_order(order_id)?
            .ok_or_else(|| WorkflowError::UnknownOrder(order_id.to_string()))?;

        let rejected = match order.bypass {
            Some(ref bypass)
                if order.is_locked() && bypass.status == BypassStatus::Rejected =>
            {
                bypass.clone()
            }
            _ => {
                warn!(order_id, status = %order.status.describe(), "Reinstate refused");
                return Err(WorkflowError::invalid_state(
                    "order",
                    &order.id,
                    order.status.describe(),
                    "reinstate",
                ));
            }
        };

        let mut next = order;
        next.reset_counts();
        next.status = OrderStatus::at(rejected.station);
        next.bypass = None;

        let stored = self.orders.commit_order(OrderCommit::new(&next))?;

        info!(
            order_id = %stored.id,
            bypass_id = %rejected.id,
            station = %rejected.station,
            "Order reinstated after rejected bypass"
        );
        self.emit(AuditEvent::OrderReinstated {
            order_id: stored.id.clone(),
            bypass_id: rejected.id,
            station: rejected.station.as_str().to_string(),
            supervisor_id: supervisor_id.to_string(),
        });

        Ok(stored)
    }

    pub fn get(&self, bypass_id: &str) -> Result<BypassRequest, WorkflowError> {
        self.orders
            .get_bypass(bypass_id)?
            .ok_or_else(|| WorkflowError::UnknownBypass(bypass_id.to_string()))
    }

    /// Approver queue, oldest first.
    pub fn pending(&self) -> Result<Vec<BypassRequest>, WorkflowError> {
        self.orders.list_bypasses(
            &BypassFilter::new()
                .with_status(BypassStatus::Pending)
                .with_limit(-1),
        )
    }

    /// Every request ever raised for an order, oldest first.
    pub fn for_order(&self, order_id: &str) -> Result<Vec<BypassRequest>, WorkflowError> {
        self.orders
            .list_bypasses(&BypassFilter::new().with_order_id(order_id).with_limit(-1))
    }
}
