//! Station processing rules.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditHandle};
use crate::bypass::{BypassEngine, Discrepancy};
use crate::dispatch::{Dispatcher, DriverJob, JobType};
use crate::error::WorkflowError;
use crate::metrics;
use crate::order::{
    NewOrder, Order, OrderCommit, OrderFilter, OrderStatus, OrderStore, Station,
    StationFeedEntry, StationLogEntry, StationOutcome, SubmittedItem,
};

use super::{ProcessingOutcome, ProcessingRequest};

/// Completed orders read per page while reconciling delivery jobs.
const RECONCILE_PAGE_SIZE: i64 = 100;

/// Moves orders through `washing → ironing → packing`.
///
/// Every transition is committed with a version check, so of two concurrent
/// submissions for the same order only one succeeds; the other gets
/// `InvalidState`.
pub struct StationPipeline {
    orders: Arc<dyn OrderStore>,
    bypass: Arc<BypassEngine>,
    /// Opens a delivery job when an order is packed.
    dispatcher: Option<Arc<Dispatcher>>,
    audit: Option<AuditHandle>,
}

impl StationPipeline {
    pub fn new(orders: Arc<dyn OrderStore>, bypass: Arc<BypassEngine>) -> Self {
        Self {
            orders,
            bypass,
            dispatcher: None,
            audit: None,
        }
    }

    /// Dispatch a delivery job for every completed order.
    pub fn with_dispatcher(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
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

    /// Register an order at the first station.
    pub fn register_order(&self, request: NewOrder) -> Result<Order, WorkflowError> {
        let order = self.orders.create_order(request)?;

        metrics::ORDERS_REGISTERED.inc();
        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            items = order.items.len(),
            "Order registered"
        );
        self.emit(AuditEvent::OrderRegistered {
            order_id: order.id.clone(),
            order_number: order.order_number.clone(),
            item_count: order.items.len() as u32,
            total_quantity: order.total_quantity(),
        });

        Ok(order)
    }

    pub fn get_order(&self, order_id: &str) -> Result<Order, WorkflowError> {
        self.orders
            .get_order(order_id)?
            .ok_or_else(|| WorkflowError::UnknownOrder(order_id.to_string()))
    }

    /// Orders waiting at `station`, oldest first, including those held by a
    /// bypass raised there.
    pub fn station_feed(&self, station: Station) -> Result<Vec<StationFeedEntry>, WorkflowError> {
        self.orders.station_feed(station)
    }

    /// Process an order at whatever station it is waiting at.
    pub fn submit_processing(
        &self,
        order_id: &str,
        items: Vec<SubmittedItem>,
    ) -> Result<ProcessingOutcome, WorkflowError> {
        self.submit(ProcessingRequest::new(order_id, items))
    }

    /// Process an order on behalf of a worker at `station`.
    pub fn submit_processing_at(
        &self,
        station: Station,
        worker_id: &str,
        order_id: &str,
        items: Vec<SubmittedItem>,
    ) -> Result<ProcessingOutcome, WorkflowError> {
        self.submit(
            ProcessingRequest::new(order_id, items)
                .at_station(station)
                .by_worker(worker_id),
        )
    }

    pub fn submit(&self, request: ProcessingRequest) -> Result<ProcessingOutcome, WorkflowError> {
        let mut order = self.get_order(&request.order_id)?;

        let station = match order.status {
            OrderStatus::AtStation { station } if order.open_bypass().is_none() => station,
            _ => {
                return Err(WorkflowError::invalid_state(
                    "order",
                    &order.id,
                    order.status.describe(),
                    "process",
                ))
            }
        };

        if let Some(expected) = request.station {
            if expected != station {
                return Err(WorkflowError::invalid_state(
                    "order",
                    &order.id,
                    order.status.describe(),
                    format!("process at {}", expected),
                ));
            }
        }

        // Counts were verified upstream; packing always completes
        if !station.verifies_quantities() {
            return self.advance(order, station, request.worker_id);
        }

        for item in &request.items {
            order.item_mut(&item.item_id)?.actual_qty = item.quantity;
        }

        let discrepancies: Vec<Discrepancy> = order
            .items
            .iter()
            .filter(|item| !item.matches())
            .map(|item| Discrepancy {
                item_id: item.id.clone(),
                item_name: item.name.clone(),
                expected: item.expected_qty,
                actual: item.actual_qty,
            })
            .collect();

        if discrepancies.is_empty() {
            self.advance(order, station, request.worker_id)
        } else {
            self.hold(order, station, discrepancies, request.worker_id)
        }
    }

    /// A worker's processed orders, most recent first.
    pub fn worker_history(
        &self,
        worker_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StationLogEntry>, WorkflowError> {
        self.orders.worker_history(worker_id, limit, offset)
    }

    fn log_entry(
        order: &Order,
        station: Station,
        worker_id: Option<String>,
        outcome: StationOutcome,
    ) -> StationLogEntry {
        StationLogEntry {
            order_id: order.id.clone(),
            order_number: order.order_number.clone(),
            station,
            worker_id,
            outcome,
            recorded_at: Utc::now(),
        }
    }

    fn record_submission(station: Station, outcome: StationOutcome) {
        metrics::SUBMISSIONS_TOTAL
            .with_label_values(&[station.as_str(), outcome.as_str()])
            .inc();
    }

    /// Accept the current counts at `from` and commit the move to the next
    /// station, or to completion after the last one.
    fn advance(
        &self,
        mut order: Order,
        from: Station,
        worker_id: Option<String>,
    ) -> Result<ProcessingOutcome, WorkflowError> {
        order.advance_from(from);
        let next = order.status.station();
        let outcome = match next {
            Some(_) => StationOutcome::Advanced,
            None => StationOutcome::Completed,
        };

        let entry = Self::log_entry(&order, from, worker_id, outcome);
        let stored = self
            .orders
            .commit_order(OrderCommit::new(&order).with_log(&entry))?;
        Self::record_submission(from, outcome);

        match next {
            Some(to) => {
                info!(order_id = %stored.id, from = %from, to = %to, "Order advanced");
                self.emit(AuditEvent::OrderAdvanced {
                    order_id: stored.id.clone(),
                    from_station: from.as_str().to_string(),
                    to_station: to.as_str().to_string(),
                    worker_id: entry.worker_id,
                });
                Ok(ProcessingOutcome::Advanced {
                    order: stored,
                    from,
                    to,
                })
            }
            None => {
                info!(order_id = %stored.id, order_number = %stored.order_number, "Order completed");
                self.emit(AuditEvent::OrderCompleted {
                    order_id: stored.id.clone(),
                    order_number: stored.order_number.clone(),
                    worker_id: entry.worker_id,
                });
                let delivery_job = self.dispatch_delivery(&stored);
                Ok(ProcessingOutcome::Completed {
                    order: stored,
                    delivery_job,
                })
            }
        }
    }

    /// The order is already committed as completed, so a dispatch failure is
    /// logged rather than returned.
    fn dispatch_delivery(&self, order: &Order) -> Option<DriverJob> {
        let dispatcher = self.dispatcher.as_ref()?;
        match dispatcher.open_job(&order.id, &order.order_number, JobType::Delivery) {
            Ok(job) => Some(job),
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "Failed to open delivery job");
                None
            }
        }
    }

    /// Open the delivery job of every completed order that lacks one, e.g.
    /// after the process stopped between completing an order and opening
    /// its job. Returns the number of jobs opened.
    pub fn reconcile_deliveries(&self) -> Result<usize, WorkflowError> {
        let Some(dispatcher) = self.dispatcher.as_ref() else {
            return Ok(0);
        };

        let mut opened = 0;
        let mut offset = 0;
        loop {
            let page = self.orders.list_orders(
                &OrderFilter::new()
                    .with_status("completed")
                    .with_limit(RECONCILE_PAGE_SIZE)
                    .with_offset(offset),
            )?;

            for order in &page {
                let (job, created) =
                    dispatcher.ensure_job(&order.id, &order.order_number, JobType::Delivery)?;
                if created {
                    warn!(
                        order_id = %order.id,
                        job_id = %job.id,
                        "Opened missing delivery job"
                    );
                    opened += 1;
                }
            }

            if (page.len() as i64) < RECONCILE_PAGE_SIZE {
                break;
            }
            offset += RECONCILE_PAGE_SIZE;
        }

        Ok(opened)
    }

    fn hold(
        &self,
        order: Order,
        station: Station,
        discrepancies: Vec<Discrepancy>,
        worker_id: Option<String>,
    ) -> Result<ProcessingOutcome, WorkflowError> {
        debug!(
            order_id = %order.id,
            station = %station,
            mismatched = discrepancies.len(),
            "Quantity mismatch"
        );

        let entry = Self::log_entry(&order, station, worker_id, StationOutcome::Mismatch);
        let (stored, bypass) = self
            .bypass
            .open_on(order, station, discrepancies, Some(&entry))?;

        Self::record_submission(station, StationOutcome::Mismatch);

        Ok(ProcessingOutcome::Mismatch {
            order: stored,
            bypass,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bypass::{BypassDecision, BypassStatus};
    use crate::dispatch::{JobStatus, JobStore, NewJob, SqliteJobStore};
    use crate::order::SqliteOrderStore;
    use crate::testing::fixtures;
    use chrono::DateTime;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Setup {
        pipeline: StationPipeline,
        bypass: Arc<BypassEngine>,
        dispatcher: Arc<Dispatcher>,
    }

    fn setup() -> Setup {
        let orders: Arc<dyn OrderStore> = Arc::new(SqliteOrderStore::in_memory().unwrap());
        let bypass = Arc::new(BypassEngine::new(Arc::clone(&orders)));
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(
            SqliteJobStore::in_memory().unwrap(),
        )));
        let pipeline = StationPipeline::new(orders, Arc::clone(&bypass))
            .with_dispatcher(Arc::clone(&dispatcher));
        Setup {
            pipeline,
            bypass,
            dispatcher,
        }
    }

    fn items(shirts: u32, towels: u32) -> Vec<SubmittedItem> {
        vec![
            SubmittedItem::new("shirt", shirts),
            SubmittedItem::new("towel", towels),
        ]
    }

    #[test]
    fn test_full_round_trip() {
        let s = setup();
        let order = s
            .pipeline
            .register_order(fixtures::new_order("ORD-1"))
            .unwrap();
        assert_eq!(order.status, OrderStatus::at(Station::Washing));

        let washed = s.pipeline.submit_processing(&order.id, items(4, 2)).unwrap();
        assert!(matches!(
            washed,
            ProcessingOutcome::Advanced {
                from: Station::Washing,
                to: Station::Ironing,
                ..
            }
        ));

        let ironed = s.pipeline.submit_processing(&order.id, items(4, 2)).unwrap();
        assert_eq!(ironed.order().status, OrderStatus::at(Station::Packing));

        let packed = s.pipeline.submit_processing(&order.id, items(4, 2)).unwrap();
        assert_eq!(packed.order().status, OrderStatus::Completed);
        assert_eq!(packed.order().version, 3);
    }

    #[test]
    fn test_packing_ignores_counts_and_dispatches_delivery() {
        let s = setup();
        let order = s
            .pipeline
            .register_order(fixtures::new_order("ORD-1"))
            .unwrap();
        s.pipeline.submit_processing(&order.id, items(4, 2)).unwrap();
        s.pipeline.submit_processing(&order.id, items(4, 2)).unwrap();

        // Wrong counts and an unknown item are irrelevant at packing
        let packed = s
            .pipeline
            .submit_processing(
                &order.id,
                vec![SubmittedItem::new("shirt", 0), SubmittedItem::new("sock", 9)],
            )
            .unwrap();

        match packed {
            ProcessingOutcome::Completed {
                order: done,
                delivery_job: Some(job),
            } => {
                assert_eq!(done.item("shirt").unwrap().expected_qty, 4);
                assert_eq!(job.order_id, order.id);
                assert_eq!(job.job_type, JobType::Delivery);
                assert_eq!(job.status, JobStatus::Available);
            }
            other => panic!("expected completion with delivery job, got {:?}", other),
        }
        assert_eq!(s.dispatcher.list_available().unwrap().len(), 1);
    }

    #[test]
    fn test_mismatch_puts_order_on_hold() {
        let s = setup();
        let order = s
            .pipeline
            .register_order(NewOrder::new("ORD-A").with_item("A", "Sheet", 4))
            .unwrap();

        let outcome = s
            .pipeline
            .submit_processing(&order.id, vec![SubmittedItem::new("A", 5)])
            .unwrap();

        assert!(outcome.is_mismatch());
        assert_eq!(outcome.order().status, OrderStatus::OnHold);
        assert_eq!(
            outcome.discrepancies(),
            &[Discrepancy {
                item_id: "A".to_string(),
                item_name: "Sheet".to_string(),
                expected: 4,
                actual: 5,
            }]
        );
        let bypass = match &outcome {
            ProcessingOutcome::Mismatch { bypass, .. } => bypass.clone(),
            _ => unreachable!(),
        };
        assert_eq!(bypass.status, BypassStatus::Pending);
        assert_eq!(bypass.station, Station::Washing);

        // Approval advances with the counted quantity
        let resolution = s
            .bypass
            .resolve(&bypass.id, BypassDecision::Approve, "boss")
            .unwrap();
        assert_eq!(resolution.order.status, OrderStatus::at(Station::Ironing));
        assert_eq!(resolution.order.item("A").unwrap().expected_qty, 5);
        assert!(matches!(
            s.bypass.resolve(&bypass.id, BypassDecision::Approve, "boss"),
            Err(WorkflowError::AlreadyResolved(_))
        ));
    }

    #[test]
    fn test_all_discrepancies_reported() {
        let s = setup();
        let order = s
            .pipeline
            .register_order(fixtures::new_order("ORD-1"))
            .unwrap();

        let outcome = s.pipeline.submit_processing(&order.id, items(3, 1)).unwrap();
        let ids: Vec<_> = outcome
            .discrepancies()
            .iter()
            .map(|d| d.item_id.as_str())
            .collect();
        assert_eq!(ids, vec!["shirt", "towel"]);
    }

    #[test]
    fn test_on_hold_order_cannot_be_processed() {
        let s = setup();
        let order = s
            .pipeline
            .register_order(fixtures::new_order("ORD-1"))
            .unwrap();
        s.pipeline.submit_processing(&order.id, items(5, 2)).unwrap();

        let result = s.pipeline.submit_processing(&order.id, items(4, 2));
        assert!(matches!(result, Err(WorkflowError::InvalidState { .. })));
    }

    #[test]
    fn test_completed_order_cannot_be_processed() {
        let s = setup();
        let order = s
            .pipeline
            .register_order(fixtures::new_order("ORD-1"))
            .unwrap();
        for _ in 0..3 {
            s.pipeline.submit_processing(&order.id, items(4, 2)).unwrap();
        }

        let result = s.pipeline.submit_processing(&order.id, items(4, 2));
        assert!(matches!(result, Err(WorkflowError::InvalidState { .. })));
    }

    #[test]
    fn test_unknown_item_changes_nothing() {
        let s = setup();
        let order = s
            .pipeline
            .register_order(fixtures::new_order("ORD-1"))
            .unwrap();

        let result = s
            .pipeline
            .submit_processing(&order.id, vec![SubmittedItem::new("sock", 1)]);
        assert!(matches!(result, Err(WorkflowError::UnknownItem { .. })));

        let unchanged = s.pipeline.get_order(&order.id).unwrap();
        assert_eq!(unchanged.version, 0);
        assert_eq!(unchanged.status, OrderStatus::at(Station::Washing));
    }

    #[test]
    fn test_unknown_order() {
        let s = setup();
        assert!(matches!(
            s.pipeline.submit_processing("ghost", vec![]),
            Err(WorkflowError::UnknownOrder(_))
        ));
    }

    #[test]
    fn test_omitted_items_keep_count_and_last_duplicate_wins() {
        let s = setup();
        let order = s
            .pipeline
            .register_order(fixtures::new_order("ORD-1"))
            .unwrap();

        // No towel entry; two shirt entries
        let outcome = s
            .pipeline
            .submit_processing(
                &order.id,
                vec![SubmittedItem::new("shirt", 9), SubmittedItem::new("shirt", 4)],
            )
            .unwrap();
        assert!(matches!(outcome, ProcessingOutcome::Advanced { .. }));
    }

    #[test]
    fn test_station_must_match_caller() {
        let s = setup();
        let order = s
            .pipeline
            .register_order(fixtures::new_order("ORD-1"))
            .unwrap();

        let result =
            s.pipeline
                .submit_processing_at(Station::Ironing, "w2", &order.id, items(4, 2));
        assert!(matches!(result, Err(WorkflowError::InvalidState { .. })));

        s.pipeline
            .submit_processing_at(Station::Washing, "w1", &order.id, items(4, 2))
            .unwrap();
    }

    #[test]
    fn test_stale_version_loses() {
        let orders: Arc<dyn OrderStore> = Arc::new(SqliteOrderStore::in_memory().unwrap());
        let order = orders.create_order(fixtures::new_order("ORD-1")).unwrap();

        let mut first = order.clone();
        first.advance_from(Station::Washing);
        orders.commit_order(OrderCommit::new(&first)).unwrap();

        // A second writer that read version 0
        let mut second = order;
        second.advance_from(Station::Washing);
        assert!(matches!(
            orders.commit_order(OrderCommit::new(&second)),
            Err(WorkflowError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_worker_history_records_every_outcome() {
        let s = setup();
        let a = s
            .pipeline
            .register_order(fixtures::new_order("ORD-A"))
            .unwrap();
        let b = s
            .pipeline
            .register_order(fixtures::new_order("ORD-B"))
            .unwrap();

        s.pipeline
            .submit_processing_at(Station::Washing, "w1", &a.id, items(4, 2))
            .unwrap();
        s.pipeline
            .submit_processing_at(Station::Washing, "w1", &b.id, items(4, 3))
            .unwrap();
        s.pipeline
            .submit_processing_at(Station::Washing, "w2", &b.id, items(4, 2))
            .unwrap_err();

        let history = s.pipeline.worker_history("w1", 10, 0).unwrap();
        let outcomes: Vec<_> = history.iter().map(|e| e.outcome).collect();
        assert_eq!(
            outcomes,
            vec![StationOutcome::Mismatch, StationOutcome::Advanced]
        );
        assert_eq!(history[0].order_number, "ORD-B");
        assert!(s.pipeline.worker_history("w2", 10, 0).unwrap().is_empty());
    }

    #[test]
    fn test_no_dispatcher_no_delivery_job() {
        let orders: Arc<dyn OrderStore> = Arc::new(SqliteOrderStore::in_memory().unwrap());
        let bypass = Arc::new(BypassEngine::new(Arc::clone(&orders)));
        let pipeline = StationPipeline::new(orders, bypass);

        let order = pipeline
            .register_order(fixtures::new_order("ORD-1"))
            .unwrap();
        let mut last = None;
        for _ in 0..3 {
            last = Some(pipeline.submit_processing(&order.id, items(4, 2)).unwrap());
        }
        assert!(matches!(
            last,
            Some(ProcessingOutcome::Completed {
                delivery_job: None,
                ..
            })
        ));
    }

    /// Job store whose inserts fail while `failing` is set.
    struct FlakyJobStore {
        inner: SqliteJobStore,
        failing: AtomicBool,
    }

    impl JobStore for FlakyJobStore {
        fn open_job(
            &self,
            request: &NewJob,
            at: DateTime<Utc>,
        ) -> Result<(DriverJob, bool), WorkflowError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(WorkflowError::Database("disk I/O error".to_string()));
            }
            self.inner.open_job(request, at)
        }
        fn get_job(&self, id: &str) -> Result<Option<DriverJob>, WorkflowError> {
            self.inner.get_job(id)
        }
        fn list_available(&self) -> Result<Vec<DriverJob>, WorkflowError> {
            self.inner.list_available()
        }
        fn active_for_driver(&self, driver_id: &str) -> Result<Option<DriverJob>, WorkflowError> {
            self.inner.active_for_driver(driver_id)
        }
        fn assign(
            &self,
            job_id: &str,
            driver_id: &str,
            at: DateTime<Utc>,
        ) -> Result<DriverJob, WorkflowError> {
            self.inner.assign(job_id, driver_id, at)
        }
        fn complete(
            &self,
            job_id: &str,
            driver_id: &str,
            at: DateTime<Utc>,
        ) -> Result<DriverJob, WorkflowError> {
            self.inner.complete(job_id, driver_id, at)
        }
        fn completed_page(
            &self,
            driver_id: &str,
            limit: i64,
            offset: i64,
        ) -> Result<Vec<DriverJob>, WorkflowError> {
            self.inner.completed_page(driver_id, limit, offset)
        }
        fn count_jobs(&self, status: JobStatus) -> Result<i64, WorkflowError> {
            self.inner.count_jobs(status)
        }
    }

    #[test]
    fn test_reconcile_opens_missing_delivery_jobs() {
        let jobs = Arc::new(FlakyJobStore {
            inner: SqliteJobStore::in_memory().unwrap(),
            failing: AtomicBool::new(true),
        });
        let orders: Arc<dyn OrderStore> = Arc::new(SqliteOrderStore::in_memory().unwrap());
        let bypass = Arc::new(BypassEngine::new(Arc::clone(&orders)));
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&jobs) as Arc<dyn JobStore>));
        let pipeline = StationPipeline::new(orders, bypass).with_dispatcher(dispatcher);

        let order = pipeline
            .register_order(fixtures::new_order("ORD-1"))
            .unwrap();
        for _ in 0..3 {
            pipeline.submit_processing(&order.id, items(4, 2)).unwrap();
        }

        // The order completed but its delivery job was never stored
        assert_eq!(
            pipeline.get_order(&order.id).unwrap().status,
            OrderStatus::Completed
        );
        assert_eq!(jobs.count_jobs(JobStatus::Available).unwrap(), 0);
        assert!(pipeline.reconcile_deliveries().is_err());

        jobs.failing.store(false, Ordering::SeqCst);
        assert_eq!(pipeline.reconcile_deliveries().unwrap(), 1);

        let available = jobs.list_available().unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].order_id, order.id);
        assert_eq!(available[0].job_type, JobType::Delivery);

        // Nothing left to repair
        assert_eq!(pipeline.reconcile_deliveries().unwrap(), 0);
        assert_eq!(jobs.count_jobs(JobStatus::Available).unwrap(), 1);
    }

    #[test]
    fn test_reconcile_without_dispatcher_is_noop() {
        let orders: Arc<dyn OrderStore> = Arc::new(SqliteOrderStore::in_memory().unwrap());
        let bypass = Arc::new(BypassEngine::new(Arc::clone(&orders)));
        let pipeline = StationPipeline::new(orders, bypass);
        assert_eq!(pipeline.reconcile_deliveries().unwrap(), 0);
    }
}
