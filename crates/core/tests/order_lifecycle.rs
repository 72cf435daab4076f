//! Order lifecycle integration tests.
//!
//! These tests drive orders through the coordinator against a file-backed
//! database:
//! - Clean round trip from washing to a dispatched delivery
//! - Mismatch, reason, approval and rejection paths
//! - Concurrent submissions for the same order
//! - Audit trail written by the background writer

use std::sync::{Arc, Barrier};
use std::thread;

use tempfile::TempDir;

use workfloor_core::{
    bypass::MIN_REASON_LEN,
    create_audit_system,
    order::OrderFilter,
    testing::fixtures,
    AuditFilter, AuditStore, BypassDecision, BypassStatus, Config, Coordinator, JobStatus,
    JobType, NewOrder, OrderStatus, Principal, ProcessingOutcome, SqliteAuditStore, Station,
    Stores, SubmittedItem, WorkflowError,
};

/// Coordinator over a temporary database.
struct TestHarness {
    coordinator: Coordinator,
    _temp_dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let stores = Stores::open(&temp_dir.path().join("floor.db")).expect("Failed to open stores");
        Self {
            coordinator: Coordinator::new(Config::default(), stores, None),
            _temp_dir: temp_dir,
        }
    }

    fn register(&self, number: &str) -> String {
        self.coordinator
            .pipeline()
            .register_order(fixtures::new_order(number))
            .expect("Failed to register order")
            .id
    }

    fn status_of(&self, order_id: &str) -> OrderStatus {
        self.coordinator
            .pipeline()
            .get_order(order_id)
            .expect("Order should exist")
            .status
    }
}

#[test]
fn test_clean_round_trip_dispatches_delivery() {
    let h = TestHarness::new();
    let order_id = h.register("ORD-100");

    let washer = Principal::worker("wanda", Station::Washing);
    let ironer = Principal::worker("ivan", Station::Ironing);
    let packer = Principal::worker("pat", Station::Packing);

    h.coordinator
        .submit_as(&washer, &order_id, fixtures::matching_items())
        .unwrap();
    assert_eq!(h.status_of(&order_id), OrderStatus::at(Station::Ironing));

    // The washer can no longer touch it
    let err = h
        .coordinator
        .submit_as(&washer, &order_id, fixtures::matching_items())
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidState { .. }));

    h.coordinator
        .submit_as(&ironer, &order_id, fixtures::matching_items())
        .unwrap();
    assert_eq!(h.status_of(&order_id), OrderStatus::at(Station::Packing));

    let packed = h.coordinator.submit_as(&packer, &order_id, vec![]).unwrap();
    let job = match packed {
        ProcessingOutcome::Completed {
            delivery_job: Some(job),
            ..
        } => job,
        other => panic!("expected dispatched completion, got {:?}", other),
    };
    assert_eq!(h.status_of(&order_id), OrderStatus::Completed);

    let dispatcher = h.coordinator.dispatcher();
    let available = dispatcher.list_available().unwrap();
    assert_eq!(available.len(), 1);
    assert_eq!(available[0].id, job.id);
    assert_eq!(available[0].job_type, JobType::Delivery);
    assert_eq!(available[0].order_number, "ORD-100");

    dispatcher.accept(&job.id, "dave").unwrap();
    dispatcher.complete(&job.id, "dave").unwrap();
    let history: Vec<_> = dispatcher
        .history("dave")
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, JobStatus::Completed);
}

#[test]
fn test_mismatch_approval_path() {
    let h = TestHarness::new();
    let order = h
        .coordinator
        .pipeline()
        .register_order(NewOrder::new("ORD-A").with_item("A", "Duvet", 4))
        .unwrap();

    let outcome = h
        .coordinator
        .pipeline()
        .submit_processing(&order.id, vec![SubmittedItem::new("A", 5)])
        .unwrap();
    let bypass = match outcome {
        ProcessingOutcome::Mismatch { bypass, .. } => bypass,
        other => panic!("expected mismatch, got {:?}", other),
    };
    assert_eq!(h.status_of(&order.id), OrderStatus::OnHold);
    assert_eq!(bypass.discrepancies.len(), 1);
    assert_eq!(bypass.discrepancies[0].item_id, "A");
    assert_eq!(bypass.discrepancies[0].expected, 4);
    assert_eq!(bypass.discrepancies[0].actual, 5);
    assert_eq!(bypass.status, BypassStatus::Pending);

    // Held orders stay on the washing board, locked
    let board = h.coordinator.pipeline().station_feed(Station::Washing).unwrap();
    assert_eq!(board.len(), 1);
    assert!(board[0].locked);

    let engine = h.coordinator.bypass();
    let short = "x".repeat(MIN_REASON_LEN - 1);
    assert!(matches!(
        engine.submit_reason(&bypass.id, &short),
        Err(WorkflowError::ReasonTooShort { .. })
    ));
    engine
        .submit_reason(&bypass.id, "customer added one duvet")
        .unwrap();
    assert_eq!(engine.pending().unwrap().len(), 1);

    let resolution = engine
        .resolve(&bypass.id, BypassDecision::Approve, "supervisor")
        .unwrap();
    assert_eq!(resolution.order.status, OrderStatus::at(Station::Ironing));
    assert_eq!(resolution.order.item("A").unwrap().expected_qty, 5);

    let again = engine.resolve(&bypass.id, BypassDecision::Approve, "supervisor");
    assert!(matches!(again, Err(WorkflowError::AlreadyResolved(_))));
    assert_eq!(
        h.coordinator
            .pipeline()
            .get_order(&order.id)
            .unwrap()
            .version,
        resolution.order.version
    );

    // Ironing now expects five
    let ironed = h
        .coordinator
        .pipeline()
        .submit_processing(&order.id, vec![SubmittedItem::new("A", 5)])
        .unwrap();
    assert!(matches!(ironed, ProcessingOutcome::Advanced { .. }));
}

#[test]
fn test_rejection_then_reinstatement() {
    let h = TestHarness::new();
    let order_id = h.register("ORD-R");
    let pipeline = h.coordinator.pipeline();
    let engine = h.coordinator.bypass();

    let outcome = pipeline
        .submit_processing(&order_id, vec![SubmittedItem::new("towel", 1)])
        .unwrap();
    let bypass_id = match outcome {
        ProcessingOutcome::Mismatch { bypass, .. } => bypass.id,
        other => panic!("expected mismatch, got {:?}", other),
    };

    engine
        .resolve(&bypass_id, BypassDecision::Reject, "supervisor")
        .unwrap();
    assert_eq!(h.status_of(&order_id), OrderStatus::OnHold);
    assert!(matches!(
        pipeline.submit_processing(&order_id, fixtures::matching_items()),
        Err(WorkflowError::InvalidState { .. })
    ));

    engine.reinstate(&order_id, "supervisor").unwrap();
    assert_eq!(h.status_of(&order_id), OrderStatus::at(Station::Washing));

    pipeline
        .submit_processing(&order_id, fixtures::matching_items())
        .unwrap();
    assert_eq!(h.status_of(&order_id), OrderStatus::at(Station::Ironing));

    let history = engine.for_order(&order_id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, BypassStatus::Rejected);
}

#[test]
fn test_concurrent_submissions_only_one_wins() {
    let h = TestHarness::new();
    let order_id = h.register("ORD-RACE");
    let coordinator = Arc::new(h.coordinator);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let coordinator = Arc::clone(&coordinator);
            let order_id = order_id.clone();
            thread::spawn(move || {
                coordinator.pipeline().submit_processing_at(
                    Station::Washing,
                    &format!("w{}", i),
                    &order_id,
                    fixtures::matching_items(),
                )
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(result, Err(WorkflowError::InvalidState { .. })));
    }

    let order = coordinator.pipeline().get_order(&order_id).unwrap();
    assert_eq!(order.status, OrderStatus::at(Station::Ironing));
    assert_eq!(order.version, 1);
}

#[test]
fn test_concurrent_mismatches_only_one_holds() {
    let h = TestHarness::new();
    let order_id = h.register("ORD-HOLD");
    let coordinator = Arc::new(h.coordinator);
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let coordinator = Arc::clone(&coordinator);
            let barrier = Arc::clone(&barrier);
            let order_id = order_id.clone();
            thread::spawn(move || {
                barrier.wait();
                coordinator.pipeline().submit_processing_at(
                    Station::Washing,
                    &format!("w{}", i),
                    &order_id,
                    vec![SubmittedItem::new("shirt", 3)],
                )
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let held = results
        .iter()
        .filter(|r| matches!(r, Ok(ProcessingOutcome::Mismatch { .. })))
        .count();
    assert_eq!(held, 1);
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(result, Err(WorkflowError::InvalidState { .. })));
    }

    let requests = coordinator.bypass().for_order(&order_id).unwrap();
    assert_eq!(requests.len(), 1);
    let order = coordinator.pipeline().get_order(&order_id).unwrap();
    assert_eq!(order.status, OrderStatus::OnHold);
    assert_eq!(order.version, 1);
}

#[test]
fn test_duplicate_order_number_is_rejected() {
    let h = TestHarness::new();
    h.register("ORD-DUP");

    let err = h
        .coordinator
        .pipeline()
        .register_order(fixtures::new_order("ORD-DUP"))
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_request");
    assert!(!err.is_retryable());
}

#[test]
fn test_status_only_takes_known_values() {
    let h = TestHarness::new();
    let ids: Vec<_> = (0..4).map(|i| h.register(&format!("ORD-{}", i))).collect();
    let pipeline = h.coordinator.pipeline();

    pipeline
        .submit_processing(&ids[0], fixtures::matching_items())
        .unwrap();
    pipeline
        .submit_processing(&ids[1], vec![SubmittedItem::new("shirt", 2)])
        .unwrap();
    for _ in 0..3 {
        pipeline
            .submit_processing(&ids[2], fixtures::matching_items())
            .unwrap();
    }

    let orders = h
        .coordinator
        .stores()
        .orders
        .list_orders(&OrderFilter::new())
        .unwrap();
    assert_eq!(orders.len(), 4);
    for order in orders {
        assert!(matches!(
            order.status,
            OrderStatus::AtStation { .. } | OrderStatus::OnHold | OrderStatus::Completed
        ));
    }

    let status = h.coordinator.status().unwrap();
    assert_eq!(status.at_washing, 1);
    assert_eq!(status.at_ironing, 1);
    assert_eq!(status.on_hold, 1);
    assert_eq!(status.completed, 1);
    assert_eq!(status.available_jobs, 1);
}

#[tokio::test]
async fn test_transitions_are_audited() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("floor.db");

    let audit_store: Arc<dyn AuditStore> = Arc::new(SqliteAuditStore::new(&path).unwrap());
    let (audit, writer) = create_audit_system(Arc::clone(&audit_store), 64);
    let writer_handle = tokio::spawn(writer.run());

    let coordinator = Coordinator::new(
        Config::default(),
        Stores::open(&path).unwrap(),
        Some(audit.clone()),
    );
    let order = coordinator
        .pipeline()
        .register_order(fixtures::new_order("ORD-AUD"))
        .unwrap();
    let outcome = coordinator
        .pipeline()
        .submit_processing(&order.id, vec![SubmittedItem::new("shirt", 3)])
        .unwrap();
    let bypass = match outcome {
        ProcessingOutcome::Mismatch { bypass, .. } => bypass,
        other => panic!("expected mismatch, got {:?}", other),
    };
    coordinator
        .bypass()
        .resolve(&bypass.id, BypassDecision::Approve, "supervisor")
        .unwrap();

    drop(coordinator);
    drop(audit);
    writer_handle.await.unwrap();

    let records = audit_store
        .query(&AuditFilter::new().with_order_id(order.id.clone()))
        .unwrap();
    let types: Vec<_> = records.iter().map(|r| r.event_type.as_str()).collect();
    assert!(types.contains(&"order_registered"));
    assert!(types.contains(&"bypass_opened"));
    assert!(types.contains(&"bypass_resolved"));
}
