//! Wires the workflow components together from configuration.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::audit::AuditHandle;
use crate::bypass::BypassEngine;
use crate::config::{Config, SanitizedConfig};
use crate::dispatch::{Dispatcher, JobStatus, JobStore, SqliteJobStore};
use crate::error::WorkflowError;
use crate::identity::{Principal, RoleStationPolicy, StationResolver};
use crate::notify::{
    Deduplicator, FeedSupplier, NotificationPoller, NotificationStore, SqliteNotificationStore,
    StationFeed, Watcher,
};
use crate::order::{
    OrderFilter, OrderStore, SqliteOrderStore, Station, StationFeedEntry, SubmittedItem,
};
use crate::pipeline::{ProcessingOutcome, ProcessingRequest, StationPipeline};

/// Storage collaborators used by the coordinator.
#[derive(Clone)]
pub struct Stores {
    pub orders: Arc<dyn OrderStore>,
    pub jobs: Arc<dyn JobStore>,
    pub notifications: Arc<dyn NotificationStore>,
}

impl Stores {
    /// Open all stores on one SQLite database file.
    pub fn open(path: &Path) -> Result<Self, WorkflowError> {
        Ok(Self {
            orders: Arc::new(SqliteOrderStore::new(path)?),
            jobs: Arc::new(SqliteJobStore::new(path)?),
            notifications: Arc::new(SqliteNotificationStore::new(path)?),
        })
    }

    /// In-memory stores (useful for testing).
    pub fn in_memory() -> Result<Self, WorkflowError> {
        Ok(Self {
            orders: Arc::new(SqliteOrderStore::in_memory()?),
            jobs: Arc::new(SqliteJobStore::in_memory()?),
            notifications: Arc::new(SqliteNotificationStore::in_memory()?),
        })
    }
}

/// Snapshot of the floor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStatus {
    pub at_washing: i64,
    pub at_ironing: i64,
    pub at_packing: i64,
    pub on_hold: i64,
    pub completed: i64,
    pub pending_bypasses: i64,
    pub available_jobs: i64,
    pub assigned_jobs: i64,
}

/// The station and job workflow, assembled.
pub struct Coordinator {
    config: Config,
    stores: Stores,
    resolver: Arc<dyn StationResolver>,
    bypass: Arc<BypassEngine>,
    dispatcher: Arc<Dispatcher>,
    pipeline: StationPipeline,
    notifications: Arc<Deduplicator>,
}

impl Coordinator {
    pub fn new(config: Config, stores: Stores, audit: Option<AuditHandle>) -> Self {
        let resolver: Arc<dyn StationResolver> =
            Arc::new(RoleStationPolicy::new(config.identity.admin_station));

        let mut bypass = BypassEngine::new(Arc::clone(&stores.orders));
        let mut dispatcher = Dispatcher::new(Arc::clone(&stores.jobs))
            .with_history_page_size(config.workflow.history_page_size);
        let mut notifications = Deduplicator::new(Arc::clone(&stores.notifications));
        if let Some(ref audit) = audit {
            bypass = bypass.with_audit(audit.clone());
            dispatcher = dispatcher.with_audit(audit.clone());
            notifications = notifications.with_audit(audit.clone());
        }
        let bypass = Arc::new(bypass);
        let dispatcher = Arc::new(dispatcher);

        let mut pipeline = StationPipeline::new(Arc::clone(&stores.orders), Arc::clone(&bypass));
        if config.workflow.auto_dispatch_delivery {
            pipeline = pipeline.with_dispatcher(Arc::clone(&dispatcher));
        }
        if let Some(audit) = audit {
            pipeline = pipeline.with_audit(audit);
        }

        Self {
            config,
            stores,
            resolver,
            bypass,
            dispatcher,
            pipeline,
            notifications: Arc::new(notifications),
        }
    }

    /// Replace the station policy. Must be called before building a poller.
    pub fn with_resolver(mut self, resolver: Arc<dyn StationResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn pipeline(&self) -> &StationPipeline {
        &self.pipeline
    }

    pub fn bypass(&self) -> &BypassEngine {
        &self.bypass
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn notifications(&self) -> &Deduplicator {
        &self.notifications
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    /// The station whose work `principal` sees.
    pub fn station_for(&self, principal: &Principal) -> Option<Station> {
        self.resolver.station_for(principal)
    }

    /// The board of the principal's station.
    pub fn feed_for(&self, principal: &Principal) -> Result<Vec<StationFeedEntry>, WorkflowError> {
        let station = self.require_station(principal)?;
        self.pipeline.station_feed(station)
    }

    /// Process an order at the principal's station.
    pub fn submit_as(
        &self,
        principal: &Principal,
        order_id: &str,
        items: Vec<SubmittedItem>,
    ) -> Result<ProcessingOutcome, WorkflowError> {
        let station = self.require_station(principal)?;
        self.pipeline.submit(
            ProcessingRequest::new(order_id, items)
                .at_station(station)
                .by_worker(principal.user_id.clone()),
        )
    }

    fn require_station(&self, principal: &Principal) -> Result<Station, WorkflowError> {
        self.resolver.station_for(principal).ok_or_else(|| {
            WorkflowError::InvalidRequest(format!(
                "{} {} has no station",
                principal.role.as_str(),
                principal.user_id
            ))
        })
    }

    /// Poller over the configured watchers, reading the order store's
    /// station boards.
    pub fn notification_poller(&self) -> NotificationPoller {
        self.notification_poller_with(Arc::new(StationFeed::new(Arc::clone(&self.stores.orders))))
    }

    pub fn notification_poller_with(&self, feed: Arc<dyn FeedSupplier>) -> NotificationPoller {
        let watchers = Watcher::resolve_all(&self.config.notifier.watchers, self.resolver.as_ref());
        NotificationPoller::new(
            feed,
            Arc::clone(&self.notifications),
            watchers,
            Duration::from_millis(self.config.notifier.poll_interval_ms),
        )
    }

    /// Open delivery jobs missing for completed orders. A no-op when
    /// delivery dispatch is disabled.
    pub fn reconcile_deliveries(&self) -> Result<usize, WorkflowError> {
        self.pipeline.reconcile_deliveries()
    }

    pub fn status(&self) -> Result<CoordinatorStatus, WorkflowError> {
        let orders = &self.stores.orders;
        let at = |station: Station| {
            orders.count_orders(&OrderFilter::new().with_status("at_station").with_station(station))
        };

        Ok(CoordinatorStatus {
            at_washing: at(Station::Washing)?,
            at_ironing: at(Station::Ironing)?,
            at_packing: at(Station::Packing)?,
            on_hold: orders.count_orders(&OrderFilter::new().with_status("on_hold"))?,
            completed: orders.count_orders(&OrderFilter::new().with_status("completed"))?,
            pending_bypasses: self.bypass.pending()?.len() as i64,
            available_jobs: self.stores.jobs.count_jobs(JobStatus::Available)?,
            assigned_jobs: self.stores.jobs.count_jobs(JobStatus::Assigned)?,
        })
    }
}
