pub mod audit;
pub mod bypass;
pub mod config;
pub mod coordinator;
mod db;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod notify;
pub mod order;
pub mod pipeline;
pub mod testing;

pub use audit::{
    create_audit_system, AuditError, AuditEvent, AuditEventEnvelope, AuditFilter, AuditHandle,
    AuditRecord, AuditStore, AuditWriter, SqliteAuditStore,
};
pub use bypass::{BypassDecision, BypassEngine, BypassRequest, BypassStatus, Discrepancy, Resolution};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use coordinator::{Coordinator, CoordinatorStatus, Stores};
pub use dispatch::{Dispatcher, DriverHistory, DriverJob, JobStatus, JobStore, JobType, SqliteJobStore};
pub use error::WorkflowError;
pub use identity::{Principal, Role, RoleStationPolicy, StationResolver};
pub use notify::{
    Deduplicator, FeedEntry, FeedSupplier, NotificationPoller, NotificationRecord,
    NotificationStore, Observation, SqliteNotificationStore, StationFeed,
};
pub use order::{
    NewOrder, Order, OrderStatus, OrderStore, SqliteOrderStore, Station, SubmittedItem,
};
pub use pipeline::{ProcessingOutcome, ProcessingRequest, StationPipeline};
