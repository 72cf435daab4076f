//! Driver job pool with single-active-job exclusivity.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::audit::{AuditEvent, AuditHandle};
use crate::error::WorkflowError;
use crate::metrics;

use super::{DriverJob, JobStore, JobType, NewJob};

const DEFAULT_HISTORY_PAGE_SIZE: i64 = 20;

/// Offers pickup and delivery jobs to drivers.
pub struct Dispatcher {
    jobs: Arc<dyn JobStore>,
    audit: Option<AuditHandle>,
    history_page_size: i64,
}

impl Dispatcher {
    pub fn new(jobs: Arc<dyn JobStore>) -> Self {
        Self {
            jobs,
            audit: None,
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
        }
    }

    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Jobs fetched per store round trip while iterating a history.
    pub fn with_history_page_size(mut self, page_size: i64) -> Self {
        self.history_page_size = page_size.max(1);
        self
    }

    fn emit(&self, event: AuditEvent) {
        if let Some(ref audit) = self.audit {
            audit.try_emit(event);
        }
    }

    /// Put a job for the order into the pool. Opening the same (order, type)
    /// twice returns the existing job.
    pub fn open_job(
        &self,
        order_id: &str,
        order_number: &str,
        job_type: JobType,
    ) -> Result<DriverJob, WorkflowError> {
        self.ensure_job(order_id, order_number, job_type).map(|(job, _)| job)
    }

    /// Like [`open_job`](Self::open_job), also reporting whether the job was
    /// created by this call.
    pub(crate) fn ensure_job(
        &self,
        order_id: &str,
        order_number: &str,
        job_type: JobType,
    ) -> Result<(DriverJob, bool), WorkflowError> {
        let request = NewJob::new(order_id, order_number, job_type);
        let (job, created) = self.jobs.open_job(&request, Utc::now())?;

        if created {
            info!(job_id = %job.id, order_id, job_type = %job_type, "Job opened");
            self.emit(AuditEvent::JobOpened {
                job_id: job.id.clone(),
                order_id: job.order_id.clone(),
                job_type: job_type.as_str().to_string(),
            });
        } else {
            debug!(job_id = %job.id, order_id, job_type = %job_type, "Job already open");
        }

        Ok((job, created))
    }

    pub fn get(&self, job_id: &str) -> Result<DriverJob, WorkflowError> {
        self.jobs
            .get_job(job_id)?
            .ok_or_else(|| WorkflowError::UnknownJob(job_id.to_string()))
    }

    /// Available jobs, oldest first.
    pub fn list_available(&self) -> Result<Vec<DriverJob>, WorkflowError> {
        self.jobs.list_available()
    }

    /// The pool as shown to one driver.
    ///
    /// A driver's active job is assigned and therefore never in the
    /// available pool, so this is the same list as [`list_available`](Self::list_available).
    pub fn available_for(&self, driver_id: &str) -> Result<Vec<DriverJob>, WorkflowError> {
        debug!(driver_id, "Listing available jobs");
        self.jobs.list_available()
    }

    /// The driver's assigned job. `None` means the driver is free.
    pub fn get_active(&self, driver_id: &str) -> Result<Option<DriverJob>, WorkflowError> {
        self.jobs.active_for_driver(driver_id)
    }

    /// Assign an available job to a driver with no active job.
    pub fn accept(&self, job_id: &str, driver_id: &str) -> Result<DriverJob, WorkflowError> {
        let result = self.jobs.assign(job_id, driver_id, Utc::now());

        let label = match &result {
            Ok(_) => "accepted",
            Err(WorkflowError::DriverBusy { .. }) => "driver_busy",
            Err(WorkflowError::InvalidState { .. }) => "taken",
            Err(_) => "error",
        };
        metrics::JOB_ACCEPTS.with_label_values(&[label]).inc();

        let job = match result {
            Ok(job) => job,
            Err(e) => {
                info!(job_id, driver_id, reason = e.kind(), "Job accept refused");
                return Err(e);
            }
        };

        info!(job_id, driver_id, order_id = %job.order_id, "Job accepted");
        self.emit(AuditEvent::JobAccepted {
            job_id: job.id.clone(),
            order_id: job.order_id.clone(),
            driver_id: driver_id.to_string(),
        });

        Ok(job)
    }

    /// Finish the driver's assigned job, freeing the driver.
    pub fn complete(&self, job_id: &str, driver_id: &str) -> Result<DriverJob, WorkflowError> {
        let job = self.jobs.complete(job_id, driver_id, Utc::now())?;

        metrics::JOBS_COMPLETED
            .with_label_values(&[job.job_type.as_str()])
            .inc();
        info!(job_id, driver_id, order_id = %job.order_id, "Job completed");
        self.emit(AuditEvent::JobCompleted {
            job_id: job.id.clone(),
            order_id: job.order_id.clone(),
            driver_id: driver_id.to_string(),
        });

        Ok(job)
    }

    /// The driver's completed jobs, most recent first.
    ///
    /// Nothing is read until the history is iterated.
    pub fn history(&self, driver_id: &str) -> DriverHistory {
        DriverHistory {
            jobs: Arc::clone(&self.jobs),
            driver_id: driver_id.to_string(),
            page_size: self.history_page_size,
        }
    }
}

/// A driver's completed jobs. Every iteration starts again from the most
/// recently completed job.
#[derive(Clone)]
pub struct DriverHistory {
    jobs: Arc<dyn JobStore>,
    driver_id: String,
    page_size: i64,
}

impl DriverHistory {
    pub fn driver_id(&self) -> &str {
        &self.driver_id
    }

    pub fn iter(&self) -> HistoryIter {
        HistoryIter {
            jobs: Arc::clone(&self.jobs),
            driver_id: self.driver_id.clone(),
            page_size: self.page_size,
            offset: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }
}

impl IntoIterator for &DriverHistory {
    type Item = Result<DriverJob, WorkflowError>;
    type IntoIter = HistoryIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for DriverHistory {
    type Item = Result<DriverJob, WorkflowError>;
    type IntoIter = HistoryIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Pages through the store on demand. Stops after the first error.
pub struct HistoryIter {
    jobs: Arc<dyn JobStore>,
    driver_id: String,
    page_size: i64,
    offset: i64,
    buffer: VecDeque<DriverJob>,
    exhausted: bool,
}

impl Iterator for HistoryIter {
    type Item = Result<DriverJob, WorkflowError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            match self
                .jobs
                .completed_page(&self.driver_id, self.page_size, self.offset)
            {
                Ok(page) => {
                    if (page.len() as i64) < self.page_size {
                        self.exhausted = true;
                    }
                    self.offset += page.len() as i64;
                    self.buffer.extend(page);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }

        self.buffer.pop_front().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{DateTime, Utc};

    use crate::dispatch::{JobStatus, SqliteJobStore};

    fn setup() -> Dispatcher {
        Dispatcher::new(Arc::new(SqliteJobStore::in_memory().unwrap()))
    }

    #[test]
    fn test_accept_and_get_active() {
        let dispatcher = setup();
        let job = dispatcher
            .open_job("o1", "ORD-1", JobType::Delivery)
            .unwrap();

        assert!(dispatcher.get_active("d1").unwrap().is_none());
        let accepted = dispatcher.accept(&job.id, "d1").unwrap();
        assert_eq!(accepted.status, JobStatus::Assigned);
        assert_eq!(dispatcher.get_active("d1").unwrap().unwrap().id, job.id);
        assert!(dispatcher.list_available().unwrap().is_empty());
    }

    #[test]
    fn test_second_accept_is_driver_busy() {
        let dispatcher = setup();
        let first = dispatcher.open_job("o1", "ORD-1", JobType::Pickup).unwrap();
        let second = dispatcher
            .open_job("o2", "ORD-2", JobType::Delivery)
            .unwrap();

        dispatcher.accept(&first.id, "d1").unwrap();
        let err = dispatcher.accept(&second.id, "d1").unwrap_err();
        assert!(matches!(err, WorkflowError::DriverBusy { .. }));
        assert_eq!(err.user_message(), "Finish your active job first");

        // Freed after completion
        dispatcher.complete(&first.id, "d1").unwrap();
        dispatcher.accept(&second.id, "d1").unwrap();
    }

    #[test]
    fn test_complete_by_other_driver() {
        let dispatcher = setup();
        let job = dispatcher.open_job("o1", "ORD-1", JobType::Pickup).unwrap();
        dispatcher.accept(&job.id, "d1").unwrap();

        let err = dispatcher.complete(&job.id, "d2").unwrap_err();
        assert!(matches!(err, WorkflowError::NotOwner { .. }));
        assert_eq!(dispatcher.get(&job.id).unwrap().status, JobStatus::Assigned);
    }

    #[test]
    fn test_open_job_twice_returns_same_job() {
        let dispatcher = setup();
        let a = dispatcher
            .open_job("o1", "ORD-1", JobType::Delivery)
            .unwrap();
        let b = dispatcher
            .open_job("o1", "ORD-1", JobType::Delivery)
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(dispatcher.list_available().unwrap().len(), 1);
    }

    #[test]
    fn test_available_for_matches_pool() {
        let dispatcher = setup();
        let first = dispatcher.open_job("o1", "ORD-1", JobType::Pickup).unwrap();
        dispatcher.open_job("o2", "ORD-2", JobType::Pickup).unwrap();
        dispatcher.accept(&first.id, "d1").unwrap();

        let pool = dispatcher.list_available().unwrap();
        let view = dispatcher.available_for("d1").unwrap();
        assert_eq!(pool, view);
        assert_eq!(view.len(), 1);
        assert_eq!(dispatcher.available_for("d2").unwrap(), pool);
    }

    #[test]
    fn test_history_most_recent_first_across_pages() {
        let dispatcher = setup().with_history_page_size(2);
        for i in 0..5 {
            let job = dispatcher
                .open_job(&format!("o{}", i), &format!("ORD-{}", i), JobType::Delivery)
                .unwrap();
            dispatcher.accept(&job.id, "d1").unwrap();
            dispatcher.complete(&job.id, "d1").unwrap();
        }

        let history = dispatcher.history("d1");
        let orders: Vec<String> = history
            .iter()
            .map(|job| job.unwrap().order_id)
            .collect();
        assert_eq!(orders, vec!["o4", "o3", "o2", "o1", "o0"]);

        // Restartable
        let again: Vec<_> = (&history).into_iter().map(|j| j.unwrap().id).collect();
        assert_eq!(again.len(), 5);

        assert_eq!(dispatcher.history("d2").into_iter().count(), 0);
    }

    /// Counts page reads to show the history is lazy.
    struct CountingStore {
        inner: SqliteJobStore,
        pages: AtomicUsize,
    }

    impl JobStore for CountingStore {
        fn open_job(
            &self,
            request: &NewJob,
            at: DateTime<Utc>,
        ) -> Result<(DriverJob, bool), WorkflowError> {
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
            self.pages.fetch_add(1, Ordering::SeqCst);
            self.inner.completed_page(driver_id, limit, offset)
        }
        fn count_jobs(&self, status: JobStatus) -> Result<i64, WorkflowError> {
            self.inner.count_jobs(status)
        }
    }

    #[test]
    fn test_history_reads_lazily() {
        let store = Arc::new(CountingStore {
            inner: SqliteJobStore::in_memory().unwrap(),
            pages: AtomicUsize::new(0),
        });
        let dispatcher =
            Dispatcher::new(Arc::clone(&store) as Arc<dyn JobStore>).with_history_page_size(1);
        for i in 0..3 {
            let job = dispatcher
                .open_job(&format!("o{}", i), "ORD", JobType::Pickup)
                .unwrap();
            dispatcher.accept(&job.id, "d1").unwrap();
            dispatcher.complete(&job.id, "d1").unwrap();
        }

        let history = dispatcher.history("d1");
        assert_eq!(store.pages.load(Ordering::SeqCst), 0);

        let first = history.iter().next().unwrap().unwrap();
        assert_eq!(first.order_id, "o2");
        assert_eq!(store.pages.load(Ordering::SeqCst), 1);
    }
}
