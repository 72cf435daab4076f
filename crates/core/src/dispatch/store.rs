//! Job storage trait.

use chrono::{DateTime, Utc};

use crate::error::WorkflowError;

use super::{DriverJob, JobStatus, NewJob};

/// Storage collaborator for the job pool.
///
/// `assign` and `complete` re-validate the job inside one transaction; the
/// in-memory check done by the caller is advisory only.
pub trait JobStore: Send + Sync {
    /// Add a job unless one already exists for the same order and type.
    ///
    /// Returns the stored job and whether it was created by this call.
    fn open_job(
        &self,
        request: &NewJob,
        at: DateTime<Utc>,
    ) -> Result<(DriverJob, bool), WorkflowError>;

    fn get_job(&self, id: &str) -> Result<Option<DriverJob>, WorkflowError>;

    /// Available jobs, oldest first.
    fn list_available(&self) -> Result<Vec<DriverJob>, WorkflowError>;

    /// The driver's assigned job, if any.
    fn active_for_driver(&self, driver_id: &str) -> Result<Option<DriverJob>, WorkflowError>;

    /// Assign an available job to an idle driver.
    ///
    /// Fails with `InvalidState` if the job is no longer available and with
    /// `DriverBusy` if the driver already holds an assigned job.
    fn assign(
        &self,
        job_id: &str,
        driver_id: &str,
        at: DateTime<Utc>,
    ) -> Result<DriverJob, WorkflowError>;

    /// Fails with `NotOwner` unless the job is assigned to `driver_id`.
    fn complete(
        &self,
        job_id: &str,
        driver_id: &str,
        at: DateTime<Utc>,
    ) -> Result<DriverJob, WorkflowError>;

    /// The driver's completed jobs, most recently completed first.
    fn completed_page(
        &self,
        driver_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DriverJob>, WorkflowError>;

    fn count_jobs(&self, status: JobStatus) -> Result<i64, WorkflowError>;
}
