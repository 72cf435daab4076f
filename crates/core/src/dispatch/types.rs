//! Driver job types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ParseEnumError, WorkflowError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Pickup,
    Delivery,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Pickup => "pickup",
            JobType::Delivery => "delivery",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pickup" => Ok(JobType::Pickup),
            "delivery" => Ok(JobType::Delivery),
            _ => Err(ParseEnumError::new("job type", s)),
        }
    }
}

/// `Available → Assigned → Completed`. No other transition exists.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Available,
    Assigned,
    Completed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Available => "available",
            JobStatus::Assigned => "assigned",
            JobStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(JobStatus::Available),
            "assigned" => Ok(JobStatus::Assigned),
            "completed" => Ok(JobStatus::Completed),
            _ => Err(ParseEnumError::new("job status", s)),
        }
    }
}

/// A pickup or delivery for one order.
///
/// References its order by id only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DriverJob {
    pub id: String,
    pub order_id: String,
    pub order_number: String,
    pub job_type: JobType,
    pub status: JobStatus,
    /// Set from acceptance onwards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_driver: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl DriverJob {
    pub(crate) fn open(request: &NewJob, at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            order_id: request.order_id.clone(),
            order_number: request.order_number.clone(),
            job_type: request.job_type,
            status: JobStatus::Available,
            assigned_driver: None,
            created_at: at,
            assigned_at: None,
            completed_at: None,
        }
    }

    pub fn is_assigned_to(&self, driver_id: &str) -> bool {
        self.status == JobStatus::Assigned && self.assigned_driver.as_deref() == Some(driver_id)
    }

    pub(crate) fn accept(
        &mut self,
        driver_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), WorkflowError> {
        if self.status != JobStatus::Available {
            return Err(WorkflowError::invalid_state(
                "job",
                &self.id,
                self.status.as_str(),
                "accept",
            ));
        }
        self.status = JobStatus::Assigned;
        self.assigned_driver = Some(driver_id.to_string());
        self.assigned_at = Some(at);
        Ok(())
    }

    pub(crate) fn complete(
        &mut self,
        driver_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), WorkflowError> {
        if !self.is_assigned_to(driver_id) {
            return Err(WorkflowError::NotOwner {
                job_id: self.id.clone(),
                driver_id: driver_id.to_string(),
            });
        }
        self.status = JobStatus::Completed;
        self.completed_at = Some(at);
        Ok(())
    }
}

/// Request to add a job to the pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewJob {
    pub order_id: String,
    pub order_number: String,
    pub job_type: JobType,
}

impl NewJob {
    pub fn new(
        order_id: impl Into<String>,
        order_number: impl Into<String>,
        job_type: JobType,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            order_number: order_number.into(),
            job_type,
        }
    }
}
