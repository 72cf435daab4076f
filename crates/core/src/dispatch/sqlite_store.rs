//! SQLite-backed job store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::db;
use crate::error::WorkflowError;

use super::{DriverJob, JobStatus, JobStore, NewJob};

const JOB_COLUMNS: &str = "id, order_id, order_number, job_type, status, assigned_driver, created_at, assigned_at, completed_at";

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Create a new SQLite job store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, WorkflowError> {
        let conn = db::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite job store (useful for testing).
    pub fn in_memory() -> Result<Self, WorkflowError> {
        let conn = db::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), WorkflowError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS driver_jobs (
                id TEXT PRIMARY KEY,
                order_id TEXT NOT NULL,
                order_number TEXT NOT NULL,
                job_type TEXT NOT NULL,
                status TEXT NOT NULL,
                assigned_driver TEXT,
                created_at TEXT NOT NULL,
                assigned_at TEXT,
                completed_at TEXT,
                UNIQUE(order_id, job_type)
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_driver_jobs_one_active
                ON driver_jobs(assigned_driver) WHERE status = 'assigned';
            CREATE INDEX IF NOT EXISTS idx_driver_jobs_status
                ON driver_jobs(status, created_at);
            CREATE INDEX IF NOT EXISTS idx_driver_jobs_history
                ON driver_jobs(assigned_driver, status, completed_at);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, WorkflowError> {
        self.conn
            .lock()
            .map_err(|_| WorkflowError::Database("job store lock poisoned".to_string()))
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<DriverJob> {
        let job_type: String = row.get(3)?;
        let status: String = row.get(4)?;
        let created_at: String = row.get(6)?;

        Ok(DriverJob {
            id: row.get(0)?,
            order_id: row.get(1)?,
            order_number: row.get(2)?,
            job_type: db::text_column(3, &job_type)?,
            status: db::text_column(4, &status)?,
            assigned_driver: row.get(5)?,
            created_at: db::time_column(6, &created_at)?,
            assigned_at: db::opt_time_column(7, row.get(7)?)?,
            completed_at: db::opt_time_column(8, row.get(8)?)?,
        })
    }

    fn load_job(conn: &Connection, id: &str) -> Result<Option<DriverJob>, WorkflowError> {
        let sql = format!("SELECT {} FROM driver_jobs WHERE id = ?", JOB_COLUMNS);
        Ok(conn.query_row(&sql, params![id], Self::row_to_job).optional()?)
    }

    fn load_active(conn: &Connection, driver_id: &str) -> Result<Option<DriverJob>, WorkflowError> {
        let sql = format!(
            "SELECT {} FROM driver_jobs WHERE assigned_driver = ? AND status = 'assigned'",
            JOB_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![driver_id], Self::row_to_job)
            .optional()?)
    }

    fn collect_jobs(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<DriverJob>, WorkflowError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, Self::row_to_job)?;

        let mut jobs = Vec::new();
        for row_result in rows {
            jobs.push(row_result?);
        }
        Ok(jobs)
    }
}

impl JobStore for SqliteJobStore {
    fn open_job(
        &self,
        request: &NewJob,
        at: DateTime<Utc>,
    ) -> Result<(DriverJob, bool), WorkflowError> {
        let conn = self.conn()?;
        let job = DriverJob::open(request, at);

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO driver_jobs (id, order_id, order_number, job_type, status, assigned_driver, created_at, assigned_at, completed_at) VALUES (?, ?, ?, ?, ?, NULL, ?, NULL, NULL)",
            params![
                job.id,
                job.order_id,
                job.order_number,
                job.job_type.as_str(),
                job.status.as_str(),
                db::timestamp(&job.created_at),
            ],
        )?;

        if inserted == 1 {
            return Ok((job, true));
        }

        let sql = format!(
            "SELECT {} FROM driver_jobs WHERE order_id = ? AND job_type = ?",
            JOB_COLUMNS
        );
        let existing = conn.query_row(
            &sql,
            params![request.order_id, request.job_type.as_str()],
            Self::row_to_job,
        )?;
        Ok((existing, false))
    }

    fn get_job(&self, id: &str) -> Result<Option<DriverJob>, WorkflowError> {
        let conn = self.conn()?;
        Self::load_job(&conn, id)
    }

    fn list_available(&self) -> Result<Vec<DriverJob>, WorkflowError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM driver_jobs WHERE status = 'available' ORDER BY created_at ASC, rowid ASC",
            JOB_COLUMNS
        );
        Self::collect_jobs(&conn, &sql, params![])
    }

    fn active_for_driver(&self, driver_id: &str) -> Result<Option<DriverJob>, WorkflowError> {
        let conn = self.conn()?;
        Self::load_active(&conn, driver_id)
    }

    fn assign(
        &self,
        job_id: &str,
        driver_id: &str,
        at: DateTime<Utc>,
    ) -> Result<DriverJob, WorkflowError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut job =
            Self::load_job(&tx, job_id)?.ok_or_else(|| WorkflowError::UnknownJob(job_id.to_string()))?;

        if job.status == JobStatus::Available {
            if let Some(active) = Self::load_active(&tx, driver_id)? {
                return Err(WorkflowError::DriverBusy {
                    driver_id: driver_id.to_string(),
                    active_job_id: active.id,
                });
            }
        }
        job.accept(driver_id, at)?;

        let changed = tx.execute(
            "UPDATE driver_jobs SET status = 'assigned', assigned_driver = ?, assigned_at = ? WHERE id = ? AND status = 'available'",
            params![driver_id, db::timestamp(&at), job_id],
        )?;
        if changed == 0 {
            return Err(WorkflowError::invalid_state(
                "job",
                job_id,
                "assigned",
                "accept",
            ));
        }

        tx.commit()?;
        Ok(job)
    }

    fn complete(
        &self,
        job_id: &str,
        driver_id: &str,
        at: DateTime<Utc>,
    ) -> Result<DriverJob, WorkflowError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut job =
            Self::load_job(&tx, job_id)?.ok_or_else(|| WorkflowError::UnknownJob(job_id.to_string()))?;
        job.complete(driver_id, at)?;

        tx.execute(
            "UPDATE driver_jobs SET status = 'completed', completed_at = ? WHERE id = ? AND status = 'assigned' AND assigned_driver = ?",
            params![db::timestamp(&at), job_id, driver_id],
        )?;

        tx.commit()?;
        Ok(job)
    }

    fn completed_page(
        &self,
        driver_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DriverJob>, WorkflowError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM driver_jobs WHERE assigned_driver = ? AND status = 'completed' ORDER BY completed_at DESC, rowid DESC LIMIT ? OFFSET ?",
            JOB_COLUMNS
        );
        Self::collect_jobs(&conn, &sql, params![driver_id, limit, offset])
    }

    fn count_jobs(&self, status: JobStatus) -> Result<i64, WorkflowError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM driver_jobs WHERE status = ?",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
