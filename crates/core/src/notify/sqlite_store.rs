//! SQLite-backed notification store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::db;
use crate::error::WorkflowError;

use super::{FeedEntry, NotificationRecord, NotificationStore};

const NOTIFICATION_COLUMNS: &str = "id, viewer_id, order_id, order_number, created_at, read";

/// SQLite-backed notification store.
pub struct SqliteNotificationStore {
    conn: Mutex<Connection>,
}

impl SqliteNotificationStore {
    /// Create a new SQLite notification store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, WorkflowError> {
        let conn = db::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite notification store (useful for testing).
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
            CREATE TABLE IF NOT EXISTS seen_orders (
                viewer_id TEXT NOT NULL,
                order_id TEXT NOT NULL,
                first_seen_at TEXT NOT NULL,
                PRIMARY KEY (viewer_id, order_id)
            );

            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                viewer_id TEXT NOT NULL,
                order_id TEXT NOT NULL,
                order_number TEXT NOT NULL,
                created_at TEXT NOT NULL,
                read INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_notifications_viewer
                ON notifications(viewer_id, created_at);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, WorkflowError> {
        self.conn
            .lock()
            .map_err(|_| WorkflowError::Database("notification store lock poisoned".to_string()))
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<NotificationRecord> {
        let created_at: String = row.get(4)?;
        Ok(NotificationRecord {
            id: row.get(0)?,
            viewer_id: row.get(1)?,
            order_id: row.get(2)?,
            order_number: row.get(3)?,
            created_at: db::time_column(4, &created_at)?,
            read: row.get(5)?,
        })
    }

    fn load(
        conn: &Connection,
        viewer_id: &str,
        notification_id: &str,
    ) -> Result<Option<NotificationRecord>, WorkflowError> {
        let sql = format!(
            "SELECT {} FROM notifications WHERE id = ? AND viewer_id = ?",
            NOTIFICATION_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![notification_id, viewer_id], Self::row_to_record)
            .optional()?)
    }
}

impl NotificationStore for SqliteNotificationStore {
    fn record_observations(
        &self,
        viewer_id: &str,
        feed: &[FeedEntry],
        at: DateTime<Utc>,
    ) -> Result<Vec<NotificationRecord>, WorkflowError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let stamp = db::timestamp(&at);

        let mut created = Vec::new();
        {
            let mut mark_seen = tx.prepare(
                "INSERT OR IGNORE INTO seen_orders (viewer_id, order_id, first_seen_at) VALUES (?, ?, ?)",
            )?;
            let mut insert = tx.prepare(
                "INSERT INTO notifications (id, viewer_id, order_id, order_number, created_at, read) VALUES (?, ?, ?, ?, ?, 0)",
            )?;

            for entry in feed {
                // Zero rows means the order was already seen, possibly earlier in this feed
                if mark_seen.execute(params![viewer_id, entry.order_id, stamp])? == 0 {
                    continue;
                }

                let record = NotificationRecord {
                    id: uuid::Uuid::new_v4().to_string(),
                    viewer_id: viewer_id.to_string(),
                    order_id: entry.order_id.clone(),
                    order_number: entry.order_number.clone(),
                    created_at: at,
                    read: false,
                };
                insert.execute(params![
                    record.id,
                    record.viewer_id,
                    record.order_id,
                    record.order_number,
                    stamp,
                ])?;
                created.push(record);
            }
        }

        tx.commit()?;
        Ok(created)
    }

    fn list(&self, viewer_id: &str) -> Result<Vec<NotificationRecord>, WorkflowError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM notifications WHERE viewer_id = ? ORDER BY created_at DESC, rowid DESC",
            NOTIFICATION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![viewer_id], Self::row_to_record)?;

        let mut records = Vec::new();
        for row_result in rows {
            records.push(row_result?);
        }
        Ok(records)
    }

    fn unread_count(&self, viewer_id: &str) -> Result<i64, WorkflowError> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE viewer_id = ? AND read = 0",
            params![viewer_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn mark_read(
        &self,
        viewer_id: &str,
        notification_id: &str,
    ) -> Result<NotificationRecord, WorkflowError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE notifications SET read = 1 WHERE id = ? AND viewer_id = ?",
            params![notification_id, viewer_id],
        )?;
        Self::load(&conn, viewer_id, notification_id)?
            .ok_or_else(|| WorkflowError::UnknownNotification(notification_id.to_string()))
    }

    fn clear_all(&self, viewer_id: &str) -> Result<usize, WorkflowError> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM notifications WHERE viewer_id = ?",
            params![viewer_id],
        )?;
        Ok(deleted)
    }

    fn has_seen(&self, viewer_id: &str, order_id: &str) -> Result<bool, WorkflowError> {
        let conn = self.conn()?;
        let seen: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM seen_orders WHERE viewer_id = ? AND order_id = ?",
                params![viewer_id, order_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(seen.is_some())
    }
}
