//! SQLite-backed order store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::bypass::{BypassFilter, BypassRequest, BypassStatus};
use crate::db;
use crate::error::WorkflowError;

use super::{
    BypassWrite, LineItem, NewOrder, Order, OrderCommit, OrderFilter, OrderStatus, OrderStore,
    Station, StationFeedEntry, StationLogEntry,
};

const ORDER_COLUMNS: &str =
    "o.id, o.order_number, o.items, o.status, o.bypass_id, o.version, o.created_at, o.updated_at";

const BYPASS_COLUMNS: &str = "id, order_id, station, discrepancies, reason, status, created_at, reason_submitted_at, resolved_at, resolved_by";

/// SQLite-backed order store.
pub struct SqliteOrderStore {
    conn: Mutex<Connection>,
}

impl SqliteOrderStore {
    /// Create a new SQLite order store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, WorkflowError> {
        let conn = db::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite order store (useful for testing).
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
            CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                order_number TEXT NOT NULL UNIQUE,
                items TEXT NOT NULL,
                status TEXT NOT NULL,
                bypass_id TEXT,
                version INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_orders_created_at ON orders(created_at);

            CREATE TABLE IF NOT EXISTS bypass_requests (
                id TEXT PRIMARY KEY,
                order_id TEXT NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
                station TEXT NOT NULL,
                discrepancies TEXT NOT NULL,
                reason TEXT,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                reason_submitted_at TEXT,
                resolved_at TEXT,
                resolved_by TEXT
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_bypass_one_pending
                ON bypass_requests(order_id) WHERE status = 'pending';
            CREATE INDEX IF NOT EXISTS idx_bypass_status ON bypass_requests(status, created_at);

            CREATE TABLE IF NOT EXISTS station_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                order_id TEXT NOT NULL,
                order_number TEXT NOT NULL,
                station TEXT NOT NULL,
                worker_id TEXT,
                outcome TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_station_log_worker ON station_log(worker_id, id);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, WorkflowError> {
        self.conn
            .lock()
            .map_err(|_| WorkflowError::Database("order store lock poisoned".to_string()))
    }

    fn build_where_clause(filter: &OrderFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref status) = filter.status {
            conditions.push("json_extract(o.status, '$.type') = ?");
            params.push(Box::new(status.clone()));
        }

        if let Some(station) = filter.station {
            conditions.push("json_extract(o.status, '$.station') = ?");
            params.push(Box::new(station.as_str()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    /// Maps a row selected with `ORDER_COLUMNS`; the bypass is attached separately.
    fn row_to_order(row: &rusqlite::Row) -> rusqlite::Result<(Order, Option<String>)> {
        let id: String = row.get(0)?;
        let order_number: String = row.get(1)?;
        let items_json: String = row.get(2)?;
        let status_json: String = row.get(3)?;
        let bypass_id: Option<String> = row.get(4)?;
        let version: i64 = row.get(5)?;
        let created_at_str: String = row.get(6)?;
        let updated_at_str: String = row.get(7)?;

        let items: Vec<LineItem> = db::json_column(2, &items_json)?;
        let status: OrderStatus = db::json_column(3, &status_json)?;

        let order = Order {
            id,
            order_number,
            items,
            status,
            bypass: None,
            version: version as u64,
            created_at: db::time_column(6, &created_at_str)?,
            updated_at: db::time_column(7, &updated_at_str)?,
        };
        Ok((order, bypass_id))
    }

    fn row_to_bypass(row: &rusqlite::Row) -> rusqlite::Result<BypassRequest> {
        let station: String = row.get(2)?;
        let discrepancies: String = row.get(3)?;
        let status: String = row.get(5)?;
        let created_at: String = row.get(6)?;

        Ok(BypassRequest {
            id: row.get(0)?,
            order_id: row.get(1)?,
            station: db::text_column(2, &station)?,
            discrepancies: db::json_column(3, &discrepancies)?,
            reason: row.get(4)?,
            status: db::text_column(5, &status)?,
            created_at: db::time_column(6, &created_at)?,
            reason_submitted_at: db::opt_time_column(7, row.get(7)?)?,
            resolved_at: db::opt_time_column(8, row.get(8)?)?,
            resolved_by: row.get(9)?,
        })
    }

    fn row_to_log_entry(row: &rusqlite::Row) -> rusqlite::Result<StationLogEntry> {
        let station: String = row.get(2)?;
        let outcome: String = row.get(4)?;
        let recorded_at: String = row.get(5)?;

        Ok(StationLogEntry {
            order_id: row.get(0)?,
            order_number: row.get(1)?,
            station: db::text_column(2, &station)?,
            worker_id: row.get(3)?,
            outcome: db::text_column(4, &outcome)?,
            recorded_at: db::time_column(5, &recorded_at)?,
        })
    }

    fn load_bypass(conn: &Connection, id: &str) -> Result<Option<BypassRequest>, WorkflowError> {
        let sql = format!("SELECT {} FROM bypass_requests WHERE id = ?", BYPASS_COLUMNS);
        Ok(conn
            .query_row(&sql, params![id], Self::row_to_bypass)
            .optional()?)
    }

    fn attach_bypass(
        conn: &Connection,
        (mut order, bypass_id): (Order, Option<String>),
    ) -> Result<Order, WorkflowError> {
        if let Some(bypass_id) = bypass_id {
            order.bypass = Self::load_bypass(conn, &bypass_id)?;
        }
        Ok(order)
    }

    fn load_order(conn: &Connection, id: &str) -> Result<Option<Order>, WorkflowError> {
        let sql = format!("SELECT {} FROM orders o WHERE o.id = ?", ORDER_COLUMNS);
        let row = conn
            .query_row(&sql, params![id], Self::row_to_order)
            .optional()?;

        match row {
            Some(row) => Ok(Some(Self::attach_bypass(conn, row)?)),
            None => Ok(None),
        }
    }

    /// Fails unless the stored order is still at `order.version`.
    fn check_version(conn: &Connection, order: &Order) -> Result<(), WorkflowError> {
        let current: Option<(i64, String)> = conn
            .query_row(
                "SELECT version, status FROM orders WHERE id = ?",
                params![order.id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match current {
            None => Err(WorkflowError::UnknownOrder(order.id.clone())),
            Some((version, _)) if version == order.version as i64 => Ok(()),
            Some((_, status_json)) => {
                let current_state = serde_json::from_str::<OrderStatus>(&status_json)
                    .map(|s| s.describe())
                    .unwrap_or(status_json);
                Err(WorkflowError::invalid_state(
                    "order",
                    &order.id,
                    current_state,
                    "commit a transition to",
                ))
            }
        }
    }

    fn insert_bypass(conn: &Connection, bypass: &BypassRequest) -> Result<(), WorkflowError> {
        let open: Option<String> = conn
            .query_row(
                "SELECT id FROM bypass_requests WHERE order_id = ? AND status = 'pending'",
                params![bypass.order_id],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(existing) = open {
            return Err(WorkflowError::AlreadyOpen {
                order_id: bypass.order_id.clone(),
                bypass_id: existing,
            });
        }

        conn.execute(
            "INSERT INTO bypass_requests (id, order_id, station, discrepancies, reason, status, created_at, reason_submitted_at, resolved_at, resolved_by) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                bypass.id,
                bypass.order_id,
                bypass.station.as_str(),
                serde_json::to_string(&bypass.discrepancies)?,
                bypass.reason,
                bypass.status.as_str(),
                db::timestamp(&bypass.created_at),
                bypass.reason_submitted_at.as_ref().map(db::timestamp),
                bypass.resolved_at.as_ref().map(db::timestamp),
                bypass.resolved_by,
            ],
        )?;
        Ok(())
    }

    fn resolve_bypass(conn: &Connection, bypass: &BypassRequest) -> Result<(), WorkflowError> {
        let changed = conn.execute(
            "UPDATE bypass_requests SET status = ?, resolved_at = ?, resolved_by = ? WHERE id = ? AND status = 'pending'",
            params![
                bypass.status.as_str(),
                bypass.resolved_at.as_ref().map(db::timestamp),
                bypass.resolved_by,
                bypass.id,
            ],
        )?;

        if changed == 0 {
            return match Self::load_bypass(conn, &bypass.id)? {
                Some(_) => Err(WorkflowError::AlreadyResolved(bypass.id.clone())),
                None => Err(WorkflowError::UnknownBypass(bypass.id.clone())),
            };
        }
        Ok(())
    }

    fn insert_log_entry(conn: &Connection, entry: &StationLogEntry) -> Result<(), WorkflowError> {
        conn.execute(
            "INSERT INTO station_log (order_id, order_number, station, worker_id, outcome, recorded_at) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                entry.order_id,
                entry.order_number,
                entry.station.as_str(),
                entry.worker_id,
                entry.outcome.as_str(),
                db::timestamp(&entry.recorded_at),
            ],
        )?;
        Ok(())
    }
}

impl OrderStore for SqliteOrderStore {
    fn create_order(&self, request: NewOrder) -> Result<Order, WorkflowError> {
        request.validate()?;
        let conn = self.conn()?;

        let now = Utc::now();
        let order = Order {
            id: uuid::Uuid::new_v4().to_string(),
            order_number: request.order_number,
            items: request
                .items
                .into_iter()
                .map(|i| LineItem::new(i.id, i.name, i.quantity))
                .collect(),
            status: OrderStatus::at(Station::first()),
            bypass: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        conn.execute(
            "INSERT INTO orders (id, order_number, items, status, bypass_id, version, created_at, updated_at) VALUES (?, ?, ?, ?, NULL, 0, ?, ?)",
            params![
                order.id,
                order.order_number,
                serde_json::to_string(&order.items)?,
                serde_json::to_string(&order.status)?,
                db::timestamp(&now),
                db::timestamp(&now),
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                WorkflowError::InvalidRequest(format!(
                    "duplicate order number {}",
                    order.order_number
                ))
            }
            other => other.into(),
        })?;

        Ok(order)
    }

    fn get_order(&self, id: &str) -> Result<Option<Order>, WorkflowError> {
        let conn = self.conn()?;
        Self::load_order(&conn, id)
    }

    fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, WorkflowError> {
        let conn = self.conn()?;

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT {} FROM orders o {} ORDER BY o.created_at ASC, o.rowid ASC LIMIT ? OFFSET ?",
            ORDER_COLUMNS, where_clause
        );

        let mut stmt = conn.prepare(&sql)?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt.query_map(param_refs.as_slice(), Self::row_to_order)?;

        let mut orders = Vec::new();
        for row_result in rows {
            orders.push(Self::attach_bypass(&conn, row_result?)?);
        }

        Ok(orders)
    }

    fn count_orders(&self, filter: &OrderFilter) -> Result<i64, WorkflowError> {
        let conn = self.conn()?;

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!("SELECT COUNT(*) FROM orders o {}", where_clause);

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let count: i64 = conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?;

        Ok(count)
    }

    fn station_feed(&self, station: Station) -> Result<Vec<StationFeedEntry>, WorkflowError> {
        let conn = self.conn()?;

        let sql = format!(
            r#"
            SELECT {} FROM orders o
            LEFT JOIN bypass_requests b ON b.id = o.bypass_id
            WHERE (json_extract(o.status, '$.type') = 'at_station'
                   AND json_extract(o.status, '$.station') = ?1)
               OR (json_extract(o.status, '$.type') = 'on_hold' AND b.station = ?1)
            ORDER BY o.created_at ASC, o.rowid ASC
            "#,
            ORDER_COLUMNS
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![station.as_str()], Self::row_to_order)?;

        let mut feed = Vec::new();
        for row_result in rows {
            let (order, _) = row_result?;
            feed.push(StationFeedEntry::from(&order));
        }

        Ok(feed)
    }

    fn commit_order(&self, commit: OrderCommit<'_>) -> Result<Order, WorkflowError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let order = commit.order;

        // The version check comes before any bypass write so a stale commit
        // always loses with InvalidState.
        Self::check_version(&tx, order)?;

        match commit.bypass {
            Some(BypassWrite::Open(bypass)) => Self::insert_bypass(&tx, bypass)?,
            Some(BypassWrite::Resolve(bypass)) => Self::resolve_bypass(&tx, bypass)?,
            None => {}
        }

        let now = Utc::now();
        tx.execute(
            "UPDATE orders SET items = ?, status = ?, bypass_id = ?, version = version + 1, updated_at = ? WHERE id = ? AND version = ?",
            params![
                serde_json::to_string(&order.items)?,
                serde_json::to_string(&order.status)?,
                order.bypass.as_ref().map(|b| b.id.as_str()),
                db::timestamp(&now),
                order.id,
                order.version as i64,
            ],
        )?;

        if let Some(entry) = commit.log {
            Self::insert_log_entry(&tx, entry)?;
        }

        tx.commit()?;

        Ok(Order {
            version: order.version + 1,
            updated_at: now,
            ..order.clone()
        })
    }

    fn get_bypass(&self, id: &str) -> Result<Option<BypassRequest>, WorkflowError> {
        let conn = self.conn()?;
        Self::load_bypass(&conn, id)
    }

    fn list_bypasses(&self, filter: &BypassFilter) -> Result<Vec<BypassRequest>, WorkflowError> {
        let conn = self.conn()?;

        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        if let Some(ref order_id) = filter.order_id {
            conditions.push("order_id = ?");
            params.push(Box::new(order_id.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            "SELECT {} FROM bypass_requests {} ORDER BY created_at ASC, rowid ASC LIMIT ? OFFSET ?",
            BYPASS_COLUMNS, where_clause
        );

        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), Self::row_to_bypass)?;

        let mut requests = Vec::new();
        for row_result in rows {
            requests.push(row_result?);
        }

        Ok(requests)
    }

    fn record_bypass_reason(
        &self,
        bypass_id: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<BypassRequest, WorkflowError> {
        let conn = self.conn()?;

        let changed = conn.execute(
            "UPDATE bypass_requests SET reason = ?, reason_submitted_at = ? WHERE id = ? AND status = ?",
            params![
                reason,
                db::timestamp(&at),
                bypass_id,
                BypassStatus::Pending.as_str()
            ],
        )?;

        match Self::load_bypass(&conn, bypass_id)? {
            None => Err(WorkflowError::UnknownBypass(bypass_id.to_string())),
            Some(_) if changed == 0 => Err(WorkflowError::AlreadyResolved(bypass_id.to_string())),
            Some(bypass) => Ok(bypass),
        }
    }

    fn worker_history(
        &self,
        worker_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StationLogEntry>, WorkflowError> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT order_id, order_number, station, worker_id, outcome, recorded_at FROM station_log WHERE worker_id = ? ORDER BY id DESC LIMIT ? OFFSET ?",
        )?;

        let rows = stmt.query_map(params![worker_id, limit, offset], Self::row_to_log_entry)?;

        let mut entries = Vec::new();
        for row_result in rows {
            entries.push(row_result?);
        }

        Ok(entries)
    }
}
