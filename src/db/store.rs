//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Result as SqlResult, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;
use super::repo::{LogSink, Scope, TargetSource};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

const LOG_COLUMNS: &str = "id, target_id, installation_id, created_at, status, latency_ms, \
     status_code, error_message, alert_level, alert_triggered";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("connection lock poisoned")]
    LockPoisoned,
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Create a store backed by a private in-memory database.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DbError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;

        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;

        // Fails with "duplicate column" once applied
        let _ = conn.execute_batch(include_str!("../../migrations/000002_target_thresholds.up.sql"));

        Ok(())
    }

    // --- Entity rows ---

    pub fn add_client(&self, name: &str) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute("INSERT INTO clients (name) VALUES (?1)", params![name])?;
        Ok(conn.last_insert_rowid())
    }

    pub fn add_installation(&self, client_id: i64, name: &str, api_key: &str) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO installations (client_id, name, api_key) VALUES (?1, ?2, ?3)",
            params![client_id, name, api_key],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Add a new target and return its ID.
    pub fn add_target(&self, target: &mut Target) -> Result<i64, DbError> {
        if target.timeout_ms == 0 {
            target.timeout_ms = Target::default().timeout_ms;
        }

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO targets (installation_id, name, url, method, expected_code, timeout_ms, warning_ms, error_ms, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                target.installation_id,
                target.name,
                target.url,
                target.method,
                target.expected_code as i64,
                target.timeout_ms as i64,
                target.warning_ms,
                target.error_ms,
                target.is_active,
            ],
        )?;
        let id = conn.last_insert_rowid();
        target.id = id;
        Ok(id)
    }

    /// Soft-delete or restore a target.
    pub fn set_target_active(&self, id: i64, active: bool) -> Result<(), DbError> {
        self.set_active("targets", id, active)
    }

    pub fn set_installation_active(&self, id: i64, active: bool) -> Result<(), DbError> {
        self.set_active("installations", id, active)
    }

    pub fn set_client_active(&self, id: i64, active: bool) -> Result<(), DbError> {
        self.set_active("clients", id, active)
    }

    fn set_active(&self, table: &str, id: i64, active: bool) -> Result<(), DbError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            &format!("UPDATE {} SET is_active = ?1 WHERE id = ?2", table),
            params![active, id],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Number of targets regardless of state.
    pub fn count_targets(&self) -> Result<i64, DbError> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM targets", [], |r| r.get(0))?)
    }

    /// Number of stored log records.
    pub fn count_logs(&self) -> Result<i64, DbError> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM monitoring_logs", [], |r| r.get(0))?)
    }

    /// Round trip to the database.
    pub fn ping(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?;
        Ok(())
    }

    pub fn system_counts(&self) -> Result<SystemCounts, DbError> {
        let conn = self.conn()?;
        let count = |table: &str| -> Result<EntityCounts, DbError> {
            let counts = conn.query_row(
                &format!(
                    "SELECT COUNT(*), COALESCE(SUM(is_active = 1), 0) FROM {}",
                    table
                ),
                [],
                |r| {
                    Ok(EntityCounts {
                        total: r.get(0)?,
                        active: r.get(1)?,
                    })
                },
            )?;
            Ok(counts)
        };

        Ok(SystemCounts {
            clients: count("clients")?,
            installations: count("installations")?,
            targets: count("targets")?,
        })
    }

    /// One log record with its installation (key masked) and target.
    pub fn get_log(&self, id: i64) -> Result<LogDetail, DbError> {
        let conn = self.conn()?;

        let record = conn
            .query_row(
                &format!("SELECT {} FROM monitoring_logs WHERE id = ?1", LOG_COLUMNS),
                params![id],
                log_from_row,
            )
            .optional()?
            .ok_or(DbError::NotFound)?;

        let installation = conn
            .query_row(
                "SELECT id, name, api_key FROM installations WHERE id = ?1",
                params![record.installation_id],
                |r| {
                    let api_key: String = r.get(2)?;
                    Ok(InstallationSummary {
                        id: r.get(0)?,
                        name: r.get(1)?,
                        api_key: mask_api_key(&api_key),
                    })
                },
            )
            .optional()?;

        let target = conn
            .query_row(
                "SELECT id, name, url, method FROM targets WHERE id = ?1",
                params![record.target_id],
                |r| {
                    Ok(TargetSummary {
                        id: r.get(0)?,
                        name: r.get(1)?,
                        url: r.get(2)?,
                        method: r.get(3)?,
                    })
                },
            )
            .optional()?;

        Ok(LogDetail {
            record,
            installation,
            target,
        })
    }
}

#[cfg(test)]
impl Store {
    /// Poison the connection lock so every later call fails.
    pub(crate) fn poison(&self) {
        let conn = self.conn.clone();
        let _ = std::thread::spawn(move || {
            let _guard = conn.lock();
            panic!("poisoning store lock");
        })
        .join();
    }
}

impl TargetSource for Store {
    fn list_active_targets(&self, scope: Scope) -> Result<Vec<Target>, DbError> {
        let conn = self.conn()?;

        let mut sql = String::from(
            "SELECT t.id, t.installation_id, i.client_id, t.name, t.url, t.method, t.expected_code,
                    t.timeout_ms, i.api_key, t.warning_ms, t.error_ms, t.is_active
             FROM targets t
             JOIN installations i ON i.id = t.installation_id
             JOIN clients c ON c.id = i.client_id
             WHERE t.is_active = 1 AND i.is_active = 1 AND c.is_active = 1",
        );
        let mut args: Vec<Value> = Vec::new();
        match scope {
            Scope::All => {}
            Scope::Installation(id) => {
                sql.push_str(" AND i.id = ?1");
                args.push(Value::Integer(id));
            }
            Scope::Client(id) => {
                sql.push_str(" AND c.id = ?1");
                args.push(Value::Integer(id));
            }
        }
        sql.push_str(" ORDER BY t.id");

        let mut stmt = conn.prepare(&sql)?;
        let targets = stmt
            .query_map(params_from_iter(args), |row| {
                let expected_code: i64 = row.get(6)?;
                let timeout_ms: i64 = row.get(7)?;
                Ok(Target {
                    id: row.get(0)?,
                    installation_id: row.get(1)?,
                    client_id: row.get(2)?,
                    name: row.get(3)?,
                    url: row.get(4)?,
                    method: row.get(5)?,
                    expected_code: u16::try_from(expected_code).unwrap_or(200),
                    timeout_ms: timeout_ms.max(0) as u64,
                    api_key: row.get(8)?,
                    warning_ms: row.get(9)?,
                    error_ms: row.get(10)?,
                    is_active: row.get(11)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(targets)
    }

    fn scope_exists(&self, scope: Scope) -> Result<bool, DbError> {
        let (table, id) = match scope {
            Scope::All => return Ok(true),
            Scope::Installation(id) => ("installations", id),
            Scope::Client(id) => ("clients", id),
        };
        let conn = self.conn()?;
        let exists = conn.query_row(
            &format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)", table),
            params![id],
            |r| r.get(0),
        )?;
        Ok(exists)
    }
}

impl LogSink for Store {
    fn append(&self, record: &NewLogRecord) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO monitoring_logs (target_id, installation_id, created_at, status, latency_ms,
                 status_code, error_message, alert_level, alert_triggered)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.target_id,
                record.installation_id,
                format_db_time(&record.created_at),
                record.status.as_str(),
                record.latency_ms,
                record.status_code.map(i64::from),
                record.error_message,
                record.alert_level.map(|l| l.as_str()),
                record.alert_triggered,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn query(&self, filter: &LogFilter, page: Page) -> Result<Vec<LogRecord>, DbError> {
        let conn = self.conn()?;

        let (clause, mut args) = filter_clause(filter);
        let sql = format!(
            "SELECT {} FROM monitoring_logs{} ORDER BY created_at DESC, id DESC LIMIT ?{} OFFSET ?{}",
            LOG_COLUMNS,
            clause,
            args.len() + 1,
            args.len() + 2,
        );
        args.push(Value::Integer(page.limit as i64));
        args.push(Value::Integer(page.offset as i64));

        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(args), log_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(records)
    }

    fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM monitoring_logs WHERE created_at < ?1",
            params![format_db_time(&cutoff)],
        )?;
        Ok(deleted)
    }

    fn latest_per_target(&self, target_ids: &[i64]) -> Result<HashMap<i64, LogRecord>, DbError> {
        if target_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = self.conn()?;
        let placeholders = (1..=target_ids.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {cols} FROM (
                 SELECT {cols}, ROW_NUMBER() OVER (
                     PARTITION BY target_id ORDER BY created_at DESC, id DESC
                 ) AS rn
                 FROM monitoring_logs
                 WHERE target_id IN ({placeholders})
             ) WHERE rn = 1",
            cols = LOG_COLUMNS,
            placeholders = placeholders,
        );

        let mut stmt = conn.prepare(&sql)?;
        let latest = stmt
            .query_map(params_from_iter(target_ids.iter()), log_from_row)?
            .map(|r| r.map(|rec| (rec.target_id, rec)))
            .collect::<SqlResult<HashMap<_, _>>>()?;

        Ok(latest)
    }

    fn window_stats(
        &self,
        filter: &LogFilter,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AlertLevelRow>, DbError> {
        let conn = self.conn()?;

        let mut sql = String::from(
            "SELECT alert_level, COUNT(*), AVG(latency_ms), MIN(latency_ms), MAX(latency_ms)
             FROM monitoring_logs
             WHERE created_at >= ?1 AND created_at < ?2",
        );
        let mut args = vec![
            Value::Text(format_db_time(&start)),
            Value::Text(format_db_time(&end)),
        ];
        if let Some(id) = filter.installation_id {
            args.push(Value::Integer(id));
            sql.push_str(&format!(" AND installation_id = ?{}", args.len()));
        }
        if let Some(id) = filter.target_id {
            args.push(Value::Integer(id));
            sql.push_str(&format!(" AND target_id = ?{}", args.len()));
        }
        sql.push_str(" GROUP BY alert_level ORDER BY alert_level");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(args), |row| {
                Ok(AlertLevelRow {
                    alert_level: row.get(0)?,
                    count: row.get(1)?,
                    avg_latency_ms: row.get(2)?,
                    min_latency_ms: row.get(3)?,
                    max_latency_ms: row.get(4)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(rows)
    }
}

/// Build a ` WHERE ...` clause and its positional arguments.
fn filter_clause(filter: &LogFilter) -> (String, Vec<Value>) {
    let mut conditions = Vec::new();
    let mut args = Vec::new();

    let mut push = |cond: &str, value: Value| {
        args.push(value);
        conditions.push(format!("{} ?{}", cond, args.len()));
    };

    if let Some(id) = filter.installation_id {
        push("installation_id =", Value::Integer(id));
    }
    if let Some(id) = filter.target_id {
        push("target_id =", Value::Integer(id));
    }
    if let Some(level) = filter.alert_level {
        push("alert_level =", Value::Text(level.as_str().to_string()));
    }
    if let Some(triggered) = filter.alert_triggered {
        push("alert_triggered =", Value::Integer(triggered as i64));
    }
    if let Some(start) = filter.start {
        push("created_at >=", Value::Text(format_db_time(&start)));
    }
    if let Some(end) = filter.end {
        push("created_at <=", Value::Text(format_db_time(&end)));
    }

    if conditions.is_empty() {
        (String::new(), args)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), args)
    }
}

fn log_from_row(row: &Row<'_>) -> SqlResult<LogRecord> {
    let time_str: String = row.get(3)?;
    let status_str: String = row.get(4)?;
    let status_code: Option<i64> = row.get(6)?;
    let alert_level: Option<String> = row.get(8)?;

    let status = status_str
        .parse::<ProbeStatus>()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, e.into()))?;
    let alert_level = alert_level
        .map(|s| s.parse::<AlertLevel>())
        .transpose()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, e.into()))?;

    Ok(LogRecord {
        id: row.get(0)?,
        target_id: row.get(1)?,
        installation_id: row.get(2)?,
        created_at: parse_db_time(&time_str).unwrap_or_else(Utc::now),
        status,
        latency_ms: row.get(5)?,
        status_code: status_code.and_then(|c| u16::try_from(c).ok()),
        error_message: row.get(7)?,
        alert_level,
        alert_triggered: row.get(9)?,
    })
}

fn format_db_time(dt: &DateTime<Utc>) -> String {
    dt.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        TIME_FORMAT,
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}
