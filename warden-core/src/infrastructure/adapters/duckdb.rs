// warden-core/src/infrastructure/adapters/duckdb.rs

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use duckdb::types::{TimeUnit, Value as DuckValue};
use duckdb::{AccessMode, Config, Connection};
use serde_json::{Number, Value};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::domain::query::{DataSource, Provider, RawResultSet};
use crate::infrastructure::error::InfrastructureError;
use crate::ports::connector::{ConnectorFactory, ExecutionError, ProviderConnection};
use crate::ports::vault::SecretConfig;

pub const IN_MEMORY: &str = ":memory:";

// Days between 0001-01-01 (CE day 1) and 1970-01-01.
const UNIX_EPOCH_CE_DAYS: i32 = 719_163;

/// One open DuckDB database. Statements run on the blocking pool; `cancel`
/// goes through the engine's interrupt handle, not through the lock.
pub struct DuckDbConnection {
    conn: Arc<Mutex<Connection>>,
    interrupt: Box<dyn Fn() + Send + Sync>,
}

impl DuckDbConnection {
    /// Files are opened read-only unless `read_only` is false.
    /// In-memory databases cannot be read-only and ignore the flag.
    pub fn open(path: &str, read_only: bool) -> Result<Self, InfrastructureError> {
        let conn = if path == IN_MEMORY {
            Connection::open_in_memory_with_flags(Config::default())?
        } else {
            let mode = if read_only {
                AccessMode::ReadOnly
            } else {
                AccessMode::ReadWrite
            };
            Connection::open_with_flags(path, Config::default().access_mode(mode)?)?
        };
        let handle = conn.interrupt_handle();

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt: Box::new(move || handle.interrupt()),
        })
    }
}

#[async_trait]
impl ProviderConnection for DuckDbConnection {
    async fn query(&self, sql: &str, max_rows: usize) -> Result<RawResultSet, ExecutionError> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| ExecutionError::ConnectionError("DuckDB Mutex Poisoned".into()))?;
            fetch(&conn, &sql, max_rows).map_err(classify)
        })
        .await
        .map_err(|e| ExecutionError::ConnectionError(format!("DuckDB worker failed: {}", e)))?
    }

    fn cancel(&self) {
        debug!("Interrupting DuckDB statement");
        (self.interrupt)();
    }
}

fn fetch(conn: &Connection, sql: &str, max_rows: usize) -> Result<RawResultSet, duckdb::Error> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    let columns: Vec<String> = rows.as_ref().map(|s| s.column_names()).unwrap_or_default();

    let mut result = RawResultSet {
        columns,
        ..RawResultSet::default()
    };
    while let Some(row) = rows.next()? {
        if result.rows.len() >= max_rows {
            result.truncated = true;
            break;
        }
        let mut values = Vec::with_capacity(result.columns.len());
        for idx in 0..result.columns.len() {
            values.push(to_json(row.get::<_, DuckValue>(idx)?));
        }
        result.rows.push(values);
    }
    result.row_count = result.rows.len();
    Ok(result)
}

fn to_json(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Bool(b),
        DuckValue::TinyInt(i) => Value::from(i),
        DuckValue::SmallInt(i) => Value::from(i),
        DuckValue::Int(i) => Value::from(i),
        DuckValue::BigInt(i) => Value::from(i),
        DuckValue::UTinyInt(i) => Value::from(i),
        DuckValue::USmallInt(i) => Value::from(i),
        DuckValue::UInt(i) => Value::from(i),
        DuckValue::UBigInt(i) => Value::from(i),
        // Beyond i64 JSON numbers lose precision; keep the digits.
        DuckValue::HugeInt(i) => i64::try_from(i)
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(i.to_string())),
        DuckValue::Float(f) => float(f64::from(f)),
        DuckValue::Double(f) => float(f),
        DuckValue::Text(s) | DuckValue::Enum(s) => Value::String(s),
        DuckValue::Date32(days) => days
            .checked_add(UNIX_EPOCH_CE_DAYS)
            .and_then(NaiveDate::from_num_days_from_ce_opt)
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),
        DuckValue::Timestamp(unit, raw) => timestamp(unit, raw),
        DuckValue::List(items) => Value::Array(items.into_iter().map(to_json).collect()),
        other => Value::String(format!("{:?}", other)),
    }
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

fn timestamp(unit: TimeUnit, raw: i64) -> Value {
    let micros = match unit {
        TimeUnit::Second => raw.checked_mul(1_000_000),
        TimeUnit::Millisecond => raw.checked_mul(1_000),
        TimeUnit::Microsecond => Some(raw),
        TimeUnit::Nanosecond => Some(raw / 1_000),
    };
    micros
        .and_then(DateTime::from_timestamp_micros)
        .map(|ts| Value::String(ts.naive_utc().to_string()))
        .unwrap_or(Value::Null)
}

/// Maps an engine error onto what the gateway reports. Only the kind leaves
/// the process; the message is kept for traces.
fn classify(err: duckdb::Error) -> ExecutionError {
    let message = err.to_string();
    let lowered = message.to_lowercase();
    if lowered.contains("read-only") || lowered.contains("permission") {
        ExecutionError::PermissionDenied(message)
    } else if lowered.contains("parser error")
        || lowered.contains("binder error")
        || lowered.contains("catalog error")
        || lowered.contains("syntax error")
        || lowered.contains("conversion error")
    {
        ExecutionError::QuerySyntaxError(message)
    } else {
        ExecutionError::ConnectionError(message)
    }
}

/// Opens DuckDB sources from `{"path": ":memory:" | "<file>", "read_only": bool}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DuckDbConnectorFactory;

#[async_trait]
impl ConnectorFactory for DuckDbConnectorFactory {
    fn provider(&self) -> Provider {
        Provider::DuckDb
    }

    async fn connect(
        &self,
        source: &DataSource,
        config: &SecretConfig,
    ) -> Result<Arc<dyn ProviderConnection>, ExecutionError> {
        let path = config.get_str("path").unwrap_or(IN_MEMORY).to_string();
        let read_only = config.get_bool("read_only").unwrap_or(true);
        debug!(data_source_id = %source.id, read_only, "Opening DuckDB database");

        let connection = tokio::task::spawn_blocking(move || DuckDbConnection::open(&path, read_only))
            .await
            .map_err(|e| ExecutionError::ConnectionError(format!("DuckDB worker failed: {}", e)))?
            .map_err(|e| ExecutionError::ConnectionError(e.to_string()))?;
        Ok(Arc::new(connection))
    }
}
