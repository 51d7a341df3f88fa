// warden-core/src/infrastructure/adapters/datafusion.rs

use async_trait::async_trait;
use datafusion::arrow::array::Array;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::error::DataFusionError;
use datafusion::execution::context::SQLOptions;
use datafusion::prelude::*;
use datafusion::scalar::ScalarValue;
use serde::Deserialize;
use serde_json::{Number, Value};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

use crate::domain::query::{DataSource, Provider, RawResultSet};
use crate::ports::connector::{ConnectorFactory, ExecutionError, ProviderConnection};
use crate::ports::vault::SecretConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableFormat {
    #[default]
    Csv,
    Parquet,
}

/// A file exposed to queries under `name`.
#[derive(Debug, Clone, Deserialize)]
pub struct TableRegistration {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub format: TableFormat,
}

#[derive(Debug, Deserialize)]
struct SessionTables {
    #[serde(default)]
    tables: Vec<TableRegistration>,
}

/// A DataFusion session over the configured files. Statements that would
/// change the catalog or the data are refused at planning time.
pub struct DataFusionConnection {
    ctx: Arc<SessionContext>,
    cancelled: Notify,
}

impl DataFusionConnection {
    pub async fn open(tables: &[TableRegistration]) -> Result<Self, DataFusionError> {
        let ctx = SessionContext::new();
        for table in tables {
            match table.format {
                TableFormat::Csv => {
                    ctx.register_csv(table.name.as_str(), &table.path, CsvReadOptions::new())
                        .await?
                }
                TableFormat::Parquet => {
                    ctx.register_parquet(table.name.as_str(), &table.path, ParquetReadOptions::default())
                        .await?
                }
            }
        }
        Ok(Self {
            ctx: Arc::new(ctx),
            cancelled: Notify::new(),
        })
    }

    fn read_only() -> SQLOptions {
        SQLOptions::new()
            .with_allow_ddl(false)
            .with_allow_dml(false)
            .with_allow_statements(false)
    }

    async fn run(&self, sql: &str, max_rows: usize) -> Result<RawResultSet, DataFusionError> {
        let df = self.ctx.sql_with_options(sql, Self::read_only()).await?;
        let columns: Vec<String> = df
            .schema()
            .fields()
            .iter()
            .map(|field| field.name().clone())
            .collect();

        // One extra row tells us whether the cap cut anything.
        let batches = df.limit(0, Some(max_rows.saturating_add(1)))?.collect().await?;
        let mut rows = rows_of(&batches)?;
        let truncated = rows.len() > max_rows;
        rows.truncate(max_rows);

        Ok(RawResultSet {
            columns,
            row_count: rows.len(),
            rows,
            truncated,
        })
    }
}

#[async_trait]
impl ProviderConnection for DataFusionConnection {
    async fn query(&self, sql: &str, max_rows: usize) -> Result<RawResultSet, ExecutionError> {
        // Losing the race drops the plan future, which stops its streams.
        tokio::select! {
            result = self.run(sql, max_rows) => result.map_err(classify),
            _ = self.cancelled.notified() => {
                Err(ExecutionError::ConnectionError("query cancelled".to_string()))
            }
        }
    }

    fn cancel(&self) {
        debug!("Cancelling DataFusion query");
        self.cancelled.notify_waiters();
    }
}

fn rows_of(batches: &[RecordBatch]) -> Result<Vec<Vec<Value>>, DataFusionError> {
    let mut rows = Vec::new();
    for batch in batches {
        for row in 0..batch.num_rows() {
            let mut values = Vec::with_capacity(batch.num_columns());
            for column in batch.columns() {
                values.push(to_json(column.as_ref(), row)?);
            }
            rows.push(values);
        }
    }
    Ok(rows)
}

fn to_json(array: &dyn Array, row: usize) -> Result<Value, DataFusionError> {
    if array.is_null(row) {
        return Ok(Value::Null);
    }
    let scalar = ScalarValue::try_from_array(array, row)?;
    let value = match scalar {
        ScalarValue::Boolean(Some(b)) => Value::Bool(b),
        ScalarValue::Int8(Some(i)) => Value::from(i),
        ScalarValue::Int16(Some(i)) => Value::from(i),
        ScalarValue::Int32(Some(i)) => Value::from(i),
        ScalarValue::Int64(Some(i)) => Value::from(i),
        ScalarValue::UInt8(Some(i)) => Value::from(i),
        ScalarValue::UInt16(Some(i)) => Value::from(i),
        ScalarValue::UInt32(Some(i)) => Value::from(i),
        ScalarValue::UInt64(Some(i)) => Value::from(i),
        ScalarValue::Float32(Some(f)) => float(f64::from(f)),
        ScalarValue::Float64(Some(f)) => float(f),
        ScalarValue::Utf8(Some(s)) | ScalarValue::Utf8View(Some(s)) | ScalarValue::LargeUtf8(Some(s)) => {
            Value::String(s)
        }
        other if other.is_null() => Value::Null,
        other => Value::String(other.to_string()),
    };
    Ok(value)
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

fn classify(err: DataFusionError) -> ExecutionError {
    let message = err.to_string();
    if message.contains("not supported") && (message.contains("DDL") || message.contains("DML") || message.contains("Statement")) {
        return ExecutionError::PermissionDenied(message);
    }
    match err {
        DataFusionError::SQL(..) | DataFusionError::Plan(_) | DataFusionError::SchemaError(..) => {
            ExecutionError::QuerySyntaxError(message)
        }
        _ => ExecutionError::ConnectionError(message),
    }
}

/// Opens DataFusion sessions from `{"tables": [{"name", "path", "format"}]}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DataFusionConnectorFactory;

#[async_trait]
impl ConnectorFactory for DataFusionConnectorFactory {
    fn provider(&self) -> Provider {
        Provider::DataFusion
    }

    async fn connect(
        &self,
        source: &DataSource,
        config: &SecretConfig,
    ) -> Result<Arc<dyn ProviderConnection>, ExecutionError> {
        let session: SessionTables = serde_json::from_value(config.value().clone())
            .map_err(|e| ExecutionError::ConnectionError(format!("invalid DataFusion config: {}", e)))?;
        debug!(data_source_id = %source.id, tables = session.tables.len(), "Opening DataFusion session");

        let connection = DataFusionConnection::open(&session.tables)
            .await
            .map_err(|e| ExecutionError::ConnectionError(e.to_string()))?;
        Ok(Arc::new(connection))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use anyhow::Result;
    use serde_json::json;

    async fn connection() -> Result<(tempfile::TempDir, Arc<dyn ProviderConnection>)> {
        let tmp = tempfile::tempdir()?;
        let csv = tmp.path().join("orders.csv");
        std::fs::write(&csv, "id,tenant_id,amount\n1,t1,10.5\n2,t1,20.0\n3,t2,99.0\n")?;

        let source: DataSource =
            serde_yaml::from_str("id: lake\ntenant_id: t1\nprovider: datafusion\nencrypted_config: 'plain:{}'\n")?;
        let config = SecretConfig::new(json!({
            "tables": [{ "name": "orders", "path": csv.to_string_lossy(), "format": "csv" }]
        }))?;
        let conn = DataFusionConnectorFactory.connect(&source, &config).await?;
        Ok((tmp, conn))
    }

    #[tokio::test]
    async fn test_query_csv_table() -> Result<()> {
        let (_tmp, conn) = connection().await?;
        let result = conn
            .query("SELECT id, amount FROM orders WHERE tenant_id = 't1' ORDER BY id", 10)
            .await?;

        assert_eq!(result.columns, vec!["id", "amount"]);
        assert_eq!(result.rows, vec![vec![json!(1), json!(10.5)], vec![json!(2), json!(20.0)]]);
        assert!(!result.truncated);
        Ok(())
    }

    #[tokio::test]
    async fn test_limit_is_applied_server_side() -> Result<()> {
        let (_tmp, conn) = connection().await?;
        let result = conn.query("SELECT id FROM orders ORDER BY id", 2).await?;
        assert_eq!(result.row_count, 2);
        assert!(result.truncated);
        Ok(())
    }

    #[tokio::test]
    async fn test_ddl_and_dml_are_refused() -> Result<()> {
        let (_tmp, conn) = connection().await?;
        let err = conn.query("CREATE TABLE x AS SELECT 1", 10).await.unwrap_err();
        assert_eq!(err.kind(), "PermissionDenied");

        let err = conn.query("SELECT * FROM missing", 10).await.unwrap_err();
        assert_eq!(err.kind(), "QuerySyntaxError");
        Ok(())
    }
}
