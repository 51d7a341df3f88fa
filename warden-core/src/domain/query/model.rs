// warden-core/src/domain/query/model.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

// --- DATA SOURCES ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Postgres,
    MySql,
    SqlServer,
    Sqlite,
    DuckDb,
    DataFusion,
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" => Ok(Self::MySql),
            "sqlserver" | "mssql" => Ok(Self::SqlServer),
            "sqlite" => Ok(Self::Sqlite),
            "duckdb" => Ok(Self::DuckDb),
            "datafusion" => Ok(Self::DataFusion),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::SqlServer => "sqlserver",
            Self::Sqlite => "sqlite",
            Self::DuckDb => "duckdb",
            Self::DataFusion => "datafusion",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSourceStatus {
    #[default]
    Active,
    Inactive,
    Error,
}

/// Connection secrets as stored. Only a `CredentialVault` can turn this into
/// a usable config, and no formatting impl ever prints the content.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedConfig(String);

impl EncryptedConfig {
    pub fn new(sealed: impl Into<String>) -> Self {
        Self(sealed.into())
    }

    pub fn sealed(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EncryptedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptedConfig(<redacted>)")
    }
}

fn default_tenant_column() -> String {
    "tenant_id".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    pub id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub name: String,
    pub provider: Provider,
    pub encrypted_config: EncryptedConfig,
    #[serde(default)]
    pub status: DataSourceStatus,
    /// Column that identifies the owning tenant in every table of this source.
    #[serde(default = "default_tenant_column")]
    pub tenant_column: String,
    /// Resource name column rules are keyed by; defaults to the id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

impl DataSource {
    pub fn resource(&self) -> &str {
        self.resource.as_deref().unwrap_or(&self.id)
    }

    pub fn is_active(&self) -> bool {
        self.status == DataSourceStatus::Active
    }
}

// --- REQUEST SIDE ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub data_source_id: String,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimize: Option<bool>,
}

/// Authenticated caller, as provided by the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    pub tenant_id: String,
    pub user_id: String,
    pub role: String,
    pub org_unit_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecuredQuery {
    pub text: String,
    pub tenant_predicate_injected: bool,
    pub tenant_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationPlan {
    pub optimized_query_text: String,
    pub estimated_rows: u64,
    pub estimated_cost: f64,
    pub warnings: Vec<String>,
    pub applied_rewrites: Vec<String>,
}

impl OptimizationPlan {
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            estimated_rows: self.estimated_rows,
            estimated_cost: self.estimated_cost,
            warnings: self.warnings.clone(),
        }
    }
}

// --- RESULT SIDE ---

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    /// The gateway cut the result at `max_rows`.
    pub truncated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub tenant_predicate_injected: bool,
    pub optimization_applied: bool,
    pub optimization_fallback: bool,
    pub truncated: bool,
    pub hidden_columns: usize,
    pub masked_columns: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub estimated_rows: u64,
    pub estimated_cost: f64,
    pub warnings: Vec<String>,
}

/// The only object handed back to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernedResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    #[serde(rename = "executionTime")]
    pub execution_time_ms: u64,
    pub performance: PerformanceReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimization_plan: Option<PlanSummary>,
}

// --- AUDIT ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryLog {
    pub tenant_id: String,
    pub user_id: String,
    pub data_source_id: String,
    pub query_text_excerpt: String,
    pub row_count: usize,
    pub execution_time_ms: u64,
    pub status: QueryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// First `max_chars` characters of `text`, never splitting a character.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}
