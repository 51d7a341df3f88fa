// warden-core/src/ports/storage.rs

// Access to the records the pipeline reads and appends. Each repository is an
// optional capability: a deployment without query logs (for instance) says so
// explicitly by returning `None`, and callers branch on that.

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::domain::governance::ColumnSecurityRule;
use crate::domain::query::{DataSource, QueryLog};

#[derive(Error, Debug, Diagnostic)]
pub enum StoreError {
    #[error("Storage backend unavailable: {0}")]
    #[diagnostic(code(warden::store::unavailable))]
    Unavailable(String),

    #[error("Storage failure: {0}")]
    #[diagnostic(code(warden::store::backend))]
    Backend(String),
}

#[async_trait]
pub trait DataSourceRepository: Send + Sync {
    /// Only returns a source owned by `tenant_id`.
    async fn find_for_tenant(&self, id: &str, tenant_id: &str) -> Result<Option<DataSource>, StoreError>;
}

#[async_trait]
pub trait ColumnRuleRepository: Send + Sync {
    async fn rules_for(&self, tenant_id: &str, resource: &str) -> Result<Vec<ColumnSecurityRule>, StoreError>;
}

#[async_trait]
pub trait QueryLogRepository: Send + Sync {
    async fn append(&self, entry: &QueryLog) -> Result<(), StoreError>;
}

pub trait DataSourceAccess: Send + Sync {
    fn data_sources(&self) -> Option<&dyn DataSourceRepository>;
    fn column_rules(&self) -> Option<&dyn ColumnRuleRepository>;
    fn query_logs(&self) -> Option<&dyn QueryLogRepository>;
}
