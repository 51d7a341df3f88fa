// warden-core/src/ports/connector.rs

// What the gateway needs from a database engine, without knowing which one.
// A factory opens connections for one provider; a connection runs read-only
// statements and can be interrupted from another task.

use async_trait::async_trait;
use miette::Diagnostic;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::query::{DataSource, Provider, RawResultSet};
use crate::ports::vault::SecretConfig;

/// Provider failures, reduced to what a caller may learn. The `String`
/// payloads are provider detail for traces only; see `public_message`.
#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Connection error: {0}")]
    #[diagnostic(code(warden::execution::connection))]
    ConnectionError(String),

    #[error("Query timed out after {after_ms} ms")]
    #[diagnostic(code(warden::execution::timeout), help("Narrow the query or raise query_timeout_ms."))]
    Timeout { after_ms: u64 },

    #[error("Query syntax error: {0}")]
    #[diagnostic(code(warden::execution::syntax))]
    QuerySyntaxError(String),

    #[error("Permission denied: {0}")]
    #[diagnostic(code(warden::execution::permission))]
    PermissionDenied(String),
}

impl ExecutionError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionError(_) => "ConnectionError",
            Self::Timeout { .. } => "Timeout",
            Self::QuerySyntaxError(_) => "QuerySyntaxError",
            Self::PermissionDenied(_) => "PermissionDenied",
        }
    }

    pub fn public_message(&self) -> String {
        match self {
            Self::ConnectionError(_) => "The data source could not be reached.".to_string(),
            Self::Timeout { after_ms } => format!("The query did not finish within {} ms.", after_ms),
            Self::QuerySyntaxError(_) => "The data source rejected the query syntax.".to_string(),
            Self::PermissionDenied(_) => "The data source denied access to a requested object.".to_string(),
        }
    }
}

#[async_trait]
pub trait ProviderConnection: Send + Sync {
    /// Runs `sql`, returning at most `max_rows` rows and whether more existed.
    async fn query(&self, sql: &str, max_rows: usize) -> Result<RawResultSet, ExecutionError>;

    /// Interrupts whatever this connection is running. Safe to call when idle.
    fn cancel(&self);
}

#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    fn provider(&self) -> Provider;

    async fn connect(
        &self,
        source: &DataSource,
        config: &SecretConfig,
    ) -> Result<Arc<dyn ProviderConnection>, ExecutionError>;
}
