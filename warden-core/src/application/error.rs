// warden-core/src/application/error.rs

use miette::Diagnostic;
use thiserror::Error;

use crate::domain::error::GuardError;
use crate::ports::connector::ExecutionError;
use crate::ports::storage::StoreError;
use crate::ports::vault::VaultError;

const GENERIC_FAILURE: &str = "The request could not be processed.";

/// Why a governed query produced no result. `Display` is for traces and the
/// audit log; callers only ever see `public_message`.
#[derive(Error, Debug, Diagnostic)]
pub enum PipelineError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Rejected(#[from] GuardError),

    #[error("Data source '{0}' not found for this tenant")]
    #[diagnostic(code(warden::pipeline::data_source_not_found))]
    DataSourceNotFound(String),

    #[error("Data source '{0}' is not active")]
    #[diagnostic(code(warden::pipeline::data_source_unavailable))]
    DataSourceUnavailable(String),

    #[error("Required capability is not wired: {0}")]
    #[diagnostic(code(warden::pipeline::feature_unavailable))]
    FeatureUnavailable(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Credentials(#[from] VaultError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StoreError),
}

impl PipelineError {
    /// Defects of the deployment rather than of the caller's query.
    pub fn is_server_error(&self) -> bool {
        match self {
            Self::Rejected(GuardError::MissingTenantContext(_) | GuardError::InvalidPolicy(_)) => true,
            Self::Rejected(_) | Self::DataSourceNotFound(_) | Self::DataSourceUnavailable(_) => false,
            Self::Execution(e) => matches!(e, ExecutionError::ConnectionError(_) | ExecutionError::Timeout { .. }),
            Self::FeatureUnavailable(_) | Self::Credentials(_) | Self::Storage(_) => true,
        }
    }

    pub fn public_message(&self) -> String {
        match self {
            Self::Execution(e) => e.public_message(),
            _ if self.is_server_error() => GENERIC_FAILURE.to_string(),
            Self::Rejected(e) => e.to_string(),
            Self::DataSourceNotFound(_) => "Data source not found.".to_string(),
            Self::DataSourceUnavailable(_) => "Data source is not active.".to_string(),
            _ => GENERIC_FAILURE.to_string(),
        }
    }
}

/// Problems the pipeline works around. They are traced, never returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecoveredIssue {
    #[error("optimized query discarded: {0}")]
    OptimizationRegression(String),

    #[error("query log not written: {0}")]
    LoggingFailure(String),
}
