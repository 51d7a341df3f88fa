// warden-core/src/error.rs

use miette::Diagnostic;
use thiserror::Error;

use crate::application::error::PipelineError;
use crate::domain::error::{DomainError, GuardError};
use crate::infrastructure::error::InfrastructureError;

#[derive(Error, Debug, Diagnostic)]
pub enum WardenError {
    // --- ERREURS DU DOMAINE (Garde, règles, masquage) ---
    #[error(transparent)]
    #[diagnostic(transparent)]
    Domain(#[from] DomainError),

    // --- ERREURS D'INFRASTRUCTURE (IO, Parsing, Moteurs) ---
    #[error(transparent)]
    #[diagnostic(transparent)]
    Infrastructure(#[from] InfrastructureError),

    // --- ERREURS DU PIPELINE ---
    #[error(transparent)]
    #[diagnostic(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Internal Error: {0}")]
    InternalError(String),
}

// Manual implementation to avoid duplicate enum variant but keep ergonomics
impl From<std::io::Error> for WardenError {
    fn from(err: std::io::Error) -> Self {
        WardenError::Infrastructure(InfrastructureError::Io(err))
    }
}

impl From<GuardError> for WardenError {
    fn from(err: GuardError) -> Self {
        WardenError::Domain(DomainError::Guard(err))
    }
}
