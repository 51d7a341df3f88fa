pub mod error;
pub mod governance;
pub mod optimizer;
pub mod query;
pub mod tenancy;

// Re-exports pratiques pour simplifier les imports ailleurs
pub use error::{DomainError, GuardError};
