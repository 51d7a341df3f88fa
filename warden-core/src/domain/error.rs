// warden-core/src/domain/error.rs

use miette::Diagnostic;
use thiserror::Error;

/// Failures of the tenant-filter guard. None of them is retried: a query
/// that cannot be proven tenant-scoped is rejected, never guessed.
#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("Forbidden statement: '{keyword}' is not allowed in ad-hoc queries")]
    #[diagnostic(
        code(warden::guard::forbidden),
        help("Only single read-only SELECT / WITH statements can be executed.")
    )]
    ForbiddenStatement { keyword: String },

    #[error("Unparseable query structure: {0}")]
    #[diagnostic(
        code(warden::guard::unparseable),
        help("Simplify the query shape (aliases on derived tables, no dialect-specific quoting).")
    )]
    UnparseableStructure(String),

    #[error("Missing tenant context: {0}")]
    #[diagnostic(
        code(warden::guard::tenant_context),
        help("The caller session must carry a tenant id before any query is secured.")
    )]
    MissingTenantContext(String),

    #[error("Restricted column: {0}")]
    #[diagnostic(
        code(warden::guard::restricted_column),
        help("Select columns under a masking or hiding rule directly, or as `<expr> AS <same column>`.")
    )]
    RestrictedColumn(String),

    #[error("Invalid guard policy: {0}")]
    #[diagnostic(code(warden::guard::policy))]
    InvalidPolicy(String),
}

#[derive(Error, Debug, Diagnostic)]
pub enum DomainError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Guard(#[from] GuardError),

    #[error("Optimizer failure: {0}")]
    #[diagnostic(code(warden::domain::optimizer))]
    Optimizer(String),

    #[error("Invalid column security rule: {0}")]
    #[diagnostic(
        code(warden::domain::rule),
        help("Scoped rules (user, org_unit, role) need a scope_id; global rules must not have one.")
    )]
    RuleConfiguration(String),

    #[error("Invalid masking configuration: {0}")]
    #[diagnostic(code(warden::domain::masking))]
    MaskingConfiguration(String),
}
