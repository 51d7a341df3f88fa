// warden-core/src/domain/query/mod.rs

pub mod model;

pub use model::{
    CallerContext, DataSource, DataSourceStatus, EncryptedConfig, GovernedResultSet,
    OptimizationPlan, PerformanceReport, PlanSummary, Provider, QueryLog, QueryRequest,
    QueryStatus, RawResultSet, SecuredQuery,
};
