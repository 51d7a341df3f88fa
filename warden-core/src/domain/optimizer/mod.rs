// warden-core/src/domain/optimizer/mod.rs

pub mod estimate;
pub mod heuristic;
pub mod passes;

use miette::Diagnostic;
use thiserror::Error;

use crate::domain::query::{OptimizationPlan, Provider, SecuredQuery};

pub use heuristic::HeuristicOptimizer;

#[derive(Debug, Clone, Copy)]
pub struct OptimizerContext {
    pub provider: Provider,
    pub max_rows: usize,
}

#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum OptimizerError {
    #[error("Optimizer could not analyse the query: {0}")]
    #[diagnostic(code(warden::optimizer::analysis))]
    Analysis(String),
}

/// Performance rewrites and estimates for an already secured query.
/// The output is advisory: callers re-validate it before executing anything.
pub trait QueryOptimizer: Send + Sync {
    fn optimize(
        &self,
        query: &SecuredQuery,
        context: &OptimizerContext,
    ) -> Result<OptimizationPlan, OptimizerError>;
}
