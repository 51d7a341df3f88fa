// warden-core/src/domain/optimizer/heuristic.rs

use tracing::debug;

use super::estimate::estimate;
use super::passes;
use super::{OptimizerContext, OptimizerError, QueryOptimizer};
use crate::domain::error::GuardError;
use crate::domain::query::{OptimizationPlan, Provider, SecuredQuery};
use crate::domain::tenancy::TokenStream;

pub const FLATTEN_SUBQUERY: &str = "flatten_subquery";
pub const REORDER_PREDICATES: &str = "reorder_predicates";
pub const INJECT_LIMIT: &str = "inject_limit";

/// Rule-based optimizer: AST rewrites in the source's dialect, a row limit
/// and shape-based estimates.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicOptimizer;

impl HeuristicOptimizer {
    pub fn new() -> Self {
        Self
    }
}

impl QueryOptimizer for HeuristicOptimizer {
    fn optimize(
        &self,
        query: &SecuredQuery,
        context: &OptimizerContext,
    ) -> Result<OptimizationPlan, OptimizerError> {
        let analysed = estimate(&query.text, context.max_rows).map_err(analysis)?;
        let mut warnings = analysed.warnings;
        let mut applied_rewrites = Vec::new();
        let mut text = query.text.trim().trim_end_matches(';').trim_end().to_string();

        match passes::apply(&text, context.provider) {
            Ok(Some((rewritten, report))) => {
                if report.flattened > 0 {
                    applied_rewrites.push(FLATTEN_SUBQUERY.to_string());
                }
                if report.reordered > 0 {
                    applied_rewrites.push(REORDER_PREDICATES.to_string());
                }
                text = rewritten;
            }
            Ok(None) => {}
            Err(e) => {
                debug!(provider = %context.provider, error = %e, "AST passes skipped");
                warnings.push(format!(
                    "structural rewrites skipped: the {} parser does not accept this query",
                    context.provider
                ));
            }
        }

        if !has_row_limit(&text).map_err(analysis)? {
            if context.provider == Provider::SqlServer {
                warnings.push(format!(
                    "no row limit added for sqlserver; results are still capped at {} rows",
                    context.max_rows
                ));
            } else {
                text = format!("{text} LIMIT {}", context.max_rows);
                applied_rewrites.push(INJECT_LIMIT.to_string());
            }
        }

        debug!(
            tenant_id = %query.tenant_id,
            rewrites = applied_rewrites.len(),
            warnings = warnings.len(),
            "Query optimized"
        );
        Ok(OptimizationPlan {
            optimized_query_text: text,
            estimated_rows: analysed.rows,
            estimated_cost: analysed.cost,
            warnings,
            applied_rewrites,
        })
    }
}

fn analysis(e: GuardError) -> OptimizerError {
    OptimizerError::Analysis(e.to_string())
}

/// A depth-0 LIMIT / FETCH / OFFSET / FOR clause, or `SELECT [DISTINCT] TOP`.
fn has_row_limit(sql: &str) -> Result<bool, GuardError> {
    let stream = TokenStream::new(sql)?;
    let tokens = stream.tokens();
    let top = stream.top_level(0..stream.len());
    Ok(top.iter().any(|&t| {
        let token = &tokens[t];
        token.is_any_keyword(&["LIMIT", "FETCH", "OFFSET", "FOR"])
            || (token.is_keyword("TOP")
                && t > 0
                && (tokens[t - 1].is_keyword("SELECT") || tokens[t - 1].is_keyword("DISTINCT")))
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::tenancy::{GuardPolicy, TenantGuard};
    use anyhow::Result;

    fn context(provider: Provider) -> OptimizerContext {
        OptimizerContext {
            provider,
            max_rows: 500,
        }
    }

    fn secured(sql: &str) -> Result<SecuredQuery> {
        Ok(TenantGuard::new(GuardPolicy::default())?.secure(sql, "t1")?)
    }

    #[test]
    fn test_wrapped_query_is_flattened_and_limited() -> Result<()> {
        let query = secured("SELECT * FROM invoices WHERE total > 10 OR overdue")?;
        let plan = HeuristicOptimizer::new().optimize(&query, &context(Provider::DuckDb))?;

        insta::assert_snapshot!(
            plan.optimized_query_text,
            @"SELECT * FROM invoices WHERE tenant_id = 't1' AND (total > 10 OR overdue) LIMIT 500"
        );
        assert_eq!(
            plan.applied_rewrites,
            vec![FLATTEN_SUBQUERY, REORDER_PREDICATES, INJECT_LIMIT]
        );
        let guard = TenantGuard::new(GuardPolicy::default())?;
        assert!(guard.validate(&plan.optimized_query_text, "t1").valid);
        Ok(())
    }

    #[test]
    fn test_existing_limit_is_kept() -> Result<()> {
        let query = secured("SELECT id FROM invoices WHERE tenant_id = 't1' LIMIT 20")?;
        let plan = HeuristicOptimizer::new().optimize(&query, &context(Provider::Postgres))?;
        assert_eq!(plan.optimized_query_text, query.text);
        assert!(plan.applied_rewrites.is_empty());
        assert_eq!(plan.estimated_rows, 20);
        Ok(())
    }

    #[test]
    fn test_sqlserver_gets_a_warning_instead_of_limit() -> Result<()> {
        let query = secured("SELECT id FROM invoices WHERE tenant_id = 't1'")?;
        let plan = HeuristicOptimizer::new().optimize(&query, &context(Provider::SqlServer))?;
        assert!(!plan.optimized_query_text.contains("LIMIT"));
        assert!(plan.warnings.iter().any(|w| w.contains("no row limit")));

        let top = SecuredQuery {
            text: "SELECT TOP 5 id FROM invoices WHERE tenant_id = 't1'".into(),
            tenant_predicate_injected: false,
            tenant_id: "t1".into(),
        };
        let plan = HeuristicOptimizer::new().optimize(&top, &context(Provider::SqlServer))?;
        assert!(!plan.warnings.iter().any(|w| w.contains("no row limit")));
        Ok(())
    }

    #[test]
    fn test_dialect_rejection_only_skips_ast_passes() -> Result<()> {
        let query = SecuredQuery {
            text: "SELECT id FROM invoices WHERE tenant_id = 't1' AND total = = 3".into(),
            tenant_predicate_injected: false,
            tenant_id: "t1".into(),
        };
        let plan = HeuristicOptimizer::new().optimize(&query, &context(Provider::Postgres))?;
        assert!(plan.warnings.iter().any(|w| w.starts_with("structural rewrites skipped")));
        assert_eq!(plan.applied_rewrites, vec![INJECT_LIMIT]);
        assert!(plan.optimized_query_text.ends_with("LIMIT 500"));
        Ok(())
    }

    #[test]
    fn test_estimates_are_reported() -> Result<()> {
        let query = secured("SELECT * FROM invoices ORDER BY id")?;
        let plan = HeuristicOptimizer::new().optimize(&query, &context(Provider::DuckDb))?;
        assert!(plan.estimated_rows <= 500);
        assert!(plan.estimated_cost > 0.0);
        assert!(plan.warnings.iter().any(|w| w.starts_with("SELECT *")));
        assert!(plan.warnings.iter().any(|w| w.contains("ORDER BY without LIMIT")));
        Ok(())
    }

    #[test]
    fn test_unanalysable_text_is_an_error() {
        let query = SecuredQuery {
            text: "SELECT (".into(),
            tenant_predicate_injected: false,
            tenant_id: "t1".into(),
        };
        assert!(matches!(
            HeuristicOptimizer::new().optimize(&query, &context(Provider::DuckDb)),
            Err(OptimizerError::Analysis(_))
        ));
    }
}
