// warden/src/commands/explain.rs
//
// USE CASE: Secure a query, then print the optimizer's plan without running it.

use warden_core::domain::optimizer::{HeuristicOptimizer, OptimizerContext, QueryOptimizer};
use warden_core::domain::query::Provider;
use warden_core::domain::tenancy::{GuardPolicy, TenantGuard};

pub struct ExplainOptions {
    pub query: String,
    pub tenant: String,
    pub tenant_column: String,
    pub provider: Provider,
    pub max_rows: usize,
}

pub fn execute(options: ExplainOptions) -> anyhow::Result<()> {
    let guard = TenantGuard::new(GuardPolicy::for_column(options.tenant_column))?;
    let secured = match guard.secure(&options.query, &options.tenant) {
        Ok(secured) => secured,
        Err(e) => {
            eprintln!("❌ Query rejected: {}", e);
            std::process::exit(1);
        }
    };

    let context = OptimizerContext {
        provider: options.provider,
        max_rows: options.max_rows,
    };
    let plan = HeuristicOptimizer::new().optimize(&secured, &context)?;

    // The plan is advisory; it must still pass the guard before anyone runs it.
    let check = guard.validate(&plan.optimized_query_text, &options.tenant);
    if !check.valid {
        eprintln!(
            "⚠️  Optimized text would be discarded: {}",
            check.reason.as_deref().unwrap_or("failed re-validation")
        );
    }

    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}
