// warden/src/commands/query.rs
//
// USE CASE: Run an ad-hoc query through the governance pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;
use warden_core::GovernanceOrchestrator;
use warden_core::WardenError;
use warden_core::domain::query::{CallerContext, GovernedResultSet, QueryRequest};
use warden_core::infrastructure::{CatalogStore, LocalVault, WardenProject, builtin_connectors};

use super::render_table;
use crate::cli::OutputFormat;

pub struct QueryOptions {
    pub query: String,
    pub data_source: String,
    pub caller: CallerContext,
    pub optimize: Option<bool>,
    pub format: OutputFormat,
    pub project_dir: PathBuf,
}

/// Wires the catalog, the local vault and the built-in engines.
pub fn orchestrator(project: &WardenProject) -> Result<GovernanceOrchestrator, WardenError> {
    let store = Arc::new(CatalogStore::from_project(project));
    let orchestrator = GovernanceOrchestrator::new(
        project.governance.clone(),
        store,
        Arc::new(LocalVault::new()),
        builtin_connectors(),
    )?;
    Ok(orchestrator)
}

pub async fn execute(options: QueryOptions) -> anyhow::Result<()> {
    let project = super::project(&options.project_dir)?;
    let orchestrator = orchestrator(&project)?;

    let request = QueryRequest {
        data_source_id: options.data_source,
        query: options.query,
        optimize: options.optimize,
    };

    match orchestrator.run(&options.caller, request).await {
        Ok(result) => {
            print_result(&result, options.format)?;
            Ok(())
        }
        Err(e) => {
            debug!(error = ?e, "Pipeline error detail");
            eprintln!("❌ Query rejected: {}", e.public_message());
            // 2 = deployment problem, 1 = the query itself
            std::process::exit(if e.is_server_error() { 2 } else { 1 });
        }
    }
}

fn print_result(result: &GovernedResultSet, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
        OutputFormat::Table => {
            println!("{}", render_table(&result.columns, &result.rows));

            let perf = &result.performance;
            eprintln!(
                "📊 {} row(s) in {} ms{}",
                result.row_count,
                result.execution_time_ms,
                if perf.truncated { " (truncated)" } else { "" }
            );
            if perf.hidden_columns > 0 || perf.masked_columns > 0 {
                eprintln!(
                    "🔐 {} column(s) hidden, {} masked",
                    perf.hidden_columns, perf.masked_columns
                );
            }
            for warning in &perf.warnings {
                eprintln!("⚠️  {}", warning);
            }
        }
    }
    Ok(())
}
