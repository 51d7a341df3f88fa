// warden/src/main.rs

mod cli;
mod commands;

use clap::Parser;

use cli::{Cli, Commands, optimize_override};
use commands::explain::ExplainOptions;
use commands::query::QueryOptions;
use commands::rules::RulesOptions;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG=debug warden query ... pour voir les détails
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();

    match cli.command {
        // --- USE CASE: GOVERNED QUERY ---
        Commands::Query {
            query,
            data_source,
            tenant,
            user,
            role,
            org_unit,
            optimize,
            no_optimize,
            format,
            project_dir,
        } => {
            commands::query::execute(QueryOptions {
                query,
                data_source,
                caller: commands::caller(tenant, user, role, org_unit),
                optimize: optimize_override(optimize, no_optimize),
                format,
                project_dir,
            })
            .await?;
        }

        // --- USE CASE: GUARD ONLY ---
        Commands::Secure {
            query,
            tenant,
            tenant_column,
        } => commands::secure::execute(query, tenant, tenant_column)?,

        Commands::Validate {
            query,
            tenant,
            tenant_column,
        } => commands::validate::execute(query, tenant, tenant_column)?,

        // --- USE CASE: OPTIMIZER PLAN ---
        Commands::Explain {
            query,
            tenant,
            tenant_column,
            provider,
            max_rows,
        } => commands::explain::execute(ExplainOptions {
            query,
            tenant,
            tenant_column,
            provider,
            max_rows,
        })?,

        // --- USE CASE: RULE INSPECTION ---
        Commands::Rules {
            resource,
            tenant,
            user,
            role,
            org_unit,
            format,
            project_dir,
        } => {
            commands::rules::execute(RulesOptions {
                resource,
                caller: commands::caller(tenant, user, role, org_unit),
                format,
                project_dir,
            })
            .await?;
        }
    }

    Ok(())
}
