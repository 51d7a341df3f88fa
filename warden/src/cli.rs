// warden/src/cli.rs
//
// Single source of truth for all CLI definitions (Clap structs).

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use warden_core::domain::query::Provider;

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Tenant-safe governance pipeline for ad-hoc SQL", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// ⚡ Runs an ad-hoc query through the full governance pipeline
    Query {
        query: String,

        /// Data source id, as declared in config/data_sources.yml
        #[arg(long, short = 'd')]
        data_source: String,

        #[arg(long, env = "WARDEN_TENANT")]
        tenant: String,

        #[arg(long, env = "WARDEN_USER", default_value = "cli")]
        user: String,

        #[arg(long, default_value = "analyst")]
        role: String,

        #[arg(long)]
        org_unit: Option<String>,

        /// Force the optimizer on (default comes from warden.yaml)
        #[arg(long, conflicts_with = "no_optimize")]
        optimize: bool,

        #[arg(long)]
        no_optimize: bool,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,

        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },

    /// 🛡️ Prints the tenant-secured form of a query
    Secure {
        query: String,

        #[arg(long, env = "WARDEN_TENANT")]
        tenant: String,

        #[arg(long, default_value = "tenant_id")]
        tenant_column: String,
    },

    /// ✅ Checks that every data access of a query is tenant-filtered
    Validate {
        query: String,

        #[arg(long, env = "WARDEN_TENANT")]
        tenant: String,

        #[arg(long, default_value = "tenant_id")]
        tenant_column: String,
    },

    /// 🔬 Secures a query, then shows the optimizer's plan
    Explain {
        query: String,

        #[arg(long, env = "WARDEN_TENANT")]
        tenant: String,

        #[arg(long, default_value = "tenant_id")]
        tenant_column: String,

        #[arg(long, default_value = "duckdb")]
        provider: Provider,

        #[arg(long, default_value = "1000")]
        max_rows: usize,
    },

    /// 🔐 Lists the effective column rules for a caller
    Rules {
        /// Resource the rules are keyed by (usually the data source id)
        #[arg(long)]
        resource: String,

        #[arg(long, env = "WARDEN_TENANT")]
        tenant: String,

        #[arg(long, env = "WARDEN_USER", default_value = "cli")]
        user: String,

        #[arg(long, default_value = "analyst")]
        role: String,

        #[arg(long)]
        org_unit: Option<String>,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,

        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },
}

/// `--optimize` / `--no-optimize` / neither (use the project default).
pub fn optimize_override(optimize: bool, no_optimize: bool) -> Option<bool> {
    match (optimize, no_optimize) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}
