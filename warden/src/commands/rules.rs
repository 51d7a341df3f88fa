// warden/src/commands/rules.rs
//
// USE CASE: Show which column rules apply to a caller on one resource.

use comfy_table::{Table, presets::UTF8_FULL};
use std::path::PathBuf;
use std::sync::Arc;

use warden_core::WardenError;
use warden_core::application::PipelineError;
use warden_core::domain::governance::{ColumnSecurityRule, RuleCache, ResolveError, RuleResolver, SecurityContext};
use warden_core::domain::query::CallerContext;
use warden_core::infrastructure::CatalogStore;

use crate::cli::OutputFormat;

pub struct RulesOptions {
    pub resource: String,
    pub caller: CallerContext,
    pub format: OutputFormat,
    pub project_dir: PathBuf,
}

pub async fn execute(options: RulesOptions) -> anyhow::Result<()> {
    let rules = effective_rules(&options).await?;

    match options.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rules)?),
        OutputFormat::Table => {
            if rules.is_empty() {
                println!("No column rules apply to this caller on '{}'.", options.resource);
                return Ok(());
            }
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(["column", "action", "scope", "masking"]);
            for rule in &rules {
                table.add_row([
                    rule.column.clone(),
                    rule.action.to_string(),
                    rule.scope.to_string(),
                    rule.masking_type.map(|m| m.to_string()).unwrap_or_default(),
                ]);
            }
            println!("{}", table);
        }
    }
    Ok(())
}

async fn effective_rules(options: &RulesOptions) -> Result<Vec<ColumnSecurityRule>, WardenError> {
    let project = super::project(&options.project_dir)?;
    let store = Arc::new(CatalogStore::from_project(&project));
    let resolver = RuleResolver::new(store, RuleCache::disabled());

    let context = SecurityContext::for_caller(&options.caller, options.resource.clone());
    resolver
        .resolve(&context)
        .await
        .map_err(|ResolveError::Store(e)| WardenError::from(PipelineError::from(e)))
}
