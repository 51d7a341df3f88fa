// warden/src/commands/mod.rs

pub mod explain;
pub mod query;
pub mod rules;
pub mod secure;
pub mod validate;

use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use serde_json::Value;
use std::path::Path;

use warden_core::WardenError;
use warden_core::domain::query::CallerContext;
use warden_core::infrastructure::config::{WardenProject, load_project};

/// Status lines go to stderr; stdout only carries results.
pub(crate) fn project(project_dir: &Path) -> Result<WardenProject, WardenError> {
    let project = load_project(project_dir)?;
    eprintln!("⚙️  Project: {} (v{})", project.name, project.version);
    Ok(project)
}

pub(crate) fn caller(tenant: String, user: String, role: String, org_unit: Option<String>) -> CallerContext {
    CallerContext {
        tenant_id: tenant,
        user_id: user,
        role,
        org_unit_id: org_unit,
    }
}

pub(crate) fn render_table(columns: &[String], rows: &[Vec<Value>]) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(columns);
    for row in rows {
        table.add_row(row.iter().map(cell));
    }
    table.to_string()
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
