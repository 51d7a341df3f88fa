// warden/src/commands/validate.rs
//
// USE CASE: Pre-flight check, without rewriting anything.

use warden_core::domain::tenancy::{GuardPolicy, TenantGuard};

pub fn execute(query: String, tenant: String, tenant_column: String) -> anyhow::Result<()> {
    let guard = TenantGuard::new(GuardPolicy::for_column(tenant_column))?;
    let validation = guard.validate(&query, &tenant);

    if validation.valid {
        println!("✅ Every data access is filtered on tenant '{}'", tenant);
        return Ok(());
    }

    eprintln!(
        "❌ Not tenant-safe: {}",
        validation.reason.as_deref().unwrap_or("unknown reason")
    );
    std::process::exit(1);
}
