// warden/src/commands/secure.rs
//
// USE CASE: Show how the guard rewrites a query for one tenant.

use warden_core::domain::tenancy::{GuardPolicy, TenantGuard};

pub fn execute(query: String, tenant: String, tenant_column: String) -> anyhow::Result<()> {
    let guard = TenantGuard::new(GuardPolicy::for_column(tenant_column))?;

    match guard.secure(&query, &tenant) {
        Ok(secured) => {
            println!("{}", secured.text);
            if secured.tenant_predicate_injected {
                eprintln!("🛡️  Tenant predicate injected for '{}'", guard.tenant_column());
            } else {
                eprintln!("✅ Query was already tenant-filtered");
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Query rejected: {}", e);
            std::process::exit(1);
        }
    }
}
