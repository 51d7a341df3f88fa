// warden-core/src/domain/tenancy/mod.rs

pub mod coverage;
pub mod guard;
pub mod lexer;
pub mod predicate;
pub mod rewrite;
pub mod structure;

pub use guard::{DEFAULT_DENIED_KEYWORDS, GuardPolicy, TenantGuard, Validation};
pub use predicate::TenantBindings;
pub use structure::TokenStream;
