// warden-core/src/ports/mod.rs

// Contracts the pipeline needs from the outside world: connections to the
// tenant databases, the catalog store and the credential vault.

pub mod connector;
pub mod storage;
pub mod vault;
