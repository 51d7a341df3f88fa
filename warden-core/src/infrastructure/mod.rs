// warden-core/src/infrastructure/mod.rs

pub mod adapters;
pub mod config;
pub mod error;

pub use adapters::{CatalogStore, LocalVault, builtin_connectors};
pub use config::{WardenProject, load_project};
