// warden-core/src/infrastructure/config/mod.rs

pub mod project;

pub use project::{WardenProject, load_project, load_project_with_env};
