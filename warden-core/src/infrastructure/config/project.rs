// warden-core/src/infrastructure/config/project.rs

use anyhow::Context;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};
use validator::Validate;

use crate::domain::governance::{ColumnSecurityRule, GovernanceSettings};
use crate::domain::query::DataSource;
use crate::infrastructure::error::InfrastructureError;

pub const PROJECT_FILES: [&str; 2] = ["warden.yaml", "warden_project.yaml"];
pub const DATA_SOURCES_FILE: &str = "data_sources.yml";
pub const COLUMN_RULES_FILE: &str = "column_rules.yml";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WardenProject {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(rename = "config-paths", default = "default_config_paths")]
    pub config_paths: Vec<String>,

    #[serde(rename = "target-path", default = "default_target_path")]
    pub target_path: String,

    #[serde(default)]
    pub governance: GovernanceSettings,

    /// Catalog, filled from the satellite files.
    #[serde(skip)]
    pub data_sources: Vec<DataSource>,
    #[serde(skip)]
    pub column_rules: Vec<ColumnSecurityRule>,

    #[serde(skip)]
    pub root: PathBuf,
}

impl WardenProject {
    /// Target directory, resolved against the project root when relative.
    pub fn target_dir(&self) -> PathBuf {
        let target = Path::new(&self.target_path);
        if target.is_absolute() {
            target.to_path_buf()
        } else {
            self.root.join(target)
        }
    }
}

fn default_version() -> String {
    "0.1.0".to_string()
}
fn default_config_paths() -> Vec<String> {
    vec!["config".to_string()]
}
fn default_target_path() -> String {
    "target".to_string()
}

// --- LOADER ---

#[instrument(skip(project_dir))]
pub fn load_project(project_dir: &Path) -> Result<WardenProject, InfrastructureError> {
    load_project_with_env(project_dir, |key| std::env::var(key).ok())
}

/// Same as `load_project`, reading overrides through `lookup` instead of the
/// process environment.
pub fn load_project_with_env<F>(project_dir: &Path, lookup: F) -> Result<WardenProject, InfrastructureError>
where
    F: Fn(&str) -> Option<String>,
{
    // 1. Découverte du fichier principal
    let config_path = find_main_config(project_dir)?;
    info!(path = ?config_path, "Loading project manifest");

    // 2. Chargement YAML Base
    let content = fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read project config at {:?}", config_path))?;
    let mut project: WardenProject = serde_yaml::from_str(&content)?;
    project.root = project_dir.to_path_buf();

    // 3. Satellites (catalog)
    if let Some(config_folder) = project.config_paths.first() {
        let config_dir = project_dir.join(config_folder);
        if config_dir.exists() {
            load_satellite_configs(&mut project, &config_dir)?;
        }
    }

    // 4. Override via variables d'environnement
    apply_env_overrides(&mut project, lookup)?;

    project.governance.validate()?;
    Ok(project)
}

fn find_main_config(root: &Path) -> Result<PathBuf, InfrastructureError> {
    for filename in PROJECT_FILES {
        let p = root.join(filename);
        if p.exists() {
            return Ok(p);
        }
    }
    Err(InfrastructureError::ConfigNotFound(format!(
        "No configuration file found in {:?}. Checked: {:?}",
        root, PROJECT_FILES
    )))
}

fn load_fragment<T: DeserializeOwned>(path: &Path) -> Result<T, InfrastructureError> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config fragment at {:?}", path))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse YAML fragment at {:?}", path))
        .map_err(Into::into)
}

fn load_satellite_configs(project: &mut WardenProject, config_dir: &Path) -> Result<(), InfrastructureError> {
    let sources_path = config_dir.join(DATA_SOURCES_FILE);
    if sources_path.exists() {
        #[derive(Deserialize)]
        struct SourcesWrapper {
            #[serde(default)]
            data_sources: Vec<DataSource>,
        }

        let wrapper: SourcesWrapper = load_fragment(&sources_path)?;
        project.data_sources = wrapper.data_sources;
        info!(count = project.data_sources.len(), "Data sources loaded");
    }

    let rules_path = config_dir.join(COLUMN_RULES_FILE);
    if rules_path.exists() {
        #[derive(Deserialize)]
        struct RulesWrapper {
            #[serde(default)]
            rules: Vec<ColumnSecurityRule>,
        }

        let wrapper: RulesWrapper = load_fragment(&rules_path)?;
        project.column_rules = wrapper.rules;
        info!(count = project.column_rules.len(), "Column rules loaded");
    }

    Ok(())
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, InfrastructureError> {
    value
        .trim()
        .parse()
        .map_err(|_| InfrastructureError::ConfigError(format!("{} has an invalid value '{}'", key, value)))
}

fn apply_env_overrides<F>(project: &mut WardenProject, lookup: F) -> Result<(), InfrastructureError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("WARDEN_TARGET_PATH") {
        info!(old = ?project.target_path, new = ?val, "Overriding target path via ENV");
        project.target_path = val;
    }
    if let Some(val) = lookup("WARDEN_MAX_ROWS") {
        project.governance.max_rows = parse_override("WARDEN_MAX_ROWS", &val)?;
        info!(max_rows = project.governance.max_rows, "Overriding max rows via ENV");
    }
    if let Some(val) = lookup("WARDEN_QUERY_TIMEOUT_MS") {
        project.governance.query_timeout_ms = parse_override("WARDEN_QUERY_TIMEOUT_MS", &val)?;
        info!(timeout_ms = project.governance.query_timeout_ms, "Overriding query timeout via ENV");
    }
    if let Some(val) = lookup("WARDEN_OPTIMIZE") {
        project.governance.optimize_by_default = parse_override("WARDEN_OPTIMIZE", &val)?;
    }
    Ok(())
}
