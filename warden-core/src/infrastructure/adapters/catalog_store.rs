// warden-core/src/infrastructure/adapters/catalog_store.rs

use async_trait::async_trait;
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

use crate::domain::governance::ColumnSecurityRule;
use crate::domain::query::{DataSource, QueryLog};
use crate::infrastructure::config::WardenProject;
use crate::ports::storage::{
    ColumnRuleRepository, DataSourceAccess, DataSourceRepository, QueryLogRepository, StoreError,
};

pub const QUERY_LOG_FILE: &str = "query_log.jsonl";

/// Entries kept in memory; the JSON lines file, when configured, keeps all of them.
pub const RECENT_LOG_CAPACITY: usize = 1000;

/// Data sources and column rules from the project catalog, plus the
/// append-only query log (recent entries in memory, optionally mirrored as JSON lines).
pub struct CatalogStore {
    data_sources: Vec<DataSource>,
    rules: Vec<ColumnSecurityRule>,
    logs: Mutex<VecDeque<QueryLog>>,
    log_capacity: usize,
    log_path: Option<PathBuf>,
}

impl CatalogStore {
    pub fn new(data_sources: Vec<DataSource>, rules: Vec<ColumnSecurityRule>) -> Self {
        Self {
            data_sources,
            rules,
            logs: Mutex::new(VecDeque::new()),
            log_capacity: RECENT_LOG_CAPACITY,
            log_path: None,
        }
    }

    pub fn from_project(project: &WardenProject) -> Self {
        Self::new(project.data_sources.clone(), project.column_rules.clone())
            .with_log_file(project.target_dir().join(QUERY_LOG_FILE))
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    /// Snapshot of the most recent entries, oldest first.
    pub fn logs(&self) -> Vec<QueryLog> {
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    fn write_line(path: &Path, entry: &QueryLog) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        }
        let line = serde_json::to_string(entry).map_err(|e| StoreError::Backend(e.to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        writeln!(file, "{}", line).map_err(|e| StoreError::Backend(e.to_string()))
    }
}

#[async_trait]
impl DataSourceRepository for CatalogStore {
    async fn find_for_tenant(&self, id: &str, tenant_id: &str) -> Result<Option<DataSource>, StoreError> {
        Ok(self
            .data_sources
            .iter()
            .find(|s| s.id == id && s.tenant_id == tenant_id)
            .cloned())
    }
}

#[async_trait]
impl ColumnRuleRepository for CatalogStore {
    async fn rules_for(&self, tenant_id: &str, resource: &str) -> Result<Vec<ColumnSecurityRule>, StoreError> {
        Ok(self
            .rules
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.resource == resource)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl QueryLogRepository for CatalogStore {
    async fn append(&self, entry: &QueryLog) -> Result<(), StoreError> {
        if let Some(path) = &self.log_path {
            Self::write_line(path, entry)?;
            debug!(path = ?path, "Query log line written");
        }
        if self.log_capacity == 0 {
            return Ok(());
        }
        let mut logs = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
        while logs.len() >= self.log_capacity {
            logs.pop_front();
        }
        logs.push_back(entry.clone());
        Ok(())
    }
}

impl DataSourceAccess for CatalogStore {
    fn data_sources(&self) -> Option<&dyn DataSourceRepository> {
        Some(self)
    }

    fn column_rules(&self) -> Option<&dyn ColumnRuleRepository> {
        Some(self)
    }

    fn query_logs(&self) -> Option<&dyn QueryLogRepository> {
        Some(self)
    }
}
