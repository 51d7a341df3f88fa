// warden-core/src/infrastructure/adapters/mod.rs

pub mod catalog_store;
pub mod datafusion;
pub mod duckdb;
pub mod vault;

use std::sync::Arc;

use crate::ports::connector::ConnectorFactory;

pub use catalog_store::CatalogStore;
pub use self::datafusion::DataFusionConnectorFactory;
pub use self::duckdb::DuckDbConnectorFactory;
pub use vault::LocalVault;

/// Every provider this build can execute against.
pub fn builtin_connectors() -> Vec<Arc<dyn ConnectorFactory>> {
    vec![Arc::new(DuckDbConnectorFactory), Arc::new(DataFusionConnectorFactory)]
}
