// warden-core/src/application/gateway.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, instrument, warn};

use crate::domain::governance::GovernanceSettings;
use crate::domain::query::{DataSource, Provider, RawResultSet};
use crate::ports::connector::{ConnectorFactory, ExecutionError, ProviderConnection};
use crate::ports::vault::SecretConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub result: RawResultSet,
    pub elapsed_ms: u64,
}

/// A failed execution, with the time spent so the audit log can record it.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{error} (after {elapsed_ms} ms)")]
pub struct ExecutionFailure {
    pub error: ExecutionError,
    pub elapsed_ms: u64,
}

/// Connections of one data source. The semaphore bounds concurrent queries;
/// idle connections are handed out one query at a time.
struct SourcePool {
    permits: Arc<Semaphore>,
    idle: StdMutex<Vec<Arc<dyn ProviderConnection>>>,
}

impl SourcePool {
    fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            idle: StdMutex::new(Vec::new()),
        }
    }

    fn take_idle(&self) -> Option<Arc<dyn ProviderConnection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).pop()
    }

    fn give_back(&self, connection: Arc<dyn ProviderConnection>) {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(connection);
    }

    fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Data source ids are only unique within a tenant.
type PoolKey = (String, String);

fn pool_key(tenant_id: &str, source_id: &str) -> PoolKey {
    (tenant_id.to_string(), source_id.to_string())
}

/// Runs final, already governed SQL against a data source: pooled
/// connections, bounded concurrency, a hard timeout and a hard row cap.
pub struct ExecutionGateway {
    factories: HashMap<Provider, Arc<dyn ConnectorFactory>>,
    pools: Mutex<HashMap<PoolKey, Arc<SourcePool>>>,
    timeout: Duration,
    max_concurrent: usize,
}

impl ExecutionGateway {
    pub fn new(connectors: Vec<Arc<dyn ConnectorFactory>>, timeout: Duration, max_concurrent: usize) -> Self {
        let factories = connectors
            .into_iter()
            .map(|factory| (factory.provider(), factory))
            .collect();
        Self {
            factories,
            pools: Mutex::new(HashMap::new()),
            timeout,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn from_settings(settings: &GovernanceSettings, connectors: Vec<Arc<dyn ConnectorFactory>>) -> Self {
        Self::new(
            connectors,
            Duration::from_millis(settings.query_timeout_ms),
            settings.max_concurrent_queries_per_source,
        )
    }

    pub fn supports(&self, provider: Provider) -> bool {
        self.factories.contains_key(&provider)
    }

    /// Idle connections currently pooled for the tenant's `source_id`.
    pub async fn idle_connections(&self, tenant_id: &str, source_id: &str) -> usize {
        self.pools
            .lock()
            .await
            .get(&pool_key(tenant_id, source_id))
            .map_or(0, |pool| pool.idle_count())
    }

    /// Drops every pooled connection of the tenant's `source_id`.
    pub async fn evict(&self, tenant_id: &str, source_id: &str) {
        if self.pools.lock().await.remove(&pool_key(tenant_id, source_id)).is_some() {
            debug!(tenant_id, data_source_id = source_id, "Connection pool evicted");
        }
    }

    #[instrument(
        skip(self, source, config, sql),
        fields(tenant_id = %source.tenant_id, data_source_id = %source.id, provider = %source.provider, sql_len = sql.len())
    )]
    pub async fn execute(
        &self,
        source: &DataSource,
        config: &SecretConfig,
        sql: &str,
        max_rows: usize,
    ) -> Result<ExecutionOutcome, ExecutionFailure> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let fail = |error: ExecutionError| ExecutionFailure {
            error,
            elapsed_ms: millis(started.elapsed()),
        };
        let timed_out = || ExecutionError::Timeout {
            after_ms: millis(self.timeout),
        };

        let Some(factory) = self.factories.get(&source.provider) else {
            return Err(fail(ExecutionError::ConnectionError(format!(
                "no connector registered for provider {}",
                source.provider
            ))));
        };
        let pool = self.pool_for(source).await;

        // Waiting for a slot counts against the timeout.
        let _permit = match timeout_at(deadline, Arc::clone(&pool.permits).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(fail(ExecutionError::ConnectionError("pool closed".into()))),
            Err(_) => {
                warn!("Timed out waiting for a connection slot");
                return Err(fail(timed_out()));
            }
        };

        let connection = match pool.take_idle() {
            Some(connection) => connection,
            None => match timeout_at(deadline, factory.connect(source, config)).await {
                Ok(Ok(connection)) => connection,
                Ok(Err(e)) => return Err(fail(e)),
                Err(_) => return Err(fail(timed_out())),
            },
        };

        match timeout_at(deadline, connection.query(sql, max_rows)).await {
            Ok(Ok(mut result)) => {
                pool.give_back(connection);
                // Never trust the provider (or the query's own LIMIT) with the cap.
                if result.rows.len() > max_rows {
                    result.rows.truncate(max_rows);
                    result.truncated = true;
                }
                result.row_count = result.rows.len();

                let elapsed_ms = millis(started.elapsed());
                debug!(rows = result.row_count, truncated = result.truncated, elapsed_ms, "Query executed");
                Ok(ExecutionOutcome { result, elapsed_ms })
            }
            Ok(Err(error)) => {
                warn!(kind = error.kind(), detail = %error, "Query failed");
                if matches!(error, ExecutionError::ConnectionError(_)) {
                    debug!("Dropping broken connection");
                } else {
                    pool.give_back(connection);
                }
                Err(fail(error))
            }
            Err(_) => {
                // The connection may still be busy; interrupt it and let it go.
                connection.cancel();
                warn!(timeout_ms = millis(self.timeout), "Query timed out and was cancelled");
                Err(fail(timed_out()))
            }
        }
    }

    async fn pool_for(&self, source: &DataSource) -> Arc<SourcePool> {
        let mut pools = self.pools.lock().await;
        let pool = pools
            .entry(pool_key(&source.tenant_id, &source.id))
            .or_insert_with(|| Arc::new(SourcePool::new(self.max_concurrent)));
        Arc::clone(pool)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
