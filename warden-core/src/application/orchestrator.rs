// warden-core/src/application/orchestrator.rs

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::application::error::{PipelineError, RecoveredIssue};
use crate::application::gateway::ExecutionGateway;
use crate::application::stage::{PipelineStage, StageTrail};
use crate::domain::error::{DomainError, GuardError};
use crate::domain::governance::{
    ColumnLineage, GovernanceSettings, MaskingEngine, ResolveError, RuleCache, RuleResolver, SecurityContext,
};
use crate::domain::optimizer::{HeuristicOptimizer, OptimizerContext, QueryOptimizer};
use crate::domain::query::model::excerpt;
use crate::domain::query::{
    CallerContext, DataSource, GovernedResultSet, PerformanceReport, QueryLog, QueryRequest, QueryStatus,
};
use crate::domain::tenancy::{GuardPolicy, TenantGuard};
use crate::ports::connector::ConnectorFactory;
use crate::ports::storage::DataSourceAccess;
use crate::ports::vault::CredentialVault;

/// What the audit entry of one request needs, filled in as stages complete.
struct RunRecord {
    trail: StageTrail,
    query_text: String,
    elapsed_ms: u64,
    row_count: usize,
}

/// The single entry point for ad-hoc queries:
/// guard, optimize, re-validate, execute, mask, log.
pub struct GovernanceOrchestrator {
    settings: GovernanceSettings,
    access: Arc<dyn DataSourceAccess>,
    vault: Arc<dyn CredentialVault>,
    optimizer: Arc<dyn QueryOptimizer>,
    gateway: ExecutionGateway,
    resolver: RuleResolver,
    masking: MaskingEngine,
}

impl GovernanceOrchestrator {
    pub fn new(
        settings: GovernanceSettings,
        access: Arc<dyn DataSourceAccess>,
        vault: Arc<dyn CredentialVault>,
        connectors: Vec<Arc<dyn ConnectorFactory>>,
    ) -> Result<Self, DomainError> {
        let cache = RuleCache::new(
            Duration::from_secs(settings.rule_cache_ttl_secs),
            settings.rule_cache_capacity,
        );
        Ok(Self {
            masking: MaskingEngine::new(&settings.masking)?,
            gateway: ExecutionGateway::from_settings(&settings, connectors),
            resolver: RuleResolver::new(Arc::clone(&access), cache),
            optimizer: Arc::new(HeuristicOptimizer::new()),
            settings,
            access,
            vault,
        })
    }

    pub fn with_optimizer(mut self, optimizer: Arc<dyn QueryOptimizer>) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn settings(&self) -> &GovernanceSettings {
        &self.settings
    }

    pub fn gateway(&self) -> &ExecutionGateway {
        &self.gateway
    }

    pub fn resolver(&self) -> &RuleResolver {
        &self.resolver
    }

    pub fn rule_cache(&self) -> &RuleCache {
        self.resolver.cache()
    }

    /// Guard for one data source: its tenant column, the configured deny-list.
    pub fn guard_for(&self, source: &DataSource) -> Result<TenantGuard, GuardError> {
        TenantGuard::new(GuardPolicy {
            tenant_column: source.tenant_column.clone(),
            denied_keywords: self.settings.denied_keywords.clone(),
        })
    }

    #[instrument(
        skip(self, caller, request),
        fields(
            tenant_id = %caller.tenant_id,
            user_id = %caller.user_id,
            data_source_id = %request.data_source_id,
            query_len = request.query.len()
        )
    )]
    pub async fn run(
        &self,
        caller: &CallerContext,
        request: QueryRequest,
    ) -> Result<GovernedResultSet, PipelineError> {
        let mut record = RunRecord {
            trail: StageTrail::new(),
            query_text: request.query.clone(),
            elapsed_ms: 0,
            row_count: 0,
        };

        let outcome = self.govern(caller, &request, &mut record).await;
        match &outcome {
            Ok(result) => {
                record.row_count = result.row_count;
                record.trail.advance(PipelineStage::Logged);
                self.write_log(caller, &request, &record, None).await;
                record.trail.advance(PipelineStage::Returned);
                info!(rows = result.row_count, elapsed_ms = result.execution_time_ms, "Governed query returned");
            }
            Err(error) => {
                // a query that reached the engine is logged before it is rejected
                if record.trail.current() == PipelineStage::Executed {
                    record.trail.advance(PipelineStage::Logged);
                }
                let stage = record.trail.current();
                self.write_log(caller, &request, &record, Some(error)).await;
                record.trail.advance(PipelineStage::Rejected);
                warn!(%stage, server_error = error.is_server_error(), error = %error, "Governed query rejected");
            }
        }
        outcome
    }

    async fn govern(
        &self,
        caller: &CallerContext,
        request: &QueryRequest,
        record: &mut RunRecord,
    ) -> Result<GovernedResultSet, PipelineError> {
        if caller.tenant_id.trim().is_empty() {
            return Err(GuardError::MissingTenantContext("caller session carries no tenant id".into()).into());
        }
        let source = self.load_source(&request.data_source_id, &caller.tenant_id).await?;
        record.trail.advance(PipelineStage::Validated);

        // 1. Guard
        let guard = self.guard_for(&source)?;
        let secured = guard.secure(&request.query, &caller.tenant_id)?;
        record.trail.advance(PipelineStage::Secured);
        record.query_text = secured.text.clone();

        let mut performance = PerformanceReport {
            tenant_predicate_injected: secured.tenant_predicate_injected,
            ..PerformanceReport::default()
        };

        // 2. Optimizer (advisory; its output is re-validated before use)
        let mut final_text = secured.text.clone();
        let mut plan_summary = None;
        if request.optimize.unwrap_or(self.settings.optimize_by_default) {
            let context = OptimizerContext {
                provider: source.provider,
                max_rows: self.settings.max_rows,
            };
            match self.optimizer.optimize(&secured, &context) {
                Ok(plan) => {
                    let check = guard.validate(&plan.optimized_query_text, &secured.tenant_id);
                    if check.valid {
                        final_text = plan.optimized_query_text.clone();
                        performance.optimization_applied = true;
                    } else {
                        let reason = check.reason.unwrap_or_default();
                        recover(&mut performance, RecoveredIssue::OptimizationRegression(reason));
                    }
                    plan_summary = Some(plan.summary());
                }
                Err(e) => recover(&mut performance, RecoveredIssue::OptimizationRegression(e.to_string())),
            }
            record.trail.advance(PipelineStage::Optimized);
        }

        // 3. Final gate: nothing unproven reaches a connection
        let check = guard.validate(&final_text, &secured.tenant_id);
        if !check.valid {
            return Err(GuardError::UnparseableStructure(format!(
                "final query failed tenant validation: {}",
                check.reason.unwrap_or_default()
            ))
            .into());
        }
        record.query_text = final_text.clone();

        // 4. Column rules; masking by result name must see every restricted value
        let context = SecurityContext::for_caller(caller, source.resource());
        let rules = self.resolver.resolve(&context).await.map_err(|e| match e {
            ResolveError::Store(e) => PipelineError::Storage(e),
        })?;
        ColumnLineage::new(&rules).check(&final_text)?;

        // 5. Execution; the decrypted config does not outlive this block
        let executed = {
            let secret = self.vault.decrypt(&source.encrypted_config)?;
            record.trail.advance(PipelineStage::Executed);
            self.gateway
                .execute(&source, &secret, &final_text, self.settings.max_rows)
                .await
        };
        let outcome = match executed {
            Ok(outcome) => outcome,
            Err(failure) => {
                record.elapsed_ms = failure.elapsed_ms;
                return Err(failure.error.into());
            }
        };
        record.elapsed_ms = outcome.elapsed_ms;

        // 6. Masking
        let masked = self
            .masking
            .apply_table(&outcome.result.columns, &outcome.result.rows, &rules);
        record.trail.advance(PipelineStage::Masked);
        debug!(
            rules = rules.len(),
            hidden = masked.hidden_columns,
            masked = masked.masked_columns,
            "Column rules applied"
        );

        performance.truncated = outcome.result.truncated;
        performance.hidden_columns = masked.hidden_columns;
        performance.masked_columns = masked.masked_columns;
        if outcome.result.truncated {
            performance
                .warnings
                .push(format!("result truncated to {} rows", self.settings.max_rows));
        }

        Ok(GovernedResultSet {
            columns: masked.columns,
            row_count: masked.rows.len(),
            rows: masked.rows,
            execution_time_ms: outcome.elapsed_ms,
            performance,
            optimization_plan: plan_summary,
        })
    }

    async fn load_source(&self, id: &str, tenant_id: &str) -> Result<DataSource, PipelineError> {
        let repository = self
            .access
            .data_sources()
            .ok_or_else(|| PipelineError::FeatureUnavailable("data source repository".into()))?;
        let source = repository
            .find_for_tenant(id, tenant_id)
            .await?
            .ok_or_else(|| PipelineError::DataSourceNotFound(id.to_string()))?;
        if !source.is_active() {
            return Err(PipelineError::DataSourceUnavailable(id.to_string()));
        }
        Ok(source)
    }

    /// Exactly one entry per request. Failures here never change the outcome.
    async fn write_log(
        &self,
        caller: &CallerContext,
        request: &QueryRequest,
        record: &RunRecord,
        error: Option<&PipelineError>,
    ) {
        let entry = QueryLog {
            tenant_id: caller.tenant_id.clone(),
            user_id: caller.user_id.clone(),
            data_source_id: request.data_source_id.clone(),
            query_text_excerpt: excerpt(&record.query_text, self.settings.log_excerpt_chars),
            row_count: record.row_count,
            execution_time_ms: record.elapsed_ms,
            status: if error.is_some() {
                QueryStatus::Error
            } else {
                QueryStatus::Success
            },
            error_message: error.map(|e| e.to_string()),
            created_at: Utc::now(),
        };

        let issue = match self.access.query_logs() {
            Some(logs) => match logs.append(&entry).await {
                Ok(()) => return,
                Err(e) => RecoveredIssue::LoggingFailure(e.to_string()),
            },
            None => RecoveredIssue::LoggingFailure("query log repository unavailable".into()),
        };
        warn!(issue = %issue, "Recovered pipeline issue");
    }
}

fn recover(performance: &mut PerformanceReport, issue: RecoveredIssue) {
    warn!(issue = %issue, "Recovered pipeline issue; executing the secured query");
    performance.optimization_fallback = true;
    performance.warnings.push(issue.to_string());
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::domain::governance::{ColumnSecurityRule, RuleAction, RuleScope};
    use crate::domain::optimizer::OptimizerError;
    use crate::domain::query::{DataSourceStatus, EncryptedConfig, OptimizationPlan, Provider, SecuredQuery};
    use crate::infrastructure::adapters::{CatalogStore, LocalVault, builtin_connectors};
    use crate::ports::connector::ExecutionError;
    use crate::ports::storage::{ColumnRuleRepository, DataSourceRepository, QueryLogRepository};
    use anyhow::Result;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: Arc<CatalogStore>,
        orchestrator: GovernanceOrchestrator,
    }

    fn seed(path: &std::path::Path) -> Result<()> {
        let conn = duckdb::Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE invoices (id INTEGER, tenant_id VARCHAR, total DOUBLE, ssn VARCHAR);
             INSERT INTO invoices VALUES
               (1, 't1', 120.0, '123-45-6789'),
               (2, 't1', 80.0, '987-65-4321'),
               (3, 't2', 999.0, '555-55-5555');
             CREATE TABLE a (id INTEGER, tenant_id VARCHAR);
             INSERT INTO a VALUES (1, 't1'), (2, 't2');
             CREATE TABLE b (id INTEGER, tenant_id VARCHAR);
             INSERT INTO b VALUES (3, 't1'), (4, 't2');",
        )?;
        Ok(())
    }

    fn data_source(id: &str, tenant: &str, path: &std::path::Path) -> DataSource {
        DataSource {
            id: id.into(),
            tenant_id: tenant.into(),
            name: "CRM".into(),
            provider: Provider::DuckDb,
            encrypted_config: EncryptedConfig::new(format!(
                "plain:{}",
                json!({ "path": path.to_string_lossy(), "read_only": true })
            )),
            status: DataSourceStatus::Active,
            tenant_column: "tenant_id".into(),
            resource: Some("crm".into()),
        }
    }

    fn rule(column: &str, scope: RuleScope, scope_id: Option<&str>, action: RuleAction) -> ColumnSecurityRule {
        ColumnSecurityRule {
            tenant_id: "t1".into(),
            resource: "crm".into(),
            column: column.into(),
            scope,
            scope_id: scope_id.map(Into::into),
            action,
            masking_type: None,
            masking_config: None,
        }
    }

    fn fixture_for(tenant: &str) -> Result<Fixture> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("crm.duckdb");
        seed(&path)?;

        let mut archived = data_source("archive", tenant, &path);
        archived.status = DataSourceStatus::Inactive;
        let store = Arc::new(CatalogStore::new(
            vec![data_source("crm", tenant, &path), archived],
            vec![
                rule("ssn", RuleScope::Global, None, RuleAction::Mask),
                rule("ssn", RuleScope::User, Some("reader"), RuleAction::ReadOnly),
                rule("total", RuleScope::Role, Some("intern"), RuleAction::Hide),
            ],
        ));
        let orchestrator = GovernanceOrchestrator::new(
            GovernanceSettings::default(),
            store.clone(),
            Arc::new(LocalVault::new()),
            builtin_connectors(),
        )?;
        Ok(Fixture {
            _dir: dir,
            store,
            orchestrator,
        })
    }

    fn fixture() -> Result<Fixture> {
        fixture_for("t1")
    }

    fn caller(tenant: &str, user: &str, role: &str) -> CallerContext {
        CallerContext {
            tenant_id: tenant.into(),
            user_id: user.into(),
            role: role.into(),
            org_unit_id: None,
        }
    }

    fn request(sql: &str, optimize: Option<bool>) -> QueryRequest {
        QueryRequest {
            data_source_id: "crm".into(),
            query: sql.into(),
            optimize,
        }
    }

    fn column<'a>(result: &'a GovernedResultSet, name: &str) -> Vec<&'a Value> {
        let idx = result.columns.iter().position(|c| c == name).unwrap();
        result.rows.iter().map(|row| &row[idx]).collect()
    }

    #[tokio::test]
    async fn test_scenario_a_unfiltered_select_is_wrapped() -> Result<()> {
        let fx = fixture()?;
        for optimize in [Some(false), Some(true)] {
            let result = fx
                .orchestrator
                .run(&caller("t1", "u1", "analyst"), request("SELECT * FROM invoices", optimize))
                .await?;

            assert_eq!(result.row_count, 2);
            assert!(column(&result, "tenant_id").iter().all(|v| **v == json!("t1")));
            assert!(result.performance.tenant_predicate_injected);
        }

        let logs = fx.store.logs();
        assert_eq!(logs.len(), 2);
        assert!(logs[0].query_text_excerpt.contains("__tenant_scope"));
        assert!(logs.iter().all(|l| l.status == QueryStatus::Success));
        Ok(())
    }

    #[tokio::test]
    async fn test_scenario_b_every_union_branch_is_scoped() -> Result<()> {
        let fx = fixture()?;
        let sql = "SELECT * FROM a WHERE 1=1 UNION SELECT * FROM b";
        // "reader" has no masking rule left, so '*' across branches is allowed
        let result = fx
            .orchestrator
            .run(&caller("t1", "reader", "analyst"), request(sql, None))
            .await?;

        let mut ids: Vec<i64> = column(&result, "id").iter().filter_map(|v| v.as_i64()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 3]);

        // with the global ssn mask, positional column names cannot be trusted
        let err = fx
            .orchestrator
            .run(&caller("t1", "u1", "analyst"), request(sql, None))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Rejected(GuardError::RestrictedColumn(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_scenario_c_ddl_is_rejected_and_logged() -> Result<()> {
        let fx = fixture()?;
        let err = fx
            .orchestrator
            .run(&caller("t1", "u1", "analyst"), request("DROP TABLE invoices", None))
            .await
            .unwrap_err();

        assert!(matches!(
            &err,
            PipelineError::Rejected(GuardError::ForbiddenStatement { keyword }) if keyword == "DROP"
        ));
        assert_eq!(fx.orchestrator.gateway().idle_connections("t1", "crm").await, 0);

        let logs = fx.store.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, QueryStatus::Error);
        assert!(logs[0].error_message.as_deref().unwrap_or_default().contains("DROP"));

        // the table is still there
        let result = fx
            .orchestrator
            .run(&caller("t1", "u1", "analyst"), request("SELECT id FROM invoices", None))
            .await?;
        assert_eq!(result.row_count, 2);
        Ok(())
    }

    /// Returns a plan without the tenant filter.
    struct RogueOptimizer;

    impl QueryOptimizer for RogueOptimizer {
        fn optimize(&self, _query: &SecuredQuery, _context: &OptimizerContext) -> Result<OptimizationPlan, OptimizerError> {
            Ok(OptimizationPlan {
                optimized_query_text: "SELECT * FROM invoices".into(),
                estimated_rows: 1,
                estimated_cost: 0.5,
                warnings: vec![],
                applied_rewrites: vec!["drop_filter".into()],
            })
        }
    }

    #[tokio::test]
    async fn test_scenario_d_regressing_optimizer_falls_back() -> Result<()> {
        let fx = fixture()?;
        let orchestrator = fx.orchestrator.with_optimizer(Arc::new(RogueOptimizer));
        let result = orchestrator
            .run(
                &caller("t1", "u1", "analyst"),
                request("SELECT id, tenant_id FROM invoices WHERE tenant_id = 't1'", Some(true)),
            )
            .await?;

        assert_eq!(result.row_count, 2);
        assert!(column(&result, "tenant_id").iter().all(|v| **v == json!("t1")));
        assert!(result.performance.optimization_fallback);
        assert!(!result.performance.optimization_applied);
        assert!(result.performance.warnings[0].starts_with("optimized query discarded"));
        assert!(result.optimization_plan.is_some());

        let logs = fx.store.logs();
        assert!(logs[0].query_text_excerpt.contains("tenant_id = 't1'"));
        Ok(())
    }

    #[tokio::test]
    async fn test_scenario_e_user_rule_overrides_global_mask() -> Result<()> {
        let fx = fixture()?;
        let sql = "SELECT id, ssn FROM invoices WHERE tenant_id = 't1' ORDER BY id";

        let reader = fx
            .orchestrator
            .run(&caller("t1", "reader", "analyst"), request(sql, None))
            .await?;
        assert_eq!(column(&reader, "ssn")[0], &json!("123-45-6789"));
        assert_eq!(reader.performance.masked_columns, 0);

        let other = fx
            .orchestrator
            .run(&caller("t1", "someone", "analyst"), request(sql, None))
            .await?;
        assert!(column(&other, "ssn").iter().all(|v| **v == json!("****")));
        assert_eq!(other.performance.masked_columns, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_renamed_restricted_column_is_refused_before_execution() -> Result<()> {
        let fx = fixture()?;
        for sql in [
            "SELECT id, ssn, ssn AS s FROM invoices",
            "SELECT id, total AS x FROM invoices",
            "SELECT id, upper(ssn) FROM invoices",
            "SELECT i FROM invoices i",
        ] {
            let err = fx
                .orchestrator
                .run(&caller("t1", "u1", "intern"), request(sql, None))
                .await
                .unwrap_err();
            assert!(
                matches!(err, PipelineError::Rejected(GuardError::RestrictedColumn(_))),
                "{sql} -> {err:?}"
            );
            assert!(!err.is_server_error());
        }

        let logs = fx.store.logs();
        assert_eq!(logs.len(), 4);
        assert!(logs.iter().all(|l| l.status == QueryStatus::Error && l.row_count == 0));

        // under its own name the column is masked as usual
        let result = fx
            .orchestrator
            .run(
                &caller("t1", "u1", "intern"),
                request("SELECT id, upper(ssn) AS ssn FROM invoices ORDER BY id", None),
            )
            .await?;
        assert!(column(&result, "ssn").iter().all(|v| **v == json!("****")));
        Ok(())
    }

    #[tokio::test]
    async fn test_sources_sharing_an_id_stay_apart() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (first, second) = (dir.path().join("t1.duckdb"), dir.path().join("t2.duckdb"));
        seed(&first)?;
        duckdb::Connection::open(&second)?.execute_batch(
            "CREATE TABLE invoices (id INTEGER, tenant_id VARCHAR, total DOUBLE, ssn VARCHAR);
             INSERT INTO invoices VALUES (9, 't2', 1.0, '999-99-9999');",
        )?;

        let store = Arc::new(CatalogStore::new(
            vec![data_source("crm", "t1", &first), data_source("crm", "t2", &second)],
            vec![],
        ));
        let orchestrator = GovernanceOrchestrator::new(
            GovernanceSettings::default(),
            store,
            Arc::new(LocalVault::new()),
            builtin_connectors(),
        )?;

        let sql = "SELECT id FROM invoices ORDER BY id";
        let t1 = orchestrator.run(&caller("t1", "u1", "analyst"), request(sql, None)).await?;
        let t2 = orchestrator.run(&caller("t2", "u2", "analyst"), request(sql, None)).await?;

        assert_eq!(column(&t1, "id"), vec![&json!(1), &json!(2)]);
        assert_eq!(column(&t2, "id"), vec![&json!(9)]);
        assert_eq!(orchestrator.gateway().idle_connections("t1", "crm").await, 1);
        assert_eq!(orchestrator.gateway().idle_connections("t2", "crm").await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_hidden_columns_vanish() -> Result<()> {
        let fx = fixture()?;
        let result = fx
            .orchestrator
            .run(&caller("t1", "u1", "intern"), request("SELECT * FROM invoices", None))
            .await?;

        assert!(!result.columns.iter().any(|c| c == "total"));
        assert!(result.rows.iter().all(|row| row.len() == result.columns.len()));
        assert_eq!(result.performance.hidden_columns, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_other_tenant_sees_only_its_rows() -> Result<()> {
        let fx = fixture_for("t2")?;
        let result = fx
            .orchestrator
            .run(&caller("t2", "u9", "analyst"), request("SELECT id FROM invoices", None))
            .await?;
        assert_eq!(column(&result, "id"), vec![&json!(3)]);
        Ok(())
    }

    #[tokio::test]
    async fn test_execution_failure_is_logged_with_generic_message() -> Result<()> {
        let fx = fixture()?;
        let err = fx
            .orchestrator
            .run(
                &caller("t1", "u1", "analyst"),
                request("SELECT * FROM payroll WHERE tenant_id = 't1'", None),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Execution(ExecutionError::QuerySyntaxError(_))));
        assert!(!err.public_message().contains("payroll"));

        let logs = fx.store.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, QueryStatus::Error);
        Ok(())
    }

    #[tokio::test]
    async fn test_lookup_failures() -> Result<()> {
        let fx = fixture()?;
        let missing_tenant = fx
            .orchestrator
            .run(&caller("", "u1", "analyst"), request("SELECT 1", None))
            .await
            .unwrap_err();
        assert!(missing_tenant.is_server_error());

        let foreign = fx
            .orchestrator
            .run(&caller("t2", "u1", "analyst"), request("SELECT id FROM invoices", None))
            .await
            .unwrap_err();
        assert!(matches!(foreign, PipelineError::DataSourceNotFound(_)));

        let mut archived = request("SELECT id FROM invoices", None);
        archived.data_source_id = "archive".into();
        let inactive = fx
            .orchestrator
            .run(&caller("t1", "u1", "analyst"), archived)
            .await
            .unwrap_err();
        assert!(matches!(inactive, PipelineError::DataSourceUnavailable(_)));

        assert_eq!(fx.store.logs().len(), 3);
        Ok(())
    }

    /// Same catalog, no query log capability.
    struct WithoutLogs(Arc<CatalogStore>);

    impl DataSourceAccess for WithoutLogs {
        fn data_sources(&self) -> Option<&dyn DataSourceRepository> {
            self.0.data_sources()
        }
        fn column_rules(&self) -> Option<&dyn ColumnRuleRepository> {
            self.0.column_rules()
        }
        fn query_logs(&self) -> Option<&dyn QueryLogRepository> {
            None
        }
    }

    #[tokio::test]
    async fn test_missing_log_repository_never_fails_the_request() -> Result<()> {
        let fx = fixture()?;
        let orchestrator = GovernanceOrchestrator::new(
            GovernanceSettings::default(),
            Arc::new(WithoutLogs(fx.store.clone())),
            Arc::new(LocalVault::new()),
            builtin_connectors(),
        )?;
        let result = orchestrator
            .run(&caller("t1", "u1", "analyst"), request("SELECT id FROM invoices", None))
            .await?;
        assert_eq!(result.row_count, 2);
        assert!(fx.store.logs().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_row_cap_is_reported() -> Result<()> {
        let fx = fixture()?;
        let settings = GovernanceSettings {
            max_rows: 1,
            ..GovernanceSettings::default()
        };
        let orchestrator = GovernanceOrchestrator::new(
            settings,
            fx.store.clone(),
            Arc::new(LocalVault::new()),
            builtin_connectors(),
        )?;
        let result = orchestrator
            .run(
                &caller("t1", "u1", "analyst"),
                request("SELECT id FROM invoices WHERE tenant_id = 't1' LIMIT 50", Some(false)),
            )
            .await?;
        assert_eq!(result.row_count, 1);
        assert!(result.performance.truncated);
        Ok(())
    }
}
