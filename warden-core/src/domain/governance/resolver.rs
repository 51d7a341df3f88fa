// warden-core/src/domain/governance/resolver.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::domain::governance::cache::RuleCache;
use crate::domain::governance::rule::{ColumnSecurityRule, RuleScope};
use crate::domain::query::CallerContext;
use crate::ports::storage::{DataSourceAccess, StoreError};

/// Who is asking, and for which resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityContext {
    pub tenant_id: String,
    pub user_id: String,
    pub org_unit_id: Option<String>,
    pub role: String,
    pub resource: String,
}

impl SecurityContext {
    pub fn for_caller(caller: &CallerContext, resource: impl Into<String>) -> Self {
        Self {
            tenant_id: caller.tenant_id.clone(),
            user_id: caller.user_id.clone(),
            org_unit_id: caller.org_unit_id.clone(),
            role: caller.role.clone(),
            resource: resource.into(),
        }
    }
}

#[derive(Error, Debug, Diagnostic)]
pub enum ResolveError {
    #[error("Column rules could not be loaded: {0}")]
    #[diagnostic(code(warden::resolver::store))]
    Store(#[from] StoreError),
}

/// True when `rule` targets this caller on this resource.
pub fn applies(rule: &ColumnSecurityRule, context: &SecurityContext) -> bool {
    if rule.tenant_id != context.tenant_id || rule.resource != context.resource {
        return false;
    }
    let scope_id = rule.scope_id.as_deref();
    match rule.scope {
        RuleScope::Global => true,
        RuleScope::Role => scope_id == Some(context.role.as_str()),
        RuleScope::OrgUnit => context.org_unit_id.is_some() && scope_id == context.org_unit_id.as_deref(),
        RuleScope::User => scope_id == Some(context.user_id.as_str()),
    }
}

/// One rule per column (case-insensitive): user > org unit > role > global,
/// ties broken by the most restrictive action. Ordered by column name.
pub fn select_rules(
    context: &SecurityContext,
    candidates: impl IntoIterator<Item = ColumnSecurityRule>,
) -> Vec<ColumnSecurityRule> {
    let mut winners: BTreeMap<String, ColumnSecurityRule> = BTreeMap::new();
    for rule in candidates {
        if let Err(e) = rule.validate() {
            warn!(column = %rule.column, error = %e, "Skipping invalid column rule");
            continue;
        }
        if !applies(&rule, context) {
            continue;
        }
        let column = rule.column.to_lowercase();
        match winners.get(&column) {
            Some(current) if current.rank() >= rule.rank() => {}
            _ => {
                winners.insert(column, rule);
            }
        }
    }
    winners.into_values().collect()
}

/// Loads, filters and deduplicates column rules, through the rule cache.
pub struct RuleResolver {
    access: Arc<dyn DataSourceAccess>,
    cache: RuleCache,
}

impl RuleResolver {
    pub fn new(access: Arc<dyn DataSourceAccess>, cache: RuleCache) -> Self {
        Self { access, cache }
    }

    pub fn cache(&self) -> &RuleCache {
        &self.cache
    }

    #[instrument(skip(self, context), fields(tenant_id = %context.tenant_id, resource = %context.resource))]
    pub async fn resolve(&self, context: &SecurityContext) -> Result<Vec<ColumnSecurityRule>, ResolveError> {
        if let Some(rules) = self.cache.get(context) {
            debug!(rules = rules.len(), "Column rules served from cache");
            return Ok(rules);
        }

        let Some(repository) = self.access.column_rules() else {
            warn!("Column rule repository unavailable; no column rules applied");
            return Ok(vec![]);
        };
        let candidates = repository
            .rules_for(&context.tenant_id, &context.resource)
            .await?;
        let rules = select_rules(context, candidates);

        debug!(rules = rules.len(), "Column rules resolved");
        self.cache.insert(context, rules.clone());
        Ok(rules)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::governance::rule::RuleAction;
    use crate::ports::storage::{ColumnRuleRepository, DataSourceRepository, QueryLogRepository};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StaticRules {
        rules: Vec<ColumnSecurityRule>,
        calls: AtomicUsize,
        available: bool,
    }

    #[async_trait]
    impl ColumnRuleRepository for StaticRules {
        async fn rules_for(&self, tenant_id: &str, resource: &str) -> Result<Vec<ColumnSecurityRule>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .rules
                .iter()
                .filter(|r| r.tenant_id == tenant_id && r.resource == resource)
                .cloned()
                .collect())
        }
    }

    impl DataSourceAccess for StaticRules {
        fn data_sources(&self) -> Option<&dyn DataSourceRepository> {
            None
        }
        fn column_rules(&self) -> Option<&dyn ColumnRuleRepository> {
            self.available.then_some(self as &dyn ColumnRuleRepository)
        }
        fn query_logs(&self) -> Option<&dyn QueryLogRepository> {
            None
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

    fn context(user: &str) -> SecurityContext {
        SecurityContext {
            tenant_id: "t1".into(),
            user_id: user.into(),
            org_unit_id: Some("emea".into()),
            role: "analyst".into(),
            resource: "crm".into(),
        }
    }

    fn resolver(rules: Vec<ColumnSecurityRule>, ttl: Duration) -> (Arc<StaticRules>, RuleResolver) {
        let access = Arc::new(StaticRules {
            rules,
            calls: AtomicUsize::new(0),
            available: true,
        });
        let resolver = RuleResolver::new(access.clone(), RuleCache::new(ttl, 16));
        (access, resolver)
    }

    #[test]
    fn test_user_rule_beats_global_in_any_order() {
        let user = rule("ssn", RuleScope::User, Some("u1"), RuleAction::ReadOnly);
        let global = rule("SSN", RuleScope::Global, None, RuleAction::Hide);

        for candidates in [vec![user.clone(), global.clone()], vec![global.clone(), user.clone()]] {
            let resolved = select_rules(&context("u1"), candidates);
            assert_eq!(resolved, vec![user.clone()]);
        }
        let other = select_rules(&context("u2"), vec![user.clone(), global.clone()]);
        assert_eq!(other, vec![global]);
    }

    #[test]
    fn test_full_precedence_chain() {
        let candidates = vec![
            rule("email", RuleScope::Global, None, RuleAction::Hide),
            rule("email", RuleScope::Role, Some("analyst"), RuleAction::Mask),
            rule("email", RuleScope::OrgUnit, Some("emea"), RuleAction::PartialMask),
            rule("email", RuleScope::Role, Some("admin"), RuleAction::ReadOnly),
        ];
        let resolved = select_rules(&context("u1"), candidates.clone());
        assert_eq!(resolved[0].scope, RuleScope::OrgUnit);

        let mut no_unit = context("u1");
        no_unit.org_unit_id = None;
        let resolved = select_rules(&no_unit, candidates);
        assert_eq!(resolved[0].scope, RuleScope::Role);
        assert_eq!(resolved[0].action, RuleAction::Mask);
    }

    #[test]
    fn test_ties_keep_most_restrictive_and_order_is_by_column() {
        let resolved = select_rules(
            &context("u1"),
            vec![
                rule("phone", RuleScope::Global, None, RuleAction::PartialMask),
                rule("name", RuleScope::Global, None, RuleAction::ReadOnly),
                rule("phone", RuleScope::Global, None, RuleAction::Hide),
                rule("phone", RuleScope::Global, None, RuleAction::Mask),
            ],
        );
        let summary: Vec<_> = resolved.iter().map(|r| (r.column.as_str(), r.action)).collect();
        assert_eq!(summary, vec![("name", RuleAction::ReadOnly), ("phone", RuleAction::Hide)]);
    }

    #[test]
    fn test_foreign_and_invalid_rules_are_ignored() {
        let mut foreign = rule("ssn", RuleScope::Global, None, RuleAction::Hide);
        foreign.tenant_id = "t2".into();
        let invalid = rule("ssn", RuleScope::User, None, RuleAction::Hide);
        assert!(select_rules(&context("u1"), vec![foreign, invalid]).is_empty());
    }

    #[tokio::test]
    async fn test_resolve_uses_the_cache() -> Result<()> {
        let (access, resolver) = resolver(
            vec![rule("ssn", RuleScope::Global, None, RuleAction::Mask)],
            Duration::from_secs(60),
        );
        let first = resolver.resolve(&context("u1")).await?;
        let second = resolver.resolve(&context("u1")).await?;
        assert_eq!(first, second);
        assert_eq!(access.calls.load(Ordering::SeqCst), 1);

        resolver.resolve(&context("u2")).await?;
        assert_eq!(access.calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_repository_yields_no_rules() -> Result<()> {
        let access = Arc::new(StaticRules {
            rules: vec![rule("ssn", RuleScope::Global, None, RuleAction::Hide)],
            calls: AtomicUsize::new(0),
            available: false,
        });
        let resolver = RuleResolver::new(access, RuleCache::disabled());
        assert!(resolver.resolve(&context("u1")).await?.is_empty());
        Ok(())
    }
}
