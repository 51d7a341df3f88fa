// warden-core/src/domain/governance/cache.rs

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::domain::governance::resolver::SecurityContext;
use crate::domain::governance::rule::ColumnSecurityRule;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    tenant_id: String,
    user_id: String,
    resource: String,
}

impl CacheKey {
    fn of(context: &SecurityContext) -> Self {
        Self {
            tenant_id: context.tenant_id.clone(),
            user_id: context.user_id.clone(),
            resource: context.resource.clone(),
        }
    }
}

struct CachedRules {
    rules: Vec<ColumnSecurityRule>,
    role: String,
    org_unit_id: Option<String>,
    stored_at: Instant,
}

/// Resolved rules per (tenant, user, resource), kept for a bounded TTL.
/// A hit also requires the role and org unit the rules were resolved for,
/// so a role change is never served stale rules.
pub struct RuleCache {
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<CacheKey, CachedRules>>,
}

impl RuleCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, 1)
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    pub fn get(&self, context: &SecurityContext) -> Option<Vec<ColumnSecurityRule>> {
        self.get_at(context, Instant::now())
    }

    pub fn insert(&self, context: &SecurityContext, rules: Vec<ColumnSecurityRule>) {
        self.insert_at(context, rules, Instant::now());
    }

    pub fn invalidate_tenant(&self, tenant_id: &str) {
        self.lock().retain(|key, _| key.tenant_id != tenant_id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_at(&self, context: &SecurityContext, now: Instant) -> Option<Vec<ColumnSecurityRule>> {
        if !self.is_enabled() {
            return None;
        }
        let mut entries = self.lock();
        let key = CacheKey::of(context);
        let entry = entries.get(&key)?;
        if now.saturating_duration_since(entry.stored_at) >= self.ttl {
            entries.remove(&key);
            return None;
        }
        if entry.role != context.role || entry.org_unit_id != context.org_unit_id {
            return None;
        }
        Some(entry.rules.clone())
    }

    fn insert_at(&self, context: &SecurityContext, rules: Vec<ColumnSecurityRule>, now: Instant) {
        if !self.is_enabled() {
            return;
        }
        let ttl = self.ttl;
        let mut entries = self.lock();
        entries.retain(|_, entry| now.saturating_duration_since(entry.stored_at) < ttl);

        let key = CacheKey::of(context);
        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key,
            CachedRules {
                rules,
                role: context.role.clone(),
                org_unit_id: context.org_unit_id.clone(),
                stored_at: now,
            },
        );
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, CachedRules>> {
        // entries are replaced whole, so a poisoned map is still consistent
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
