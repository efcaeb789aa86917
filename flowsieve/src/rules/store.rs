// flowsieve/src/rules/store.rs
//
// Rule sources consumed by the engine. The engine asks for a tenant's active
// rules on every prediction; caching is opt-in and must be invalidated by
// whoever mutates the rules.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::RuleError;
use crate::events::{Rule, TenantId};

pub trait RuleStore: Send + Sync {
    /// Active rules owned by `tenant`, in evaluation order.
    fn fetch_active_rules(&self, tenant: TenantId) -> Result<Vec<Rule>, RuleError>;
}

fn active_for(rules: &[Rule], tenant: TenantId) -> Vec<Rule> {
    rules.iter().filter(|r| r.active && r.owner == tenant).cloned().collect()
}

// ── In-memory ─────────────────────────────────────────────────────────────────

/// Mutable rule list, ordered by insertion.
#[derive(Default)]
pub struct MemoryRuleStore {
    rules: RwLock<Vec<Rule>>,
}

impl MemoryRuleStore {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules: RwLock::new(rules) }
    }

    /// Insert or replace (by id).
    pub fn upsert(&self, rule: Rule) {
        let mut rules = self.rules.write();
        match rules.iter_mut().find(|r| r.id == rule.id) {
            Some(slot) => *slot = rule,
            None => rules.push(rule),
        }
    }

    pub fn remove(&self, id: i64) -> Option<Rule> {
        let mut rules = self.rules.write();
        let pos = rules.iter().position(|r| r.id == id)?;
        Some(rules.remove(pos))
    }

    pub fn all(&self) -> Vec<Rule> {
        self.rules.read().clone()
    }
}

impl RuleStore for MemoryRuleStore {
    fn fetch_active_rules(&self, tenant: TenantId) -> Result<Vec<Rule>, RuleError> {
        Ok(active_for(&self.rules.read(), tenant))
    }
}

// ── JSON file ─────────────────────────────────────────────────────────────────

/// JSON array of rules, re-read on every fetch so edits apply without restart.
pub struct JsonRuleStore {
    path: PathBuf,
}

impl JsonRuleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load_all(&self) -> Result<Vec<Rule>, RuleError> {
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| RuleError::Store(format!("{}: {e}", self.path.display())))?;
        serde_json::from_str(&content).map_err(|e| RuleError::Store(format!("{}: {e}", self.path.display())))
    }
}

impl RuleStore for JsonRuleStore {
    fn fetch_active_rules(&self, tenant: TenantId) -> Result<Vec<Rule>, RuleError> {
        Ok(active_for(&self.load_all()?, tenant))
    }
}

// ── Cache ─────────────────────────────────────────────────────────────────────

/// Per-tenant cache in front of another store. Nothing expires on its own.
pub struct CachedRuleStore<S> {
    inner: S,
    cache: DashMap<TenantId, Arc<Vec<Rule>>>,
}

impl<S: RuleStore> CachedRuleStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, cache: DashMap::new() }
    }

    pub fn invalidate(&self, tenant: TenantId) {
        self.cache.remove(&tenant);
    }

    pub fn invalidate_all(&self) {
        self.cache.clear();
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: RuleStore> RuleStore for CachedRuleStore<S> {
    fn fetch_active_rules(&self, tenant: TenantId) -> Result<Vec<Rule>, RuleError> {
        if let Some(hit) = self.cache.get(&tenant) {
            return Ok(hit.as_ref().clone());
        }
        let rules = Arc::new(self.inner.fetch_active_rules(tenant)?);
        debug!(tenant, count = rules.len(), "rule cache filled");
        self.cache.insert(tenant, Arc::clone(&rules));
        Ok(rules.as_ref().clone())
    }
}

/// No rules at all.
pub struct EmptyRuleStore;

impl RuleStore for EmptyRuleStore {
    fn fetch_active_rules(&self, _tenant: TenantId) -> Result<Vec<Rule>, RuleError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RuleKind;
    use std::io::Write;

    #[test]
    fn memory_store_filters_and_mutates() {
        let store = MemoryRuleStore::default();
        store.upsert(Rule::new(1, "a", RuleKind::Protocol, "TCP", 7));
        store.upsert(Rule::new(2, "b", RuleKind::Protocol, "UDP", 8));
        assert_eq!(store.fetch_active_rules(7).unwrap().len(), 1);

        let mut off = Rule::new(1, "a", RuleKind::Protocol, "TCP", 7);
        off.active = false;
        store.upsert(off);
        assert!(store.fetch_active_rules(7).unwrap().is_empty());
        assert_eq!(store.all().len(), 2);
        assert!(store.remove(2).is_some());
        assert!(store.remove(2).is_none());
    }

    #[test]
    fn json_store_reads_file_each_time() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"id":1,"name":"lan","rule_type":"ip","rule_value":"10.0.0.0/8","owner":1}}]"#).unwrap();
        let store = JsonRuleStore::new(file.path());
        assert_eq!(store.fetch_active_rules(1).unwrap()[0].name, "lan");
        assert!(store.fetch_active_rules(2).unwrap().is_empty());

        std::fs::write(file.path(), "not json").unwrap();
        assert!(matches!(store.fetch_active_rules(1), Err(RuleError::Store(_))));
    }

    #[test]
    fn cache_serves_stale_until_invalidated() {
        let cached = CachedRuleStore::new(MemoryRuleStore::new(vec![Rule::new(1, "a", RuleKind::Protocol, "TCP", 1)]));
        assert_eq!(cached.fetch_active_rules(1).unwrap().len(), 1);

        cached.inner().upsert(Rule::new(2, "b", RuleKind::Protocol, "UDP", 1));
        assert_eq!(cached.fetch_active_rules(1).unwrap().len(), 1);

        cached.invalidate(1);
        assert_eq!(cached.fetch_active_rules(1).unwrap().len(), 2);
    }
}
