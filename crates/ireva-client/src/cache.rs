use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;

use ireva_types::envelope::QueryKey;

#[derive(Debug, Default)]
struct CacheEntry {
    value: Option<Value>,
    stale: bool,
}

/// In-memory cache keyed by normalized query key.
///
/// `set` always overwrites — a `data_update` replaces the cached value
/// wholesale, it never merges with prior state. `invalidate` only flags the
/// entry; whoever watches the key is responsible for refetching.
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &QueryKey, value: Value) {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        entries.insert(
            key.normalized(),
            CacheEntry {
                value: Some(value),
                stale: false,
            },
        );
    }

    pub fn invalidate(&self, key: &QueryKey) {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        entries.entry(key.normalized()).or_default().stale = true;
    }

    pub fn get(&self, key: &QueryKey) -> Option<Value> {
        let entries = self.entries.read().expect("cache lock poisoned");
        entries.get(&key.normalized()).and_then(|e| e.value.clone())
    }

    pub fn is_stale(&self, key: &QueryKey) -> bool {
        let entries = self.entries.read().expect("cache lock poisoned");
        entries.get(&key.normalized()).is_some_and(|e| e.stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_overwrites_without_merging() {
        let cache = QueryCache::new();
        let key: QueryKey = "wallet".into();

        cache.set(&key, json!({"balance": 100, "currency": "NGN"}));
        cache.set(&key, json!({"balance": 500}));

        // The old `currency` field is gone: no merge.
        assert_eq!(cache.get(&key).unwrap(), json!({"balance": 500}));
    }

    #[test]
    fn set_clears_staleness() {
        let cache = QueryCache::new();
        let key: QueryKey = "wallet".into();

        cache.invalidate(&key);
        assert!(cache.is_stale(&key));

        cache.set(&key, json!({"balance": 1}));
        assert!(!cache.is_stale(&key));
    }

    #[test]
    fn invalidate_on_missing_key_records_staleness() {
        let cache = QueryCache::new();
        let key: QueryKey = vec!["wallet-transactions".to_string(), "w1".to_string()].into();

        cache.invalidate(&key);
        assert!(cache.is_stale(&key));
        assert!(cache.get(&key).is_none());
    }
}
