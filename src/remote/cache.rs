use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;

/// Response cache keyed by request URL, injected into remote clients.
pub trait ResponseCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn put(&self, key: String, value: Value);
}

pub struct TtlCache {
    entries: DashMap<String, (Instant, Value)>,
    ttl: Duration,
}

impl TtlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ResponseCache for TtlCache {
    fn get(&self, key: &str) -> Option<Value> {
        let fresh = {
            let entry = self.entries.get(key)?;
            let (stored_at, value) = entry.value();
            (stored_at.elapsed() < self.ttl).then(|| value.clone())
        };

        if fresh.is_none() {
            self.entries.remove(key);
        }
        fresh
    }

    fn put(&self, key: String, value: Value) {
        self.entries.insert(key, (Instant::now(), value));
    }
}

/// Cache that never stores anything.
pub struct NoCache;

impl ResponseCache for NoCache {
    fn get(&self, _key: &str) -> Option<Value> {
        None
    }

    fn put(&self, _key: String, _value: Value) {}
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn returns_fresh_entries() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.put("a".to_string(), json!({ "distance": 1.5 }));
        assert_eq!(cache.get("a"), Some(json!({ "distance": 1.5 })));
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn expired_entries_are_evicted() {
        let cache = TtlCache::new(Duration::ZERO);
        cache.put("a".to_string(), json!(1));
        assert_eq!(cache.get("a"), None);
        assert!(cache.is_empty());
    }
}
