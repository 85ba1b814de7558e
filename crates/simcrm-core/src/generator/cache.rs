//! TTL cache for validated generated content.
//!
//! Keyed by (theme, industry, seed, action type). Hits return a deep copy;
//! the generator re-validates every hit and evicts stale entries, so schema
//! drift or corruption degrades to a cache miss instead of bad content.
//! Constructed once and shared; `clear` exists for test isolation.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde_json::Value;

use simcrm_types::content::BOOKKEEPING_FIELDS;
use simcrm_types::job::ActionType;

use crate::clock::Clock;

/// Compound cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub theme: String,
    pub industry: String,
    pub seed: String,
    pub action: ActionType,
}

struct CacheEntry {
    payload: Value,
    stored_at: DateTime<Utc>,
}

/// Shared content cache with a time-to-live.
pub struct ContentCache {
    entries: DashMap<CacheKey, CacheEntry>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ContentCache {
    pub fn new(ttl_secs: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Duration::seconds(ttl_secs as i64),
            clock,
        }
    }

    /// Fetch a deep copy of the payload under `key`, or `None` on miss or
    /// TTL expiry (expired entries are removed).
    pub fn fetch(&self, key: &CacheKey) -> Option<Value> {
        let expired = match self.entries.get(key) {
            Some(entry) => self.clock.now() - entry.stored_at > self.ttl,
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|entry| entry.payload.clone())
    }

    /// Store a payload, stripping internal bookkeeping fields first.
    pub fn store(&self, key: CacheKey, payload: Value) {
        let mut payload = payload;
        if let Value::Object(ref mut map) = payload {
            for field in BOOKKEEPING_FIELDS {
                map.remove(*field);
            }
        }
        self.entries.insert(
            key,
            CacheEntry {
                payload,
                stored_at: self.clock.now(),
            },
        );
    }

    /// Drop one entry (used when a cached payload fails re-validation).
    pub fn evict(&self, key: &CacheKey) {
        self.entries.remove(key);
    }

    /// Drop everything (test isolation).
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn key(seed: &str) -> CacheKey {
        CacheKey {
            theme: "expansion".to_string(),
            industry: "retail".to_string(),
            seed: seed.to_string(),
            action: ActionType::Create,
        }
    }

    fn cache_with_clock() -> (ContentCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (ContentCache::new(3600, clock.clone()), clock)
    }

    #[test]
    fn test_round_trip_until_ttl() {
        let (cache, clock) = cache_with_clock();
        let payload = json!({ "first_name": "Ada", "email": "ada@ex.co" });

        cache.store(key("s1"), payload.clone());
        assert_eq!(cache.fetch(&key("s1")), Some(payload.clone()));

        // Just inside the TTL
        clock.advance(Duration::seconds(3599));
        assert_eq!(cache.fetch(&key("s1")), Some(payload));

        // Past the TTL: miss, and the entry is gone
        clock.advance(Duration::seconds(2));
        assert_eq!(cache.fetch(&key("s1")), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_fetch_returns_deep_copy() {
        let (cache, _clock) = cache_with_clock();
        cache.store(key("s1"), json!({ "name": "Initech" }));

        let mut copy = cache.fetch(&key("s1")).unwrap();
        copy["name"] = json!("mutated");

        assert_eq!(cache.fetch(&key("s1")).unwrap()["name"], "Initech");
    }

    #[test]
    fn test_bookkeeping_fields_stripped_on_store() {
        let (cache, _clock) = cache_with_clock();
        cache.store(
            key("s1"),
            json!({ "name": "Initech", "_seed": "abc", "_generated_at": "2025-01-01" }),
        );

        let fetched = cache.fetch(&key("s1")).unwrap();
        assert!(fetched.get("_seed").is_none());
        assert!(fetched.get("_generated_at").is_none());
        assert_eq!(fetched["name"], "Initech");
    }

    #[test]
    fn test_distinct_keys_do_not_collide() {
        let (cache, _clock) = cache_with_clock();
        cache.store(key("s1"), json!({ "v": 1 }));
        cache.store(key("s2"), json!({ "v": 2 }));

        assert_eq!(cache.fetch(&key("s1")).unwrap()["v"], 1);
        assert_eq!(cache.fetch(&key("s2")).unwrap()["v"], 2);
    }

    #[test]
    fn test_evict_and_clear() {
        let (cache, _clock) = cache_with_clock();
        cache.store(key("s1"), json!({}));
        cache.store(key("s2"), json!({}));

        cache.evict(&key("s1"));
        assert!(cache.fetch(&key("s1")).is_none());
        assert!(cache.fetch(&key("s2")).is_some());

        cache.clear();
        assert!(cache.is_empty());
    }
}
