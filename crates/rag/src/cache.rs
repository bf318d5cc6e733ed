//! Stale-while-revalidate cache for C5 responses, keyed by
//! `(tenantId, siteId, hash(query), locale)`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::retriever::RetrievalResponse;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub tenant_id: String,
    pub site_id: String,
    pub query_hash: u64,
    pub locale: String,
}

impl CacheKey {
    pub fn new(tenant_id: &str, site_id: &str, query: &str, locale: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        query.hash(&mut hasher);
        Self {
            tenant_id: tenant_id.to_string(),
            site_id: site_id.to_string(),
            query_hash: hasher.finish(),
            locale: locale.to_string(),
        }
    }
}

struct Entry {
    response: Arc<RetrievalResponse>,
    inserted_at: Instant,
}

/// Returned from [`RetrievalCache::get`]: the cached response plus whether it
/// is past its TTL and should be revalidated in the background.
pub struct CacheLookup {
    pub response: Arc<RetrievalResponse>,
    pub stale: bool,
}

pub struct RetrievalCache {
    entries: DashMap<CacheKey, Entry>,
    ttl: Duration,
}

impl RetrievalCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: DashMap::new(), ttl }
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheLookup> {
        self.entries.get(key).map(|entry| CacheLookup {
            response: Arc::clone(&entry.response),
            stale: entry.inserted_at.elapsed() >= self.ttl,
        })
    }

    pub fn insert(&self, key: CacheKey, response: Arc<RetrievalResponse>) {
        self.entries.insert(key, Entry { response, inserted_at: Instant::now() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retriever::{FusionStats, StrategyStats};

    fn response() -> Arc<RetrievalResponse> {
        Arc::new(RetrievalResponse {
            items: vec![],
            strategies: StrategyStats::default(),
            fusion: FusionStats::default(),
        })
    }

    #[test]
    fn fresh_entry_is_not_stale() {
        let cache = RetrievalCache::new(Duration::from_secs(60));
        let key = CacheKey::new("t1", "s1", "shipping", "en-US");
        cache.insert(key.clone(), response());

        let lookup = cache.get(&key).unwrap();
        assert!(!lookup.stale);
    }

    #[test]
    fn expired_entry_is_marked_stale_but_still_returned() {
        let cache = RetrievalCache::new(Duration::from_millis(0));
        let key = CacheKey::new("t1", "s1", "shipping", "en-US");
        cache.insert(key.clone(), response());

        std::thread::sleep(Duration::from_millis(5));
        let lookup = cache.get(&key).unwrap();
        assert!(lookup.stale);
    }

    #[test]
    fn distinct_queries_hash_to_distinct_keys() {
        let a = CacheKey::new("t1", "s1", "shipping", "en-US");
        let b = CacheKey::new("t1", "s1", "returns", "en-US");
        assert_ne!(a.query_hash, b.query_hash);
    }
}
