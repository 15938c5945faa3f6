/// Response cache: memoizes (user, query, paper set) -> (answer, citations).
///
/// Entries live for a fixed TTL and each user is capped at a bounded number of rows.
/// Storage sits behind the CacheStore repository trait so the same policy runs over
/// SQLite, an in-process map, or a test fake.
///
/// Caching is an optimization. A failing store reads as a miss and a failed write is
/// logged and dropped; neither reaches the caller.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::config::CacheConfig;
use crate::errors::LitragError;
use crate::models::Citation;

pub mod memory;
pub mod sqlite;

pub const DEFAULT_TTL_HOURS: i64 = 24;
pub const DEFAULT_MAX_ENTRIES_PER_USER: usize = 100;
/// Upper bound accepted for `cache.ttl_hours` (100 years).
pub const MAX_TTL_HOURS: i64 = 24 * 365 * 100;

/// A memoized answer for one (user, query, paper set) triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Row identifier (UUID v4)
    pub id: String,
    pub user_id: String,
    /// Derived from the normalized query and sorted paper IDs, see cache_key()
    pub cache_key: String,
    pub query: String,
    /// Always stored sorted
    pub paper_ids: Vec<String>,
    pub response: String,
    pub citations: Vec<Citation>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hit_count: i64,
}

/// What a cache hit hands back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedResponse {
    pub response: String,
    pub citations: Vec<Citation>,
}

/// Bulk-delete criteria, always scoped to one user. Criteria are ANDed.
#[derive(Debug, Clone, Default)]
pub struct CacheFilter {
    /// Match entries whose paper_ids intersect this set
    pub paper_ids_any: Option<Vec<String>>,
    /// Match entries with expires_at strictly before this instant
    pub expired_before: Option<DateTime<Utc>>,
}

impl CacheFilter {
    /// In-process evaluation, shared by stores that cannot push filters down.
    pub fn matches(&self, entry: &CacheEntry) -> bool {
        if let Some(ids) = &self.paper_ids_any {
            if !entry.paper_ids.iter().any(|p| ids.contains(p)) {
                return false;
            }
        }
        if let Some(cutoff) = self.expired_before {
            if entry.expires_at >= cutoff {
                return false;
            }
        }
        true
    }
}

/// Per-user cache summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub expired: usize,
    pub total_hits: i64,
}

/// Repository abstraction over cache rows.
///
/// Implementations must be Send + Sync; the hit counter is bumped from a spawned task.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up the entry for (user_id, cache_key).
    async fn get(&self, user_id: &str, cache_key: &str) -> Result<Option<CacheEntry>, LitragError>;

    /// Insert or replace the entry for (entry.user_id, entry.cache_key).
    ///
    /// An existing row keeps its id; everything else is overwritten.
    async fn upsert(&self, entry: CacheEntry) -> Result<(), LitragError>;

    /// Delete one row. Returns false if it did not exist.
    async fn delete_by_id(&self, id: &str) -> Result<bool, LitragError>;

    /// Delete all of a user's rows matching the filter. Returns the number deleted.
    async fn delete_where(&self, user_id: &str, filter: &CacheFilter) -> Result<u64, LitragError>;

    /// All rows owned by a user, in no particular order.
    async fn list_by_owner(&self, user_id: &str) -> Result<Vec<CacheEntry>, LitragError>;

    /// Add one to a row's hit_count. Missing rows are ignored.
    async fn increment_hit_count(&self, id: &str) -> Result<(), LitragError>;
}

/// Time source for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        ManualClock { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Deterministic cache key: xxh3-64 of `lowercase(trim(query)) + ":" + sorted ids joined by ","`,
/// rendered as 16 hex digits.
pub fn cache_key(query: &str, paper_ids: &[String]) -> String {
    let normalized = format!("{}:{}", query.trim().to_lowercase(), sorted_ids(paper_ids).join(","));
    format!("{:016x}", xxhash_rust::xxh3::xxh3_64(normalized.as_bytes()))
}

fn sorted_ids(paper_ids: &[String]) -> Vec<String> {
    let mut ids = paper_ids.to_vec();
    ids.sort();
    ids
}

/// TTL- and size-bounded response cache over a CacheStore.
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    max_entries_per_user: usize,
}

impl ResponseCache {
    /// System clock, 24h TTL, 100 entries per user.
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        ResponseCache {
            store,
            clock: Arc::new(SystemClock),
            ttl: Duration::hours(DEFAULT_TTL_HOURS),
            max_entries_per_user: DEFAULT_MAX_ENTRIES_PER_USER,
        }
    }

    /// TTL is clamped to 1..=MAX_TTL_HOURS; `Config::validate` rejects values outside it.
    pub fn from_config(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self::new(store)
            .with_ttl(Duration::hours(config.ttl_hours.clamp(1, MAX_TTL_HOURS)))
            .with_max_entries_per_user(config.max_entries_per_user)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_max_entries_per_user(mut self, max: usize) -> Self {
        self.max_entries_per_user = max;
        self
    }

    /// Return the cached answer, or None on miss.
    ///
    /// An expired entry is deleted and reported as a miss. A hit bumps hit_count in the
    /// background; the read never waits on it. Store failures are misses.
    pub async fn get_cached_response(
        &self,
        user_id: &str,
        query: &str,
        paper_ids: &[String],
    ) -> Option<CachedResponse> {
        let key = cache_key(query, paper_ids);

        let entry = match self.store.get(user_id, &key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                tracing::debug!(user_id = %user_id, cache_key = %key, "Cache miss");
                return None;
            }
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        if entry.expires_at < self.clock.now() {
            tracing::debug!(user_id = %user_id, cache_key = %key, "Cache entry expired");
            if let Err(e) = self.store.delete_by_id(&entry.id).await {
                tracing::warn!(id = %entry.id, error = %e, "Failed to delete expired cache entry");
            }
            return None;
        }

        let store = Arc::clone(&self.store);
        let id = entry.id.clone();
        tokio::spawn(async move {
            if let Err(e) = store.increment_hit_count(&id).await {
                tracing::warn!(id = %id, error = %e, "Failed to record cache hit");
            }
        });

        tracing::debug!(user_id = %user_id, cache_key = %key, hits = entry.hit_count + 1, "Cache hit");

        Some(CachedResponse {
            response: entry.response,
            citations: entry.citations,
        })
    }

    /// Store an answer, replacing any previous one for the same key, then trim the user's
    /// entries down to the cap. Failures are logged, never returned.
    pub async fn set_cached_response(
        &self,
        user_id: &str,
        query: &str,
        paper_ids: &[String],
        response: &str,
        citations: &[Citation],
    ) {
        let now = self.clock.now();
        let Some(expires_at) = now.checked_add_signed(self.ttl) else {
            tracing::error!(user_id = %user_id, ttl_seconds = self.ttl.num_seconds(), "Cache TTL overflows expiry time, not caching");
            return;
        };
        let entry = CacheEntry {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            cache_key: cache_key(query, paper_ids),
            query: query.to_string(),
            paper_ids: sorted_ids(paper_ids),
            response: response.to_string(),
            citations: citations.to_vec(),
            created_at: now,
            expires_at,
            hit_count: 0,
        };

        let key = entry.cache_key.clone();
        if let Err(e) = self.store.upsert(entry).await {
            tracing::error!(user_id = %user_id, cache_key = %key, error = %e, "Cache write failed");
            return;
        }
        tracing::debug!(user_id = %user_id, cache_key = %key, "Cached response");

        if let Err(e) = self.enforce_cap(user_id).await {
            tracing::warn!(user_id = %user_id, error = %e, "Cache eviction failed");
        }
    }

    /// Delete the user's entries whose paper set intersects `paper_ids`.
    pub async fn invalidate_paper_cache(
        &self,
        user_id: &str,
        paper_ids: &[String],
    ) -> Result<u64, LitragError> {
        if paper_ids.is_empty() {
            return Ok(0);
        }
        let filter = CacheFilter {
            paper_ids_any: Some(paper_ids.to_vec()),
            ..Default::default()
        };
        let deleted = self.store.delete_where(user_id, &filter).await?;
        tracing::info!(user_id = %user_id, papers = paper_ids.len(), deleted, "Invalidated cached responses");
        Ok(deleted)
    }

    /// Delete every expired entry for the user.
    pub async fn purge_expired(&self, user_id: &str) -> Result<u64, LitragError> {
        let filter = CacheFilter {
            expired_before: Some(self.clock.now()),
            ..Default::default()
        };
        let deleted = self.store.delete_where(user_id, &filter).await?;
        tracing::info!(user_id = %user_id, deleted, "Purged expired cache entries");
        Ok(deleted)
    }

    pub async fn stats(&self, user_id: &str) -> Result<CacheStats, LitragError> {
        let entries = self.store.list_by_owner(user_id).await?;
        let now = self.clock.now();
        Ok(CacheStats {
            entries: entries.len(),
            expired: entries.iter().filter(|e| e.expires_at < now).count(),
            total_hits: entries.iter().map(|e| e.hit_count).sum(),
        })
    }

    /// Evict soonest-to-expire entries first, least-hit first among equals.
    async fn enforce_cap(&self, user_id: &str) -> Result<(), LitragError> {
        let mut entries = self.store.list_by_owner(user_id).await?;
        if entries.len() <= self.max_entries_per_user {
            return Ok(());
        }

        entries.sort_by(|a, b| {
            a.expires_at
                .cmp(&b.expires_at)
                .then(a.hit_count.cmp(&b.hit_count))
                .then(a.created_at.cmp(&b.created_at))
        });

        let excess = entries.len() - self.max_entries_per_user;
        for entry in entries.iter().take(excess) {
            self.store.delete_by_id(&entry.id).await?;
        }

        tracing::debug!(user_id = %user_id, evicted = excess, "Evicted cache entries over cap");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::MemoryCacheStore;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn citation() -> Citation {
        Citation {
            paper_id: "p1".to_string(),
            paper_title: "Sleep and Memory".to_string(),
            authors: Some(vec!["A. Author".to_string()]),
            year: Some(2021),
            section: Some("results".to_string()),
            quote: "Sleep consolidates memory.".to_string(),
            page_number: Some(4),
            relevance_score: Some(0.87),
        }
    }

    fn cache_with_clock() -> (ResponseCache, Arc<MemoryCacheStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryCacheStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let cache = ResponseCache::new(store.clone()).with_clock(clock.clone());
        (cache, store, clock)
    }

    /// Store that fails every call.
    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn get(&self, _: &str, _: &str) -> Result<Option<CacheEntry>, LitragError> {
            Err(LitragError::Storage("down".to_string()))
        }
        async fn upsert(&self, _: CacheEntry) -> Result<(), LitragError> {
            Err(LitragError::Storage("down".to_string()))
        }
        async fn delete_by_id(&self, _: &str) -> Result<bool, LitragError> {
            Err(LitragError::Storage("down".to_string()))
        }
        async fn delete_where(&self, _: &str, _: &CacheFilter) -> Result<u64, LitragError> {
            Err(LitragError::Storage("down".to_string()))
        }
        async fn list_by_owner(&self, _: &str) -> Result<Vec<CacheEntry>, LitragError> {
            Err(LitragError::Storage("down".to_string()))
        }
        async fn increment_hit_count(&self, _: &str) -> Result<(), LitragError> {
            Err(LitragError::Storage("down".to_string()))
        }
    }

    #[test]
    fn test_cache_key_normalizes_query_and_paper_order() {
        let a = cache_key("  What is BM25? ", &ids(&["p2", "p1"]));
        let b = cache_key("what is bm25?", &ids(&["p1", "p2"]));
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, cache_key("what is bm25?", &ids(&["p1"])));
        assert_ne!(a, cache_key("what is tf-idf?", &ids(&["p1", "p2"])));
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (cache, _store, _clock) = cache_with_clock();
        let papers = ids(&["p2", "p1"]);

        cache
            .set_cached_response("u1", "Does sleep help memory?", &papers, "Yes.", &[citation()])
            .await;

        let hit = cache
            .get_cached_response("u1", "does sleep help memory?", &ids(&["p1", "p2"]))
            .await
            .expect("expected a hit");
        assert_eq!(hit.response, "Yes.");
        assert_eq!(hit.citations, vec![citation()]);

        // Other users never see it
        assert!(cache.get_cached_response("u2", "Does sleep help memory?", &papers).await.is_none());
    }

    #[tokio::test]
    async fn test_entry_stores_sorted_papers_and_ttl() {
        let (cache, store, _clock) = cache_with_clock();
        cache.set_cached_response("u1", "q", &ids(&["b", "a"]), "r", &[]).await;

        let entries = store.list_by_owner("u1").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].paper_ids, ids(&["a", "b"]));
        assert_eq!(entries[0].created_at, start());
        assert_eq!(entries[0].expires_at, start() + Duration::hours(24));
        assert_eq!(entries[0].hit_count, 0);
    }

    #[tokio::test]
    async fn test_expired_entry_is_deleted_and_missed() {
        let (cache, store, clock) = cache_with_clock();
        let papers = ids(&["p1"]);
        cache.set_cached_response("u1", "q", &papers, "r", &[]).await;

        clock.advance(Duration::hours(24));
        // expires_at == now is still valid
        assert!(cache.get_cached_response("u1", "q", &papers).await.is_some());

        clock.advance(Duration::seconds(1));
        assert!(cache.get_cached_response("u1", "q", &papers).await.is_none());
        assert!(store.list_by_owner("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rewrite_resets_entry() {
        let (cache, store, clock) = cache_with_clock();
        let papers = ids(&["p1"]);
        cache.set_cached_response("u1", "q", &papers, "old", &[]).await;
        let first = store.list_by_owner("u1").await.unwrap().remove(0);
        store.increment_hit_count(&first.id).await.unwrap();

        clock.advance(Duration::hours(1));
        cache.set_cached_response("u1", "Q", &papers, "new", &[]).await;

        let entries = store.list_by_owner("u1").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, first.id);
        assert_eq!(entries[0].response, "new");
        assert_eq!(entries[0].hit_count, 0);
        assert_eq!(entries[0].expires_at, start() + Duration::hours(25));
    }

    #[tokio::test]
    async fn test_hit_increments_count_in_background() {
        let (cache, store, _clock) = cache_with_clock();
        let papers = ids(&["p1"]);
        cache.set_cached_response("u1", "q", &papers, "r", &[]).await;

        assert!(cache.get_cached_response("u1", "q", &papers).await.is_some());

        let mut hits = 0;
        for _ in 0..50 {
            hits = store.list_by_owner("u1").await.unwrap()[0].hit_count;
            if hits == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(hits, 1);
    }

    #[tokio::test]
    async fn test_cap_evicts_earliest_expiry() {
        let (cache, store, clock) = cache_with_clock();

        for i in 0..101 {
            cache
                .set_cached_response("u1", &format!("query {}", i), &ids(&["p1"]), "r", &[])
                .await;
            clock.advance(Duration::seconds(1));
        }

        let entries = store.list_by_owner("u1").await.unwrap();
        assert_eq!(entries.len(), 100);
        assert!(entries.iter().all(|e| e.query != "query 0"));
        assert!(entries.iter().any(|e| e.query == "query 100"));
    }

    #[tokio::test]
    async fn test_cap_breaks_expiry_ties_by_hit_count() {
        let (cache, store, clock) = cache_with_clock();
        let cache = cache.with_max_entries_per_user(2);

        cache.set_cached_response("u1", "a", &[], "r", &[]).await;
        cache.set_cached_response("u1", "b", &[], "r", &[]).await;
        let a = store
            .list_by_owner("u1")
            .await
            .unwrap()
            .into_iter()
            .find(|e| e.query == "a")
            .unwrap();
        store.increment_hit_count(&a.id).await.unwrap();

        clock.advance(Duration::minutes(5));
        cache.set_cached_response("u1", "c", &[], "r", &[]).await;

        let mut left: Vec<String> = store
            .list_by_owner("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.query)
            .collect();
        left.sort();
        assert_eq!(left, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_cap_is_per_user() {
        let (cache, store, _clock) = cache_with_clock();
        let cache = cache.with_max_entries_per_user(1);

        cache.set_cached_response("u1", "a", &[], "r", &[]).await;
        cache.set_cached_response("u2", "b", &[], "r", &[]).await;

        assert_eq!(store.list_by_owner("u1").await.unwrap().len(), 1);
        assert_eq!(store.list_by_owner("u2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_by_paper_intersection() {
        let (cache, store, _clock) = cache_with_clock();
        cache.set_cached_response("u1", "q1", &ids(&["p1", "p2"]), "r", &[]).await;
        cache.set_cached_response("u1", "q2", &ids(&["p3"]), "r", &[]).await;
        cache.set_cached_response("u2", "q1", &ids(&["p1"]), "r", &[]).await;

        let deleted = cache.invalidate_paper_cache("u1", &ids(&["p2", "p9"])).await.unwrap();
        assert_eq!(deleted, 1);

        let left = store.list_by_owner("u1").await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].query, "q2");
        assert_eq!(store.list_by_owner("u2").await.unwrap().len(), 1);

        assert_eq!(cache.invalidate_paper_cache("u1", &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_purge_and_stats() {
        let (cache, store, clock) = cache_with_clock();
        cache.set_cached_response("u1", "old", &[], "r", &[]).await;
        clock.advance(Duration::hours(12));
        cache.set_cached_response("u1", "new", &[], "r", &[]).await;
        let new = store
            .list_by_owner("u1")
            .await
            .unwrap()
            .into_iter()
            .find(|e| e.query == "new")
            .unwrap();
        store.increment_hit_count(&new.id).await.unwrap();
        store.increment_hit_count(&new.id).await.unwrap();

        clock.advance(Duration::hours(13));
        let stats = cache.stats("u1").await.unwrap();
        assert_eq!(stats, CacheStats { entries: 2, expired: 1, total_hits: 2 });

        assert_eq!(cache.purge_expired("u1").await.unwrap(), 1);
        let stats = cache.stats("u1").await.unwrap();
        assert_eq!(stats, CacheStats { entries: 1, expired: 0, total_hits: 2 });
    }

    #[tokio::test]
    async fn test_broken_store_is_a_silent_miss() {
        let cache = ResponseCache::new(Arc::new(BrokenStore));
        cache.set_cached_response("u1", "q", &[], "r", &[]).await;
        assert!(cache.get_cached_response("u1", "q", &[]).await.is_none());
        assert!(cache.stats("u1").await.is_err());
    }

    #[test]
    fn test_from_config() {
        let config = CacheConfig {
            ttl_hours: 2,
            max_entries_per_user: 5,
            ..Default::default()
        };
        let cache = ResponseCache::from_config(Arc::new(MemoryCacheStore::new()), &config);
        assert_eq!(cache.ttl, Duration::hours(2));
        assert_eq!(cache.max_entries_per_user, 5);

        let config = CacheConfig {
            ttl_hours: 3_000_000_000,
            ..Default::default()
        };
        let cache = ResponseCache::from_config(Arc::new(MemoryCacheStore::new()), &config);
        assert_eq!(cache.ttl, Duration::hours(MAX_TTL_HOURS));
    }

    #[tokio::test]
    async fn test_overflowing_ttl_skips_write_without_panicking() {
        let (cache, store, _clock) = cache_with_clock();
        let cache = cache.with_ttl(Duration::hours(3_000_000_000));

        cache.set_cached_response("u1", "q", &[], "r", &[]).await;

        assert!(store.list_by_owner("u1").await.unwrap().is_empty());
        assert!(cache.get_cached_response("u1", "q", &[]).await.is_none());
    }
}
