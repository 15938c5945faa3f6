/// In-process CacheStore backed by a HashMap.
///
/// Nothing survives a restart. Used by tests and by the CLI when no database is wanted.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{CacheEntry, CacheFilter, CacheStore};
use crate::errors::LitragError;

/// Rows keyed by (user_id, cache_key).
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<(String, String), CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, user_id: &str, cache_key: &str) -> Result<Option<CacheEntry>, LitragError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&(user_id.to_string(), cache_key.to_string()))
            .cloned())
    }

    async fn upsert(&self, mut entry: CacheEntry) -> Result<(), LitragError> {
        let mut entries = self.entries.write().await;
        let key = (entry.user_id.clone(), entry.cache_key.clone());
        if let Some(existing) = entries.get(&key) {
            entry.id = existing.id.clone();
        }
        entries.insert(key, entry);
        Ok(())
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool, LitragError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.id != id);
        Ok(entries.len() < before)
    }

    async fn delete_where(&self, user_id: &str, filter: &CacheFilter) -> Result<u64, LitragError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|(owner, _), e| owner != user_id || !filter.matches(e));
        Ok((before - entries.len()) as u64)
    }

    async fn list_by_owner(&self, user_id: &str) -> Result<Vec<CacheEntry>, LitragError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|((owner, _), _)| owner == user_id)
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn increment_hit_count(&self, id: &str) -> Result<(), LitragError> {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.values_mut().find(|e| e.id == id) {
            entry.hit_count += 1;
        }
        Ok(())
    }
}
