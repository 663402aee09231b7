//! Target cache — the operator's channel list, cached with a TTL.
//!
//! A fresh entry is served as is. An expired entry triggers a refresh; if
//! the refresh fails the stale list is served and a warning logged. With no
//! entry at all a failed refresh yields an empty list.

use std::sync::Arc;
use std::time::Duration;

use herald_core::traits::TargetRepository;
use herald_core::types::Target;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct CachedTargetList {
    items: Vec<Target>,
    fetched_at: Instant,
}

pub struct TargetCache {
    repository: Arc<dyn TargetRepository>,
    ttl: Duration,
    entry: Mutex<Option<CachedTargetList>>,
}

impl TargetCache {
    pub fn new(repository: Arc<dyn TargetRepository>, ttl: Duration) -> Self {
        Self {
            repository,
            ttl,
            entry: Mutex::new(None),
        }
    }

    /// The operator's channels, from cache when fresh.
    pub async fn get(&self) -> Vec<Target> {
        // Held across the refresh so concurrent callers share one fetch.
        let mut entry = self.entry.lock().await;

        if let Some(cached) = entry.as_ref()
            && cached.fetched_at.elapsed() < self.ttl
        {
            return cached.items.clone();
        }

        match self.repository.operator_channels().await {
            Ok(items) => {
                let items: Vec<Target> = items.into_iter().filter(|t| !t.id.is_empty()).collect();
                tracing::debug!("📋 Channel list refreshed ({} channels)", items.len());
                *entry = Some(CachedTargetList {
                    items: items.clone(),
                    fetched_at: Instant::now(),
                });
                items
            }
            Err(e) => match entry.as_ref() {
                Some(stale) => {
                    tracing::warn!("⚠️ Channel list refresh failed, serving stale copy: {e}");
                    stale.items.clone()
                }
                None => {
                    tracing::warn!("⚠️ Channel list unavailable: {e}");
                    Vec::new()
                }
            },
        }
    }

    /// Drop the cached entry; the next `get` refreshes.
    pub async fn invalidate(&self) {
        *self.entry.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryRepository;

    #[tokio::test(start_paused = true)]
    async fn test_fresh_entry_served_from_cache() {
        let repo = Arc::new(MemoryRepository::with_channels(&["-1001", "-1002"]));
        let cache = TargetCache::new(repo.clone(), Duration::from_secs(60));

        assert_eq!(cache.get().await.len(), 2);
        assert_eq!(cache.get().await.len(), 2);
        assert_eq!(repo.channel_reads(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        cache.get().await;
        assert_eq!(repo.channel_reads(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entry_served_when_refresh_fails() {
        let repo = Arc::new(MemoryRepository::with_channels(&["-1001"]));
        let cache = TargetCache::new(repo.clone(), Duration::from_secs(60));
        assert_eq!(cache.get().await.len(), 1);

        repo.set_failing(true);
        tokio::time::sleep(Duration::from_secs(61)).await;
        let served = cache.get().await;
        assert_eq!(served, vec![Target::channel("-1001")]);
        assert_eq!(repo.channel_reads(), 2);
    }

    #[tokio::test]
    async fn test_empty_when_nothing_cached_and_store_down() {
        let repo = Arc::new(MemoryRepository::with_channels(&["-1001"]));
        repo.set_failing(true);
        let cache = TargetCache::new(repo, Duration::from_secs(60));
        assert!(cache.get().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_ids_filtered_and_invalidate() {
        let repo = Arc::new(MemoryRepository::with_channels(&["-1001", "", "-1003"]));
        let cache = TargetCache::new(repo.clone(), Duration::from_secs(60));
        let ids: Vec<String> = cache.get().await.into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["-1001", "-1003"]);

        cache.invalidate().await;
        cache.get().await;
        assert_eq!(repo.channel_reads(), 2);
    }
}
