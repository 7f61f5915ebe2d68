//! TTL cache for provider lookups.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// A cached lookup: `Some(None)` from [`ProviderCache::get`] means the
/// provider was looked up and none was found.
pub type ProviderLookup = Option<String>;

#[async_trait::async_trait]
pub trait ProviderCache: Send + Sync {
    /// Fetch a live entry
    async fn get(&self, key: &str) -> Option<ProviderLookup>;

    /// Store an entry that expires after `ttl`
    async fn set(&self, key: &str, value: ProviderLookup, ttl: Duration);

    /// Drop every expired entry, returning how many were removed
    async fn purge_expired(&self) -> usize;
}

/// Entry count at which `set` sweeps expired entries first.
pub const DEFAULT_PURGE_THRESHOLD: usize = 10_000;

type Entries = HashMap<String, (ProviderLookup, Instant)>;

/// In-process cache. Expired entries are evicted on read, by
/// [`ProviderCache::purge_expired`], and by `set` once the map reaches its
/// purge threshold.
#[derive(Debug)]
pub struct MemoryCache {
    entries: RwLock<Entries>,
    purge_threshold: usize,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_purge_threshold(DEFAULT_PURGE_THRESHOLD)
    }
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_purge_threshold(purge_threshold: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            purge_threshold: purge_threshold.max(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl ProviderCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<ProviderLookup> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((value, expires_at)) if *expires_at > now => return Some(value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut entries = self.entries.write().await;
        if entries
            .get(key)
            .is_some_and(|(_, expires_at)| *expires_at <= now)
        {
            entries.remove(key);
        }
        None
    }

    async fn set(&self, key: &str, value: ProviderLookup, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        if entries.len() >= self.purge_threshold {
            remove_expired(&mut entries, now);
        }
        entries.insert(key.to_string(), (value, now + ttl));
    }

    async fn purge_expired(&self) -> usize {
        remove_expired(&mut *self.entries.write().await, Instant::now())
    }
}

fn remove_expired(entries: &mut Entries, now: Instant) -> usize {
    let before = entries.len();
    entries.retain(|_, (_, expires_at)| *expires_at > now);
    before - entries.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("k").await, None);

        cache
            .set("k", Some("Hotjar".to_string()), Duration::from_secs(60))
            .await;
        assert_eq!(cache.get("k").await, Some(Some("Hotjar".to_string())));
    }

    #[tokio::test]
    async fn test_negative_lookup_is_cached() {
        let cache = MemoryCache::new();
        cache.set("k", None, Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await, Some(None));
    }

    #[tokio::test]
    async fn test_expired_entry_evicted_on_read() {
        let cache = MemoryCache::new();
        cache
            .set("k", Some("x".to_string()), Duration::from_millis(10))
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.get("k").await, None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let cache = MemoryCache::new();
        cache.set("short", None, Duration::from_millis(10)).await;
        cache.set("long", None, Duration::from_secs(60)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_set_sweeps_expired_at_threshold() {
        let cache = MemoryCache::with_purge_threshold(3);
        for i in 0..3 {
            cache
                .set(&format!("script:/app.js?v={i}"), None, Duration::from_millis(10))
                .await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        // None of the stale keys is read again; inserting still reclaims them
        cache.set("script:/app.js?v=3", None, Duration::from_secs(60)).await;
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("script:/app.js?v=3").await, Some(None));
    }

    #[tokio::test]
    async fn test_set_below_threshold_keeps_entries() {
        let cache = MemoryCache::with_purge_threshold(10);
        cache.set("a", None, Duration::from_millis(1)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.set("b", None, Duration::from_secs(60)).await;
        assert_eq!(cache.len().await, 2);
    }
}
