//! TTL cache of reverse proxies.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::proxy::ReverseProxy;

/// Default lifetime of a cached proxy.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Default interval between eviction sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30 * 60);

struct CacheEntry {
    proxy: Arc<ReverseProxy>,
    expires_at: Instant,
}

/// Concurrent `"<network_id>-<feature>" -> ReverseProxy` map with entry TTL
/// and periodic eviction.
///
/// A forwarder holds a director and transport configuration; rebuilding one
/// per request is waste, but unbounded retention leaks against network
/// churn. Expired entries are rebuilt on the next lookup.
#[derive(Clone)]
pub struct ProxyCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    ttl: Duration,
    sweep_interval: Duration,
}

impl ProxyCache {
    /// Creates a cache with the given entry TTL and sweep interval.
    pub fn new(ttl: Duration, sweep_interval: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            sweep_interval,
        }
    }

    /// The cache key for a network feature.
    pub fn key(network_id: &str, feature: &str) -> String {
        format!("{network_id}-{feature}")
    }

    /// Returns the live proxy for a key. Expired entries are never
    /// returned, even if the sweeper has not collected them yet.
    pub async fn get(&self, key: &str) -> Option<Arc<ReverseProxy>> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| Arc::clone(&entry.proxy))
    }

    /// Inserts a proxy, overwriting any existing entry for the key.
    pub async fn put(&self, key: impl Into<String>, proxy: Arc<ReverseProxy>) {
        let entry = CacheEntry {
            proxy,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.write().await.insert(key.into(), entry);
    }

    /// Number of entries, including not-yet-swept expired ones.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns true if the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Starts the background sweeper. It runs until the token is cancelled,
    /// which happens when the owning engine shuts down.
    pub fn spawn_sweeper(&self, token: CancellationToken) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cache.sweep_interval);
            // The first tick fires immediately; skip it.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => cache.sweep().await,
                }
            }
        })
    }

    async fn sweep(&self) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, remaining = entries.len(), "swept proxy cache");
        }
    }
}

impl Default for ProxyCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_SWEEP_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy_for(network: &str) -> Arc<ReverseProxy> {
        Arc::new(ReverseProxy::new(
            network,
            "http",
            "127.0.0.1",
            "5001",
            reqwest::Client::new(),
        ))
    }

    #[tokio::test]
    async fn test_get_returns_live_entry() {
        let cache = ProxyCache::new(Duration::from_secs(60), Duration::from_secs(60));
        let proxy = proxy_for("foo");
        cache.put(ProxyCache::key("foo", "api"), Arc::clone(&proxy)).await;

        let cached = cache.get("foo-api").await.unwrap();
        assert!(Arc::ptr_eq(&cached, &proxy));
    }

    #[tokio::test]
    async fn test_get_never_returns_expired_entry() {
        let cache = ProxyCache::new(Duration::from_millis(20), Duration::from_secs(3600));
        cache.put("foo-api", proxy_for("foo")).await;

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("foo-api").await.is_none());
        // Not yet swept, just unreachable.
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let cache = ProxyCache::new(Duration::from_secs(60), Duration::from_secs(60));
        let first = proxy_for("foo");
        let second = proxy_for("foo");

        cache.put("foo-api", Arc::clone(&first)).await;
        cache.put("foo-api", Arc::clone(&second)).await;

        let cached = cache.get("foo-api").await.unwrap();
        assert!(Arc::ptr_eq(&cached, &second));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_sweeper_evicts_and_stops() {
        let cache = ProxyCache::new(Duration::from_millis(10), Duration::from_millis(20));
        cache.put("foo-api", proxy_for("foo")).await;

        let token = CancellationToken::new();
        let sweeper = cache.spawn_sweeper(token.clone());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.is_empty().await);

        token.cancel();
        sweeper.await.unwrap();
    }

    #[test]
    fn test_key_format() {
        assert_eq!(ProxyCache::key("foo", "api"), "foo-api");
    }
}
