/// Request caching module
///
/// In-memory LRU cache for frequently accessed index data, to keep hot
/// token/order-book lookups off the RocksDB read path.
///
/// Cached items:
/// - Token genesis records (by ref)
/// - FT/NFT balances (by scripthash+ref)
/// - Order book top-of-book snapshots (by pair_id+side)
use lru::LruCache;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Cache entry with TTL
#[derive(Debug, Clone)]
struct CachedEntry<T> {
    value: T,
    expires_at: Instant,
}

impl<T> CachedEntry<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    fn value(&self) -> &T {
        &self.value
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedOrderBookSnapshot {
    pub pair_id: String,
    pub side: u8,
    pub order_refs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub token_hits: u64,
    pub token_misses: u64,
    pub balance_hits: u64,
    pub balance_misses: u64,
    pub orderbook_hits: u64,
    pub orderbook_misses: u64,
}

struct Counters {
    token_hits: std::sync::atomic::AtomicU64,
    token_misses: std::sync::atomic::AtomicU64,
    balance_hits: std::sync::atomic::AtomicU64,
    balance_misses: std::sync::atomic::AtomicU64,
    orderbook_hits: std::sync::atomic::AtomicU64,
    orderbook_misses: std::sync::atomic::AtomicU64,
}

impl Default for Counters {
    fn default() -> Self {
        use std::sync::atomic::AtomicU64;
        Self {
            token_hits: AtomicU64::new(0),
            token_misses: AtomicU64::new(0),
            balance_hits: AtomicU64::new(0),
            balance_misses: AtomicU64::new(0),
            orderbook_hits: AtomicU64::new(0),
            orderbook_misses: AtomicU64::new(0),
        }
    }
}

/// Holds the process's LRU caches behind `RwLock`s, sized at construction
/// time from configuration.
pub struct CacheManager {
    tokens: Arc<RwLock<LruCache<String, Vec<u8>>>>,
    balances: Arc<RwLock<LruCache<String, u64>>>,
    orderbooks: Arc<RwLock<LruCache<String, CachedEntry<CachedOrderBookSnapshot>>>>,
    orderbook_ttl: Duration,
    counters: Counters,
}

impl CacheManager {
    pub fn new(token_capacity: usize, balance_capacity: usize, orderbook_capacity: usize) -> Self {
        Self {
            tokens: Arc::new(RwLock::new(LruCache::new(
                NonZeroUsize::new(token_capacity.max(1)).unwrap(),
            ))),
            balances: Arc::new(RwLock::new(LruCache::new(
                NonZeroUsize::new(balance_capacity.max(1)).unwrap(),
            ))),
            orderbooks: Arc::new(RwLock::new(LruCache::new(
                NonZeroUsize::new(orderbook_capacity.max(1)).unwrap(),
            ))),
            orderbook_ttl: Duration::from_secs(5),
            counters: Counters::default(),
        }
    }

    pub async fn get_token(&self, ref_key: &str) -> Option<Vec<u8>> {
        let mut cache = self.tokens.write().await;
        let hit = cache.get(ref_key).cloned();
        if hit.is_some() {
            self.counters.token_hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        } else {
            self.counters.token_misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        hit
    }

    pub async fn put_token(&self, ref_key: String, bincode_bytes: Vec<u8>) {
        self.tokens.write().await.put(ref_key, bincode_bytes);
    }

    pub async fn invalidate_token(&self, ref_key: &str) {
        self.tokens.write().await.pop(ref_key);
    }

    pub async fn get_balance(&self, key: &str) -> Option<u64> {
        let mut cache = self.balances.write().await;
        let hit = cache.get(key).copied();
        if hit.is_some() {
            self.counters.balance_hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        } else {
            self.counters.balance_misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        hit
    }

    pub async fn put_balance(&self, key: String, balance: u64) {
        self.balances.write().await.put(key, balance);
    }

    pub async fn invalidate_balance(&self, key: &str) {
        self.balances.write().await.pop(key);
    }

    pub async fn get_orderbook(&self, key: &str) -> Option<CachedOrderBookSnapshot> {
        let mut cache = self.orderbooks.write().await;
        match cache.get(key) {
            Some(entry) if !entry.is_expired() => {
                self.counters.orderbook_hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                Some(entry.value().clone())
            }
            Some(_) => {
                cache.pop(key);
                self.counters.orderbook_misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                None
            }
            None => {
                self.counters.orderbook_misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn put_orderbook(&self, key: String, snapshot: CachedOrderBookSnapshot) {
        self.orderbooks
            .write()
            .await
            .put(key, CachedEntry::new(snapshot, self.orderbook_ttl));
    }

    pub async fn invalidate_orderbook(&self, key: &str) {
        self.orderbooks.write().await.pop(key);
    }

    pub fn stats(&self) -> CacheStats {
        use std::sync::atomic::Ordering::Relaxed;
        CacheStats {
            token_hits: self.counters.token_hits.load(Relaxed),
            token_misses: self.counters.token_misses.load(Relaxed),
            balance_hits: self.counters.balance_hits.load(Relaxed),
            balance_misses: self.counters.balance_misses.load(Relaxed),
            orderbook_hits: self.counters.orderbook_hits.load(Relaxed),
            orderbook_misses: self.counters.orderbook_misses.load(Relaxed),
        }
    }
}

/// Fetches from cache or computes and populates on miss.
pub async fn get_or_compute<T, F, Fut>(
    cache: &Arc<RwLock<LruCache<String, T>>>,
    key: &str,
    compute: F,
) -> T
where
    T: Clone + Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    if let Some(hit) = cache.write().await.get(key).cloned() {
        return hit;
    }
    let computed = compute().await;
    cache.write().await.put(key.to_string(), computed.clone());
    computed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_cache_roundtrips_and_counts_hits_and_misses() {
        let mgr = CacheManager::new(10, 10, 10);
        assert!(mgr.get_token("k").await.is_none());
        mgr.put_token("k".to_string(), vec![1, 2, 3]).await;
        assert_eq!(mgr.get_token("k").await, Some(vec![1, 2, 3]));

        let stats = mgr.stats();
        assert_eq!(stats.token_misses, 1);
        assert_eq!(stats.token_hits, 1);
    }

    #[tokio::test]
    async fn orderbook_cache_expires_after_ttl() {
        let mut mgr = CacheManager::new(10, 10, 10);
        mgr.orderbook_ttl = Duration::from_millis(10);
        let snapshot = CachedOrderBookSnapshot {
            pair_id: "pair".to_string(),
            side: 0,
            order_refs: vec!["a".to_string()],
        };
        mgr.put_orderbook("k".to_string(), snapshot.clone()).await;
        assert!(mgr.get_orderbook("k").await.is_some());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(mgr.get_orderbook("k").await.is_none());
    }

    #[tokio::test]
    async fn invalidate_removes_cached_entry() {
        let mgr = CacheManager::new(10, 10, 10);
        mgr.put_balance("k".to_string(), 42).await;
        assert_eq!(mgr.get_balance("k").await, Some(42));
        mgr.invalidate_balance("k").await;
        assert_eq!(mgr.get_balance("k").await, None);
    }
}
