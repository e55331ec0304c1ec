use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use zeroize::Zeroizing;

use crate::models::key::KeyMetadata;

/// A cached plaintext key. Never persisted; dropped material is zeroized.
pub struct CachedKey {
    /// The unwrapped key material.
    pub plaintext: Zeroizing<Vec<u8>>,
    /// The key's metadata, with live usage counters.
    pub metadata: KeyMetadata,
    /// When this entry was cached.
    pub cached_at: Instant,
    /// How long this entry stays valid.
    pub ttl: Duration,
}

impl CachedKey {
    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() >= self.ttl
    }
}

/// An in-process, time-bounded cache of unwrapped key material.
#[derive(Clone)]
pub struct KeyCache {
    cache: Arc<RwLock<HashMap<String, CachedKey>>>,
    ttl: Duration,
}

impl KeyCache {
    /// Creates a new `KeyCache` with the given entry TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Gets a key from the cache, bumping its usage counter on a hit.
    /// Expired entries are evicted on access.
    pub async fn get(&self, key_id: &str) -> Option<Zeroizing<Vec<u8>>> {
        let mut cache = self.cache.write().await;
        match cache.get_mut(key_id) {
            Some(entry) if entry.is_expired() => {
                cache.remove(key_id);
                tracing::debug!("🧹 Expired cache entry evicted: {}", key_id);
                None
            }
            Some(entry) => {
                entry.metadata.usage_count += 1;
                entry.metadata.last_used = Some(chrono::Utc::now());
                Some(entry.plaintext.clone())
            }
            None => None,
        }
    }

    /// Inserts a key into the cache.
    pub async fn insert(&self, key_id: String, plaintext: Zeroizing<Vec<u8>>, metadata: KeyMetadata) {
        let mut cache = self.cache.write().await;
        cache.insert(
            key_id,
            CachedKey {
                plaintext,
                metadata,
                cached_at: Instant::now(),
                ttl: self.ttl,
            },
        );
    }

    /// Removes one key from the cache.
    pub async fn evict(&self, key_id: &str) {
        let mut cache = self.cache.write().await;
        cache.remove(key_id);
    }

    /// Clears the whole cache.
    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        cache.clear();
    }

    /// The live usage counter for a cached key, if present.
    pub async fn usage_count(&self, key_id: &str) -> Option<u64> {
        let cache = self.cache.read().await;
        cache.get(key_id).map(|e| e.metadata.usage_count)
    }
}
