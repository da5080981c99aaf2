// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Two-tier public key cache: `key_id → public key`.
//!
//! - **L1** (memory): bounded [`ExpiringMap`], oldest-inserted entry evicted
//!   when full, swept on a fixed interval.
//! - **L2** (distributed, optional): [`KeyValueStore`] entries under a
//!   namespace prefix with their own TTL.
//!
//! The cache is never the source of truth. A miss (including an L2 outage,
//! which is logged and treated as a miss) sends the caller back to durable
//! key storage.

use std::sync::{Arc, Once};

use tracing::{debug, warn};

use super::AuthError;
use crate::config::{Environment, PublicKeyCacheConfig};
use crate::crypto::is_valid_public_key;
use crate::maintenance::{spawn_sweeper, SweepHandle};
use crate::storage::{ExpiringMap, KeyValueStore, StoreResult};

static MEMORY_ONLY_WARNING: Once = Once::new();

/// Tiered public key cache.
pub struct PublicKeyCache {
    memory: Arc<ExpiringMap<String>>,
    distributed: Option<Arc<dyn KeyValueStore>>,
    config: PublicKeyCacheConfig,
    sweeper: Option<SweepHandle>,
}

impl PublicKeyCache {
    /// Build the cache. Without a distributed store the cache is memory-only;
    /// outside local/development that is reported once per process.
    pub fn new(
        distributed: Option<Arc<dyn KeyValueStore>>,
        config: PublicKeyCacheConfig,
        environment: Environment,
    ) -> Self {
        if distributed.is_none() && !environment.is_local_or_dev() {
            MEMORY_ONLY_WARNING.call_once(|| {
                warn!(
                    environment = %environment,
                    "No distributed store configured; public key cache is memory-only \
                     and not shared between instances"
                );
            });
        }

        let memory = Arc::new(ExpiringMap::new(config.max_memory_size));
        let sweeper = spawn_sweeper("public_key_cache", &memory, config.sweep_interval);

        Self {
            memory,
            distributed,
            config,
            sweeper,
        }
    }

    fn distributed_key(&self, key_id: &str) -> String {
        format!("{}{}", self.config.key_prefix, key_id)
    }

    pub fn has_distributed(&self) -> bool {
        self.distributed.is_some()
    }

    /// Look up a public key. L1 first; an L2 hit is copied into L1.
    pub async fn get(&self, key_id: &str) -> Option<String> {
        if let Some(public_key) = self.memory.get(key_id) {
            return Some(public_key);
        }

        let store = self.distributed.as_ref()?;
        match store.get(&self.distributed_key(key_id)).await {
            Ok(Some(public_key)) => {
                debug!(key_id = %key_id, "Public key cache L2 hit");
                self.memory
                    .insert(key_id, public_key.clone(), self.config.memory_ttl);
                Some(public_key)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key_id = %key_id, error = %e, "Public key cache L2 read failed");
                None
            }
        }
    }

    /// Cache a public key in both tiers.
    ///
    /// The key is format-checked first; an invalid key is not written
    /// anywhere. An L2 write failure is logged and the L1 entry kept.
    pub async fn set(&self, key_id: &str, public_key: &str) -> Result<(), AuthError> {
        if !is_valid_public_key(public_key) {
            return Err(AuthError::InvalidPublicKey(format!(
                "public key for {key_id} is not valid base64 key material"
            )));
        }

        self.memory
            .insert(key_id, public_key.to_string(), self.config.memory_ttl);

        if let Some(store) = &self.distributed {
            if let Err(e) = store
                .set_with_ttl(
                    &self.distributed_key(key_id),
                    public_key,
                    self.config.distributed_ttl,
                )
                .await
            {
                warn!(key_id = %key_id, error = %e, "Public key cache L2 write failed");
            }
        }
        Ok(())
    }

    /// Remove a key from both tiers.
    pub async fn delete(&self, key_id: &str) {
        self.memory.remove(key_id);

        if let Some(store) = &self.distributed {
            if let Err(e) = store.del(&[self.distributed_key(key_id)]).await {
                warn!(key_id = %key_id, error = %e, "Public key cache L2 delete failed");
            }
        }
    }

    /// Empty both tiers. L2 removal covers every key under the prefix.
    pub async fn clear(&self) {
        self.memory.clear();

        let Some(store) = &self.distributed else {
            return;
        };
        let result: StoreResult<u64> = async {
            let keys = store.scan_keys_by_prefix(&self.config.key_prefix).await?;
            if keys.is_empty() {
                return Ok(0);
            }
            store.del(&keys).await
        }
        .await;

        match result {
            Ok(removed) => debug!(removed, "Cleared public key cache L2"),
            Err(e) => warn!(error = %e, "Public key cache L2 clear failed"),
        }
    }

    /// Entries currently held in L1, including not-yet-swept expired ones.
    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    /// L1 key ids, oldest first.
    pub fn memory_keys(&self) -> Vec<String> {
        self.memory.keys()
    }

    /// Stop the background sweep. Also happens on drop.
    pub fn shutdown(&self) {
        if let Some(sweeper) = &self.sweeper {
            sweeper.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_key_pair;
    use crate::storage::{InMemoryKvStore, StoreError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counts every call that reaches the distributed tier.
    #[derive(Default)]
    struct CountingStore {
        inner: InMemoryKvStore,
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingStore {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn tick(&self) -> StoreResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(StoreError::backend("connection refused"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl KeyValueStore for CountingStore {
        async fn get(&self, key: &str) -> StoreResult<Option<String>> {
            self.tick()?;
            self.inner.get(key).await
        }
        async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
            self.tick()?;
            self.inner.set_with_ttl(key, value, ttl).await
        }
        async fn del(&self, keys: &[String]) -> StoreResult<u64> {
            self.tick()?;
            self.inner.del(keys).await
        }
        async fn exists(&self, key: &str) -> StoreResult<bool> {
            self.tick()?;
            self.inner.exists(key).await
        }
        async fn set_if_absent_with_ttl(
            &self,
            key: &str,
            value: &str,
            ttl: Duration,
        ) -> StoreResult<bool> {
            self.tick()?;
            self.inner.set_if_absent_with_ttl(key, value, ttl).await
        }
        async fn scan_keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
            self.tick()?;
            self.inner.scan_keys_by_prefix(prefix).await
        }
    }

    fn config() -> PublicKeyCacheConfig {
        PublicKeyCacheConfig {
            max_memory_size: 10,
            ..PublicKeyCacheConfig::default()
        }
    }

    fn cache_with(store: Arc<CountingStore>, config: PublicKeyCacheConfig) -> PublicKeyCache {
        PublicKeyCache::new(Some(store as Arc<dyn KeyValueStore>), config, Environment::Test)
    }

    #[tokio::test]
    async fn l1_hit_makes_no_l2_calls() {
        let store = Arc::new(CountingStore::default());
        let cache = cache_with(store.clone(), config());
        let pair = generate_key_pair();

        cache.set("key-1", &pair.public_key).await.unwrap();
        let after_set = store.calls();

        assert_eq!(cache.get("key-1").await, Some(pair.public_key.clone()));
        assert_eq!(cache.get("key-1").await, Some(pair.public_key));
        assert_eq!(store.calls(), after_set);
        cache.shutdown();
    }

    #[tokio::test]
    async fn memory_tier_evicts_first_inserted() {
        let cache = PublicKeyCache::new(None, config(), Environment::Local);
        let pair = generate_key_pair();

        for i in 0..=10 {
            cache.set(&format!("key-{i}"), &pair.public_key).await.unwrap();
        }

        assert_eq!(cache.memory_len(), 10);
        assert_eq!(cache.get("key-0").await, None);
        assert!(cache.get("key-10").await.is_some());
        assert_eq!(cache.memory_keys().first().map(String::as_str), Some("key-1"));
    }

    #[tokio::test]
    async fn reads_do_not_change_eviction_order() {
        let config = PublicKeyCacheConfig {
            max_memory_size: 2,
            ..config()
        };
        let cache = PublicKeyCache::new(None, config, Environment::Local);
        let pair = generate_key_pair();

        cache.set("a", &pair.public_key).await.unwrap();
        cache.set("b", &pair.public_key).await.unwrap();
        cache.get("a").await;
        cache.set("c", &pair.public_key).await.unwrap();

        assert_eq!(cache.get("a").await, None);
        assert!(cache.get("b").await.is_some());
    }

    #[tokio::test]
    async fn invalid_key_is_rejected_without_write() {
        let store = Arc::new(CountingStore::default());
        let cache = cache_with(store.clone(), config());

        let err = cache.set("key-1", "%%% not base64").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidPublicKey(_)));
        assert_eq!(cache.memory_len(), 0);
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn l2_hit_populates_l1() {
        let store = Arc::new(CountingStore::default());
        let pair = generate_key_pair();
        let config = config();
        store
            .inner
            .set_with_ttl(
                &format!("{}key-1", config.key_prefix),
                &pair.public_key,
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        let cache = cache_with(store.clone(), config);

        assert_eq!(cache.get("key-1").await, Some(pair.public_key.clone()));
        assert_eq!(store.calls(), 1);
        assert_eq!(cache.get("key-1").await, Some(pair.public_key));
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn l1_expiry_falls_back_to_l2() {
        let store = Arc::new(CountingStore::default());
        let config = PublicKeyCacheConfig {
            memory_ttl: Duration::from_millis(20),
            ..config()
        };
        let cache = cache_with(store.clone(), config);
        let pair = generate_key_pair();

        cache.set("key-1", &pair.public_key).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let before = store.calls();
        assert_eq!(cache.get("key-1").await, Some(pair.public_key));
        assert_eq!(store.calls(), before + 1);
    }

    #[tokio::test]
    async fn l2_outage_degrades_to_memory() {
        let store = Arc::new(CountingStore::failing());
        let cache = cache_with(store, config());
        let pair = generate_key_pair();

        cache.set("key-1", &pair.public_key).await.unwrap();
        assert_eq!(cache.get("key-1").await, Some(pair.public_key));
        assert_eq!(cache.get("missing").await, None);
    }

    #[tokio::test]
    async fn delete_and_clear_cover_both_tiers() {
        let store = Arc::new(CountingStore::default());
        let config = config();
        let prefix = config.key_prefix.clone();
        let cache = cache_with(store.clone(), config);
        let pair = generate_key_pair();

        for id in ["a", "b", "c"] {
            cache.set(id, &pair.public_key).await.unwrap();
        }
        store.inner.set_with_ttl("unrelated", "x", Duration::from_secs(60)).await.unwrap();

        cache.delete("a").await;
        assert_eq!(cache.get("a").await, None);
        assert!(!store.inner.exists(&format!("{prefix}a")).await.unwrap());

        cache.clear().await;
        assert_eq!(cache.memory_len(), 0);
        assert!(store.inner.scan_keys_by_prefix(&prefix).await.unwrap().is_empty());
        assert!(store.inner.exists("unrelated").await.unwrap());
    }
}
