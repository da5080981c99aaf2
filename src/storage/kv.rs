// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Key-value store abstraction for the distributed tier.
//!
//! The nonce manager, the public-key cache and the OTP fast path only need
//! a handful of primitives from a Redis-like store. They are captured by
//! [`KeyValueStore`] so a deployment can plug in its own client while tests
//! and single-instance setups use [`InMemoryKvStore`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{ExpiringMap, StoreResult};
use crate::config::DEFAULT_SWEEP_INTERVAL;
use crate::maintenance::{spawn_sweeper, SweepHandle};

/// Operations consumed from a distributed key-value store.
///
/// Every call is a suspension point. Implementations must make
/// [`set_if_absent_with_ttl`](KeyValueStore::set_if_absent_with_ttl) atomic
/// (Redis `SET key value NX EX ttl`); replay prevention depends on it.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write a value that expires after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Delete keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> StoreResult<u64>;

    /// Whether a key exists.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Atomically write `value` only if `key` is absent. Returns `true` if written.
    async fn set_if_absent_with_ttl(&self, key: &str, value: &str, ttl: Duration)
        -> StoreResult<bool>;

    /// List every key starting with `prefix`.
    async fn scan_keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

/// Default capacity of [`InMemoryKvStore`].
pub const DEFAULT_KV_CAPACITY: usize = 100_000;

/// Process-local [`KeyValueStore`].
///
/// Backed by a bounded [`ExpiringMap`]: every operation runs under its one
/// lock, so `set_if_absent_with_ttl` is atomic with respect to other callers
/// of the same instance. Expired entries are dropped by a background sweep
/// (when constructed inside a tokio runtime) and lazily when touched. At
/// capacity the oldest-inserted entry is evicted, live or not, matching the
/// in-memory nonce store.
pub struct InMemoryKvStore {
    entries: Arc<ExpiringMap<String>>,
    sweeper: Option<SweepHandle>,
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_KV_CAPACITY, DEFAULT_SWEEP_INTERVAL)
    }

    pub fn with_capacity(capacity: usize, sweep_interval: Duration) -> Self {
        let entries = Arc::new(ExpiringMap::new(capacity));
        let sweeper = spawn_sweeper("kv store", &entries, sweep_interval);
        Self { entries, sweeper }
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        self.entries.live_len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Entries held in memory, including expired ones not yet swept.
    pub fn physical_len(&self) -> usize {
        self.entries.len()
    }

    /// Drop expired entries now.
    pub fn sweep_expired(&self) -> usize {
        self.entries.sweep_expired()
    }

    /// Stop the background sweep.
    pub fn shutdown(&self) {
        if let Some(sweeper) = &self.sweeper {
            sweeper.cancel();
        }
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.entries.get(key))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.entries.insert(key, value.to_string(), ttl);
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> StoreResult<u64> {
        Ok(keys
            .iter()
            .filter(|key| self.entries.remove_live(key))
            .count() as u64)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.entries.contains(key))
    }

    async fn set_if_absent_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        Ok(self.entries.insert_if_absent(key, value.to_string(), ttl))
    }

    async fn scan_keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        Ok(self.entries.live_keys_with_prefix(prefix))
    }
}
