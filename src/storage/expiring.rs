// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bounded in-process map with per-entry expiry.
//!
//! Backs the memory tier of the public-key cache and the memory nonce
//! store. Entries are only ever *peeked*, never promoted, so the
//! underlying LRU order is the insertion order and a full map evicts the
//! oldest-inserted entry.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use lru::LruCache;

/// Absolute expiry `ttl` from `now`, saturating instead of overflowing.
pub(crate) fn expiry_after(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Stand-in expiry for TTLs too large to represent.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Stored value plus its absolute expiry.
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Capacity-bounded map whose entries expire after a TTL.
pub struct ExpiringMap<V> {
    entries: Mutex<LruCache<String, Entry<V>>>,
}

impl<V: Clone> ExpiringMap<V> {
    /// Create a map holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Entry<V>>> {
        // A panic while holding the lock cannot leave an entry half-written.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get a live value. Expired entries are dropped on the way out.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.lock();
        let expired = match entries.peek(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    /// Whether a live entry exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert a value, evicting the oldest entry when full.
    pub fn insert(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let entry = Entry {
            value,
            expires_at: expiry_after(Instant::now(), ttl),
        };
        self.lock().put(key.into(), entry);
    }

    /// Insert only if no live entry exists. Returns `true` when inserted.
    ///
    /// The check and the write happen under one lock acquisition.
    pub fn insert_if_absent(&self, key: &str, value: V, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut entries = self.lock();
        if let Some(entry) = entries.peek(key) {
            if entry.expires_at > now {
                return false;
            }
        }
        entries.put(
            key.to_string(),
            Entry {
                value,
                expires_at: expiry_after(now, ttl),
            },
        );
        true
    }

    /// Remove an entry. Returns `true` if something was removed.
    pub fn remove(&self, key: &str) -> bool {
        self.lock().pop(key).is_some()
    }

    /// Remove an entry. Returns `true` only if it was still live.
    pub fn remove_live(&self, key: &str) -> bool {
        let now = Instant::now();
        self.lock()
            .pop(key)
            .is_some_and(|entry| entry.expires_at > now)
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Drop all expired entries, returning how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    /// Number of entries that have not expired.
    pub fn live_len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .iter()
            .filter(|(_, entry)| entry.expires_at > now)
            .count()
    }

    /// Live keys starting with `prefix`, sorted.
    pub fn live_keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .lock()
            .iter()
            .filter(|(key, entry)| entry.expires_at > now && key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Live and not-yet-swept entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys in insertion order, oldest first.
    pub fn keys(&self) -> Vec<String> {
        self.lock().iter().rev().map(|(key, _)| key.clone()).collect()
    }
}
