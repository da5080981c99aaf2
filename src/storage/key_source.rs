// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Durable public-key lookup.
//!
//! The public-key cache is never the source of truth. When it misses, the
//! authenticator asks a [`PublicKeySource`] (normally the user-key table).

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::StoreResult;

/// Source of truth for `key_id → public key` (base64 SPKI DER).
#[async_trait]
pub trait PublicKeySource: Send + Sync {
    async fn find_public_key(&self, key_id: &str) -> StoreResult<Option<String>>;
}

/// [`PublicKeySource`] held in memory.
#[derive(Default)]
pub struct InMemoryPublicKeySource {
    keys: RwLock<HashMap<String, String>>,
}

impl InMemoryPublicKeySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or rotate the key for `key_id`.
    pub async fn insert(&self, key_id: impl Into<String>, public_key: impl Into<String>) {
        self.keys.write().await.insert(key_id.into(), public_key.into());
    }

    /// Revoke a key. Returns `true` if it was registered.
    pub async fn remove(&self, key_id: &str) -> bool {
        self.keys.write().await.remove(key_id).is_some()
    }
}

#[async_trait]
impl PublicKeySource for InMemoryPublicKeySource {
    async fn find_public_key(&self, key_id: &str) -> StoreResult<Option<String>> {
        Ok(self.keys.read().await.get(key_id).cloned())
    }
}
