// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Replay prevention.
//!
//! A nonce is accepted at most once per window. Two backends:
//!
//! - **Distributed**: one key per nonce under a prefix, written with an
//!   atomic set-if-absent carrying TTL = window. Safe across instances.
//! - **Memory**: a bounded [`ExpiringMap`] (oldest entry evicted when
//!   full). The check and the insert happen under a single lock, so two
//!   threads in one process cannot both accept the same nonce. Nothing is
//!   shared between processes.
//!
//! ## Security
//!
//! - Under memory pressure the memory backend evicts the oldest nonces,
//!   which can make a very old (but still in-window) nonce acceptable
//!   again. Size `max_memory_size` above the expected request rate × window.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::AuthError;
use crate::config::NonceConfig;
use crate::maintenance::{spawn_sweeper, SweepHandle};
use crate::storage::{ExpiringMap, KeyValueStore};

enum Backend {
    Memory {
        seen: Arc<ExpiringMap<()>>,
        sweeper: Option<SweepHandle>,
    },
    Distributed(Arc<dyn KeyValueStore>),
}

/// Nonce check-and-record store.
pub struct NonceManager {
    backend: Backend,
    window: Duration,
    key_prefix: String,
}

impl NonceManager {
    /// Distributed backend when a store is given, memory otherwise.
    pub fn new(store: Option<Arc<dyn KeyValueStore>>, config: &NonceConfig) -> Self {
        match store {
            Some(store) => Self::distributed(store, config),
            None => Self::in_memory(config),
        }
    }

    /// Process-local backend. Spawns an expiry sweep when a tokio runtime
    /// is available.
    pub fn in_memory(config: &NonceConfig) -> Self {
        let seen = Arc::new(ExpiringMap::new(config.max_memory_size));
        let sweeper = spawn_sweeper("nonce", &seen, config.sweep_interval);
        Self {
            backend: Backend::Memory { seen, sweeper },
            window: config.window,
            key_prefix: config.key_prefix.clone(),
        }
    }

    pub fn distributed(store: Arc<dyn KeyValueStore>, config: &NonceConfig) -> Self {
        Self {
            backend: Backend::Distributed(store),
            window: config.window,
            key_prefix: config.key_prefix.clone(),
        }
    }

    /// `"memory"` or `"distributed"`.
    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            Backend::Memory { .. } => "memory",
            Backend::Distributed(_) => "distributed",
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn key(&self, nonce: &str) -> String {
        format!("{}{}", self.key_prefix, nonce)
    }

    /// Whether `nonce` was recorded and has not yet expired.
    pub async fn exists(&self, nonce: &str) -> Result<bool, AuthError> {
        match &self.backend {
            Backend::Memory { seen, .. } => Ok(seen.contains(nonce)),
            Backend::Distributed(store) => Ok(store.exists(&self.key(nonce)).await?),
        }
    }

    /// Record `nonce` for one window, overwriting any previous record.
    pub async fn store(&self, nonce: &str) -> Result<(), AuthError> {
        match &self.backend {
            Backend::Memory { seen, .. } => seen.insert(nonce, (), self.window),
            Backend::Distributed(store) => {
                store.set_with_ttl(&self.key(nonce), "1", self.window).await?
            }
        }
        Ok(())
    }

    /// Record `nonce` if it is new.
    ///
    /// Returns `true` when accepted, `false` on replay.
    pub async fn check_and_store(&self, nonce: &str) -> Result<bool, AuthError> {
        let accepted = match &self.backend {
            Backend::Memory { seen, .. } => seen.insert_if_absent(nonce, (), self.window),
            Backend::Distributed(store) => {
                store
                    .set_if_absent_with_ttl(&self.key(nonce), "1", self.window)
                    .await?
            }
        };

        if !accepted {
            debug!(backend = self.backend_name(), "Nonce replay rejected");
        }
        Ok(accepted)
    }

    /// Nonces currently held in memory (0 for the distributed backend).
    pub fn memory_len(&self) -> usize {
        match &self.backend {
            Backend::Memory { seen, .. } => seen.len(),
            Backend::Distributed(_) => 0,
        }
    }

    /// Stop the background sweep. Also happens on drop.
    pub fn shutdown(&self) {
        if let Backend::Memory {
            sweeper: Some(sweeper),
            ..
        } = &self.backend
        {
            sweeper.cancel();
        }
    }
}
