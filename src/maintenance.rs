// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Background Sweeps
//!
//! Periodic removal of expired entries from the in-process tiers (public-key
//! cache L1, memory nonce store, in-memory key-value store). Lazy expiry already hides dead entries
//! from readers; the sweep bounds how long they keep holding memory to one
//! interval.
//!
//! ## Shutdown
//!
//! Each sweep owns a `tokio_util::sync::CancellationToken`. Cancelling the
//! token (explicitly via [`SweepHandle::cancel`] or by dropping the handle)
//! stops the loop at its next wake-up. The task holds only a weak reference
//! to the map, so it also exits once the owning component is gone.
//!
//! Outside a tokio runtime nothing is spawned and callers rely on lazy
//! expiry alone.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::storage::ExpiringMap;

/// Cancels its sweep task when dropped.
#[derive(Debug)]
pub struct SweepHandle {
    shutdown: CancellationToken,
}

impl SweepHandle {
    /// Stop the sweep. Idempotent.
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Spawn a sweep over `map` every `interval`.
///
/// Returns `None` when called outside a tokio runtime.
pub fn spawn_sweeper<V>(
    name: &'static str,
    map: &Arc<ExpiringMap<V>>,
    interval: Duration,
) -> Option<SweepHandle>
where
    V: Clone + Send + Sync + 'static,
{
    let runtime = tokio::runtime::Handle::try_current().ok()?;
    let shutdown = CancellationToken::new();

    runtime.spawn(run_sweeper(
        name,
        Arc::downgrade(map),
        interval,
        shutdown.clone(),
    ));

    Some(SweepHandle { shutdown })
}

async fn run_sweeper<V>(
    name: &'static str,
    map: Weak<ExpiringMap<V>>,
    interval: Duration,
    shutdown: CancellationToken,
) where
    V: Clone + Send + Sync + 'static,
{
    debug!(sweep = name, interval_secs = interval.as_secs(), "Starting sweep");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {},
            _ = shutdown.cancelled() => {
                debug!(sweep = name, "Sweep shutting down");
                return;
            }
        }

        let Some(map) = map.upgrade() else {
            debug!(sweep = name, "Sweep target dropped, exiting");
            return;
        };

        let removed = map.sweep_expired();
        if removed > 0 {
            info!(sweep = name, removed, remaining = map.len(), "Swept expired entries");
        }
    }
}
