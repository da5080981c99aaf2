// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! End-to-end signed-request authentication.
//!
//! ## Flow
//!
//! 1. Extract the four signature headers (any missing ⇒ `MissingSignature`)
//! 2. Resolve the public key: [`PublicKeyCache`] first, then the durable
//!    [`PublicKeySource`], back-filling the cache (none ⇒ `UnknownKey`)
//! 3. Verify timestamp window and signature (mismatch ⇒ `InvalidSignature`)
//! 4. With [`ReplayPolicy::Enforce`], record the nonce (seen ⇒ `ReplayDetected`)
//!
//! The nonce is only recorded after the signature verifies, so unsigned
//! garbage cannot burn nonces belonging to legitimate clients.
//!
//! ## Key rotation and revocation
//!
//! When a cached key fails to verify, the key source is consulted once:
//! a rotated key replaces the cached one and the signature is re-checked,
//! a key gone from the source is evicted. A revoked key whose old
//! signatures still verify stays accepted until its cache entries expire
//! (`memory_ttl` / `distributed_ttl`); call [`PublicKeyCache::delete`] on
//! revocation to cut that short.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::headers::{extract_signature_headers, HeaderSource};
use super::key_cache::PublicKeyCache;
use super::nonce::NonceManager;
use super::signature::{verify, SignatureRequest};
use super::AuthError;
use crate::storage::PublicKeySource;

/// Whether a route requires nonce uniqueness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayPolicy {
    /// Reject a nonce seen within the window
    Enforce,
    /// Skip the nonce check (idempotent reads)
    Skip,
}

/// A request that passed authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedRequest {
    pub key_id: String,
    pub nonce: String,
}

/// Verifies signed requests against cached or durable public keys.
pub struct RequestAuthenticator {
    keys: Arc<PublicKeyCache>,
    source: Option<Arc<dyn PublicKeySource>>,
    nonces: Arc<NonceManager>,
    window: Duration,
}

impl RequestAuthenticator {
    pub fn new(
        keys: Arc<PublicKeyCache>,
        source: Option<Arc<dyn PublicKeySource>>,
        nonces: Arc<NonceManager>,
        window: Duration,
    ) -> Self {
        Self {
            keys,
            source,
            nonces,
            window,
        }
    }

    /// Authenticate a request. Returns the key id that signed it.
    pub async fn authenticate<H: HeaderSource + ?Sized>(
        &self,
        headers: &H,
        method: &str,
        url: &str,
        body: Option<&str>,
        policy: ReplayPolicy,
    ) -> Result<AuthenticatedRequest, AuthError> {
        let headers = extract_signature_headers(headers).ok_or(AuthError::MissingSignature)?;
        let (public_key, from_cache) = self.resolve_public_key(&headers.key_id).await?;

        let request = SignatureRequest {
            method,
            url,
            body,
            timestamp: &headers.timestamp,
            nonce: &headers.nonce,
            signature: &headers.signature,
        };
        let mut verified = verify(&request, &public_key, self.window)?;
        if !verified && from_cache {
            if let Some(fresh) = self.refresh_public_key(&headers.key_id, &public_key).await? {
                verified = verify(&request, &fresh, self.window)?;
            }
        }
        if !verified {
            debug!(key_id = %headers.key_id, "Signature mismatch");
            return Err(AuthError::InvalidSignature(
                "signature does not match request".into(),
            ));
        }

        if policy == ReplayPolicy::Enforce && !self.nonces.check_and_store(&headers.nonce).await? {
            debug!(key_id = %headers.key_id, "Replayed nonce");
            return Err(AuthError::ReplayDetected);
        }

        Ok(AuthenticatedRequest {
            key_id: headers.key_id,
            nonce: headers.nonce,
        })
    }

    /// Returns the key and whether it came from the cache.
    async fn resolve_public_key(&self, key_id: &str) -> Result<(String, bool), AuthError> {
        if let Some(public_key) = self.keys.get(key_id).await {
            return Ok((public_key, true));
        }

        let unknown = || AuthError::UnknownKey {
            key_id: key_id.to_string(),
        };
        let source = self.source.as_ref().ok_or_else(unknown)?;
        let public_key = source.find_public_key(key_id).await?.ok_or_else(unknown)?;

        self.keys.set(key_id, &public_key).await?;
        debug!(key_id = %key_id, "Public key loaded from key source");
        Ok((public_key, false))
    }

    /// Re-read a cached key that failed to verify. Returns the replacement
    /// if the source now holds a different key.
    async fn refresh_public_key(
        &self,
        key_id: &str,
        stale: &str,
    ) -> Result<Option<String>, AuthError> {
        let Some(source) = &self.source else {
            return Ok(None);
        };
        match source.find_public_key(key_id).await? {
            Some(fresh) if fresh != stale => {
                self.keys.set(key_id, &fresh).await?;
                debug!(key_id = %key_id, "Cached public key replaced by rotated key");
                Ok(Some(fresh))
            }
            Some(_) => Ok(None),
            None => {
                self.keys.delete(key_id).await;
                debug!(key_id = %key_id, "Cached public key no longer in key source, evicted");
                Ok(None)
            }
        }
    }
}
