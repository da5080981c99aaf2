// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::auth::{NonceManager, PublicKeyCache, RequestAuthenticator};
use crate::config::{ConfigError, CoreConfig};
use crate::otp::{EmailSender, LogEmailSender, OtpService};
use crate::storage::{InMemoryOtpLogStore, KeyValueStore, OtpLogStore, PublicKeySource};

/// External services the core talks to.
pub struct Collaborators {
    /// Shared distributed store; `None` means memory-only tiers
    pub kv: Option<Arc<dyn KeyValueStore>>,
    pub otp_logs: Arc<dyn OtpLogStore>,
    pub email: Arc<dyn EmailSender>,
    /// Durable public key lookup behind the cache
    pub key_source: Option<Arc<dyn PublicKeySource>>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            kv: None,
            otp_logs: Arc::new(InMemoryOtpLogStore::new()),
            email: Arc::new(LogEmailSender),
            key_source: None,
        }
    }
}

/// Wired authentication components, cheap to clone into request handlers.
#[derive(Clone)]
pub struct AuthCore {
    pub config: Arc<CoreConfig>,
    pub key_cache: Arc<PublicKeyCache>,
    pub nonces: Arc<NonceManager>,
    pub authenticator: Arc<RequestAuthenticator>,
    pub otp: Arc<OtpService>,
}

impl AuthCore {
    /// Validate `config` and build every component. Must be called inside a
    /// tokio runtime for the background sweeps to start.
    pub fn new(config: CoreConfig, collaborators: Collaborators) -> Result<Self, ConfigError> {
        config.validate()?;

        let key_cache = Arc::new(PublicKeyCache::new(
            collaborators.kv.clone(),
            config.public_key_cache.clone(),
            config.environment,
        ));
        let nonces = Arc::new(NonceManager::new(collaborators.kv.clone(), &config.nonce));
        let authenticator = Arc::new(RequestAuthenticator::new(
            key_cache.clone(),
            collaborators.key_source,
            nonces.clone(),
            config.signature.window,
        ));
        let otp = Arc::new(OtpService::new(
            collaborators.otp_logs,
            collaborators.email,
            collaborators.kv,
            config.otp.clone(),
        ));

        tracing::info!(
            environment = %config.environment,
            nonce_backend = nonces.backend_name(),
            distributed_cache = key_cache.has_distributed(),
            "Authentication core initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            key_cache,
            nonces,
            authenticator,
            otp,
        })
    }

    /// Master secret for private key envelopes, if configured.
    pub fn private_key_secret(&self) -> Option<&[u8]> {
        self.config
            .private_key_encryption_secret
            .as_deref()
            .map(str::as_bytes)
    }

    /// Stop background sweeps.
    pub fn shutdown(&self) {
        self.nonces.shutdown();
        self.key_cache.shutdown();
        tracing::info!("Authentication core shut down");
    }
}
