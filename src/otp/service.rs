// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! OTP issuance and verification.
//!
//! ## State machine
//!
//! Per `(email, purpose)`, each `send_otp` appends a fresh `Pending` row,
//! which ends as `Verified` or `Expired`. Old rows stay for audit and keep
//! counting toward the rate limit.
//!
//! ## Verification
//!
//! 1. **Fast path** (distributed store configured and `fast_path` on): the
//!    plaintext code cached at issuance under `otp:{purpose}:{email}`, bound
//!    to the id of the row it was issued with, is compared directly. A match
//!    verifies that row, if it is still the latest pending one, without
//!    touching the attempt counter.
//! 2. **Slow path**: latest pending row → expiry check → attempt check →
//!    attempt increment (persisted) → scrypt comparison.
//!
//! ## Security
//!
//! - The fast path keeps plaintext codes in the distributed store for their
//!   lifetime. Disable it when that store is not trusted or when attempts
//!   must be counted on every guess.
//! - The attempt increment is written before the comparison result is
//!   acted on, so a failing final attempt still locks the code.
//! - A locked or expired code is also removed from the fast-path cache.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, info, warn};
use unicode_normalization::UnicodeNormalization;

use super::code::{constant_time_eq, generate_code, generate_token, hash_code, verify_code};
use super::email::{mask_email, EmailSender};
use super::OtpError;
use crate::config::OtpServiceConfig;
use crate::storage::{InMemoryKvStore, KeyValueStore, OtpLog, OtpLogStore};

/// What a code was issued for. Open-ended; unknown values are kept as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OtpPurpose {
    Register,
    Login,
    ResetPassword,
    Other(String),
}

impl OtpPurpose {
    pub fn as_str(&self) -> &str {
        match self {
            OtpPurpose::Register => "register",
            OtpPurpose::Login => "login",
            OtpPurpose::ResetPassword => "reset-password",
            OtpPurpose::Other(purpose) => purpose,
        }
    }
}

impl From<&str> for OtpPurpose {
    fn from(value: &str) -> Self {
        match value {
            "register" => OtpPurpose::Register,
            "login" => OtpPurpose::Login,
            "reset-password" => OtpPurpose::ResetPassword,
            other => OtpPurpose::Other(other.to_string()),
        }
    }
}

impl fmt::Display for OtpPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for OtpPurpose {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OtpPurpose {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(OtpPurpose::from(value.as_str()))
    }
}

/// Result of a successful `send_otp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpSent {
    /// Seconds until the code expires
    pub expires_in: u64,
}

/// Result of a successful `verify_otp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpVerification {
    pub verified: bool,
    /// Opaque one-time token proving the verification
    pub token: String,
}

/// Trim, NFKC-normalize and lowercase an email address.
pub fn normalize_email(email: &str) -> String {
    email.trim().nfkc().collect::<String>().to_lowercase()
}

fn code_key(purpose: &OtpPurpose, email: &str) -> String {
    format!("otp:{purpose}:{email}")
}

/// Fast-path cache value: `{row_id}:{code}`.
fn fast_path_entry(row_id: &str, code: &str) -> String {
    format!("{row_id}:{code}")
}

fn verified_key(purpose: &OtpPurpose, email: &str) -> String {
    format!("otp_verified:{purpose}:{email}")
}

/// Issues and verifies one-time codes.
pub struct OtpService {
    logs: Arc<dyn OtpLogStore>,
    email: Arc<dyn EmailSender>,
    /// Distributed store for fast-path codes
    cache: Option<Arc<dyn KeyValueStore>>,
    /// Where verified tokens live: the distributed store, or process memory
    tokens: Arc<dyn KeyValueStore>,
    config: OtpServiceConfig,
}

impl OtpService {
    pub fn new(
        logs: Arc<dyn OtpLogStore>,
        email: Arc<dyn EmailSender>,
        cache: Option<Arc<dyn KeyValueStore>>,
        config: OtpServiceConfig,
    ) -> Self {
        let tokens = match &cache {
            Some(store) => store.clone(),
            None => Arc::new(InMemoryKvStore::new()) as Arc<dyn KeyValueStore>,
        };
        Self {
            logs,
            email,
            cache,
            tokens,
            config,
        }
    }

    pub fn config(&self) -> &OtpServiceConfig {
        &self.config
    }

    fn fast_path_store(&self) -> Option<&Arc<dyn KeyValueStore>> {
        self.cache.as_ref().filter(|_| self.config.fast_path)
    }

    /// Issue a code for `(email, purpose)` and send it.
    pub async fn send_otp(&self, email: &str, purpose: &OtpPurpose) -> Result<OtpSent, OtpError> {
        let email = normalize_email(email);
        let now = Utc::now();

        let window = chrono::Duration::from_std(self.config.rate_limit_window)
            .map_err(|e| OtpError::Internal(format!("rate limit window: {e}")))?;
        let recent = self
            .logs
            .list_created_since(&email, purpose.as_str(), now - window)
            .await?;
        if recent.len() >= self.config.rate_limit_max as usize {
            info!(
                to = %mask_email(&email),
                purpose = %purpose,
                issued = recent.len(),
                "OTP rate limit hit"
            );
            return Err(OtpError::RateLimited {
                retry_after: self.config.rate_limit_window.as_secs(),
            });
        }

        let code = generate_code();
        let code_hash = hash_code(&code).await?;

        let expiry = chrono::Duration::from_std(self.config.otp_expiry)
            .map_err(|e| OtpError::Internal(format!("otp expiry: {e}")))?;
        let mut log = OtpLog::new_pending(&email, purpose.as_str(), code_hash, now + expiry);
        self.logs.insert(&log).await?;

        if let Some(store) = self.fast_path_store() {
            if let Err(e) = store
                .set_with_ttl(
                    &code_key(purpose, &email),
                    &fast_path_entry(&log.id, &code),
                    self.config.otp_expiry,
                )
                .await
            {
                warn!(purpose = %purpose, error = %e, "Failed to cache OTP for fast path");
                self.forget_cached_code(purpose, &email).await;
            }
        }

        if let Err(e) = self.email.send(&email, &code, purpose).await {
            warn!(
                to = %mask_email(&email),
                purpose = %purpose,
                error = %e,
                "OTP email delivery failed, expiring code"
            );
            log.mark_expired();
            if let Err(update_err) = self.logs.update(&log).await {
                warn!(otp_id = %log.id, error = %update_err, "Failed to expire undelivered OTP");
            }
            self.forget_cached_code(purpose, &email).await;
            return Err(OtpError::EmailDelivery(e));
        }

        info!(to = %mask_email(&email), purpose = %purpose, otp_id = %log.id, "OTP issued");
        Ok(OtpSent {
            expires_in: self.config.otp_expiry.as_secs(),
        })
    }

    /// Check `code` for `(email, purpose)`. Returns a verified token on success.
    pub async fn verify_otp(
        &self,
        email: &str,
        code: &str,
        purpose: &OtpPurpose,
    ) -> Result<OtpVerification, OtpError> {
        let email = normalize_email(email);
        let code = code.trim();

        if let Some(verification) = self.try_fast_path(&email, code, purpose).await? {
            return Ok(verification);
        }

        let mut log = self
            .logs
            .find_latest_pending(&email, purpose.as_str())
            .await?
            .ok_or(OtpError::NotFound)?;

        let now = Utc::now();
        if log.is_expired_at(now) {
            log.mark_expired();
            self.logs.update(&log).await?;
            self.forget_cached_code(purpose, &email).await;
            return Err(OtpError::Expired);
        }

        let max = self.config.max_attempts;
        if log.attempts >= max {
            log.mark_expired();
            self.logs.update(&log).await?;
            self.forget_cached_code(purpose, &email).await;
            return Err(OtpError::MaxAttempts { max });
        }

        log.attempts += 1;
        self.logs.update(&log).await?;

        if !verify_code(code, &log.code_hash).await? {
            let remaining_attempts = max.saturating_sub(log.attempts);
            debug!(otp_id = %log.id, remaining_attempts, "Wrong OTP");
            if remaining_attempts == 0 {
                self.forget_cached_code(purpose, &email).await;
            }
            return Err(OtpError::InvalidOtp { remaining_attempts });
        }

        log.mark_verified(now);
        self.logs.update(&log).await?;
        self.forget_cached_code(purpose, &email).await;

        info!(otp_id = %log.id, purpose = %purpose, "OTP verified");
        self.issue_token(purpose, &email).await
    }

    async fn try_fast_path(
        &self,
        email: &str,
        code: &str,
        purpose: &OtpPurpose,
    ) -> Result<Option<OtpVerification>, OtpError> {
        let Some(store) = self.fast_path_store() else {
            return Ok(None);
        };

        let cached = match store.get(&code_key(purpose, email)).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!(purpose = %purpose, error = %e, "OTP fast path lookup failed");
                return Ok(None);
            }
        };
        let Some(cached) = cached else {
            return Ok(None);
        };
        let Some((row_id, cached_code)) = cached.rsplit_once(':') else {
            self.forget_cached_code(purpose, email).await;
            return Ok(None);
        };
        if !constant_time_eq(cached_code, code) {
            return Ok(None);
        }

        let now = Utc::now();
        let Some(mut log) = self
            .logs
            .find_latest_pending(email, purpose.as_str())
            .await?
            .filter(|log| log.id == row_id && !log.is_expired_at(now))
        else {
            // Orphaned or superseded cache entry; the slow path reports the real state.
            self.forget_cached_code(purpose, email).await;
            return Ok(None);
        };

        log.mark_verified(now);
        self.logs.update(&log).await?;
        self.forget_cached_code(purpose, email).await;

        info!(otp_id = %log.id, purpose = %purpose, "OTP verified (fast path)");
        self.issue_token(purpose, email).await.map(Some)
    }

    async fn issue_token(
        &self,
        purpose: &OtpPurpose,
        email: &str,
    ) -> Result<OtpVerification, OtpError> {
        let token = generate_token();
        self.tokens
            .set_with_ttl(
                &verified_key(purpose, email),
                &token,
                self.config.verified_token_expiry,
            )
            .await?;
        Ok(OtpVerification {
            verified: true,
            token,
        })
    }

    /// Redeem a verified token once. Returns `false` for an unknown,
    /// expired, already used, or mismatched token.
    pub async fn consume_verified_token(
        &self,
        email: &str,
        purpose: &OtpPurpose,
        token: &str,
    ) -> Result<bool, OtpError> {
        let email = normalize_email(email);
        let key = verified_key(purpose, &email);

        let Some(stored) = self.tokens.get(&key).await? else {
            return Ok(false);
        };
        if !constant_time_eq(&stored, token) {
            return Ok(false);
        }
        // Only the caller whose delete removed the key wins.
        Ok(self.tokens.del(&[key]).await? == 1)
    }

    async fn forget_cached_code(&self, purpose: &OtpPurpose, email: &str) {
        let Some(store) = &self.cache else {
            return;
        };
        if let Err(e) = store.del(&[code_key(purpose, email)]).await {
            warn!(purpose = %purpose, error = %e, "Failed to drop cached OTP");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otp::email::EmailError;
    use crate::storage::{InMemoryOtpLogStore, OtpStatus, RedbOtpLogStore};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every code it is asked to send.
    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    impl RecordingSender {
        fn last_code(&self) -> String {
            self.sent.lock().unwrap().last().unwrap().1.clone()
        }
    }

    #[async_trait]
    impl EmailSender for RecordingSender {
        async fn send(&self, to: &str, code: &str, _purpose: &OtpPurpose) -> Result<(), EmailError> {
            if self.fail {
                return Err(EmailError("smtp unavailable".into()));
            }
            self.sent.lock().unwrap().push((to.to_string(), code.to_string()));
            Ok(())
        }
    }

    struct Fixture {
        service: OtpService,
        logs: Arc<InMemoryOtpLogStore>,
        sender: Arc<RecordingSender>,
        cache: Arc<InMemoryKvStore>,
    }

    fn fixture(config: OtpServiceConfig, with_cache: bool, failing_email: bool) -> Fixture {
        let logs = Arc::new(InMemoryOtpLogStore::new());
        let sender = Arc::new(RecordingSender {
            fail: failing_email,
            ..RecordingSender::default()
        });
        let cache = Arc::new(InMemoryKvStore::new());
        let service = OtpService::new(
            logs.clone(),
            sender.clone(),
            with_cache.then(|| cache.clone() as Arc<dyn KeyValueStore>),
            config,
        );
        Fixture {
            service,
            logs,
            sender,
            cache,
        }
    }

    fn register() -> OtpPurpose {
        OtpPurpose::Register
    }

    #[tokio::test]
    async fn otp_lifecycle_wrong_codes_then_lockout() {
        let config = OtpServiceConfig {
            max_attempts: 3,
            ..OtpServiceConfig::default()
        };
        let f = fixture(config, true, false);
        f.service.send_otp("a@x.com", &register()).await.unwrap();
        let code = f.sender.last_code();

        for expected in [2, 1, 0] {
            let err = f
                .service
                .verify_otp("a@x.com", "000000", &register())
                .await
                .unwrap_err();
            assert!(
                matches!(err, OtpError::InvalidOtp { remaining_attempts } if remaining_attempts == expected),
                "{err:?}"
            );
        }

        let err = f
            .service
            .verify_otp("a@x.com", &code, &register())
            .await
            .unwrap_err();
        assert!(matches!(err, OtpError::MaxAttempts { max: 3 }));
    }

    #[tokio::test]
    async fn rate_limit_after_three_sends() {
        let config = OtpServiceConfig {
            rate_limit_max: 3,
            rate_limit_window: Duration::from_secs(300),
            ..OtpServiceConfig::default()
        };
        let f = fixture(config, false, false);

        for _ in 0..3 {
            f.service.send_otp("a@x.com", &register()).await.unwrap();
        }
        let err = f.service.send_otp("a@x.com", &register()).await.unwrap_err();
        assert!(matches!(err, OtpError::RateLimited { retry_after: 300 }));

        // Limits are per purpose.
        f.service.send_otp("a@x.com", &OtpPurpose::Login).await.unwrap();
    }

    #[tokio::test]
    async fn slow_path_verifies_and_issues_token() {
        let f = fixture(OtpServiceConfig::default(), false, false);
        let sent = f.service.send_otp("a@x.com", &register()).await.unwrap();
        assert_eq!(sent.expires_in, 300);

        let code = f.sender.last_code();
        let verification = f
            .service
            .verify_otp("a@x.com", &code, &register())
            .await
            .unwrap();
        assert!(verification.verified);
        assert_eq!(verification.token.len(), 64);

        // The row is terminal now.
        assert!(matches!(
            f.service.verify_otp("a@x.com", &code, &register()).await,
            Err(OtpError::NotFound)
        ));
    }

    #[tokio::test]
    async fn fast_path_skips_attempt_counting() {
        let f = fixture(OtpServiceConfig::default(), true, false);
        f.service.send_otp("a@x.com", &register()).await.unwrap();
        let code = f.sender.last_code();

        let key = code_key(&register(), "a@x.com");
        let cached = f.cache.get(&key).await.unwrap().unwrap();
        assert!(cached.ends_with(&format!(":{code}")));

        f.service
            .verify_otp("a@x.com", &code, &register())
            .await
            .unwrap();

        assert_eq!(f.cache.get(&key).await.unwrap(), None);
        let rows = f
            .logs
            .list_created_since("a@x.com", "register", Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(rows[0].status, OtpStatus::Verified);
        assert_eq!(rows[0].attempts, 0);
    }

    #[tokio::test]
    async fn fast_path_disabled_keeps_codes_out_of_cache() {
        let config = OtpServiceConfig {
            fast_path: false,
            ..OtpServiceConfig::default()
        };
        let f = fixture(config, true, false);
        f.service.send_otp("a@x.com", &register()).await.unwrap();

        assert!(f.cache.get(&code_key(&register(), "a@x.com")).await.unwrap().is_none());
        let code = f.sender.last_code();
        f.service
            .verify_otp("a@x.com", &code, &register())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn expired_code_is_rejected() {
        let config = OtpServiceConfig {
            otp_expiry: Duration::from_millis(20),
            ..OtpServiceConfig::default()
        };
        let f = fixture(config, false, false);
        f.service.send_otp("a@x.com", &register()).await.unwrap();
        let code = f.sender.last_code();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(
            f.service.verify_otp("a@x.com", &code, &register()).await,
            Err(OtpError::Expired)
        ));
        assert!(matches!(
            f.service.verify_otp("a@x.com", &code, &register()).await,
            Err(OtpError::NotFound)
        ));
    }

    #[tokio::test]
    async fn verify_without_send_is_not_found() {
        let f = fixture(OtpServiceConfig::default(), true, false);
        assert!(matches!(
            f.service.verify_otp("nobody@x.com", "123456", &register()).await,
            Err(OtpError::NotFound)
        ));
    }

    #[tokio::test]
    async fn latest_code_wins() {
        let f = fixture(OtpServiceConfig::default(), false, false);
        f.service.send_otp("a@x.com", &register()).await.unwrap();
        let first = f.sender.last_code();
        f.service.send_otp("a@x.com", &register()).await.unwrap();
        let second = f.sender.last_code();

        if first != second {
            assert!(matches!(
                f.service.verify_otp("a@x.com", &first, &register()).await,
                Err(OtpError::InvalidOtp { .. })
            ));
        }
        f.service
            .verify_otp("a@x.com", &second, &register())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cached_code_of_superseded_row_falls_back_to_slow_path() {
        let f = fixture(OtpServiceConfig::default(), true, false);
        let key = code_key(&register(), "a@x.com");

        f.service.send_otp("a@x.com", &register()).await.unwrap();
        let first = f.sender.last_code();
        let first_entry = f.cache.get(&key).await.unwrap().unwrap();
        f.service.send_otp("a@x.com", &register()).await.unwrap();
        let second = f.sender.last_code();

        // A failed fast-path write for the second code left the first cached.
        f.cache
            .set_with_ttl(&key, &first_entry, Duration::from_secs(300))
            .await
            .unwrap();

        if first != second {
            assert!(matches!(
                f.service.verify_otp("a@x.com", &first, &register()).await,
                Err(OtpError::InvalidOtp { .. })
            ));
            assert!(f.cache.get(&key).await.unwrap().is_none());
        }
        f.service
            .verify_otp("a@x.com", &second, &register())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn code_for_crafted_address_does_not_verify_victim() {
        let dir = tempfile::TempDir::new().unwrap();
        let logs = Arc::new(RedbOtpLogStore::open(&dir.path().join("otp.redb")).unwrap());
        let sender = Arc::new(RecordingSender::default());
        let service = OtpService::new(
            logs,
            sender.clone(),
            None,
            OtpServiceConfig::default(),
        );

        service
            .send_otp("victim@x.com\0login", &register())
            .await
            .unwrap();
        let code = sender.last_code();

        assert!(matches!(
            service.verify_otp("victim@x.com", &code, &OtpPurpose::Login).await,
            Err(OtpError::NotFound)
        ));
        service
            .send_otp("victim@x.com", &OtpPurpose::Login)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn email_is_normalized() {
        let f = fixture(OtpServiceConfig::default(), false, false);
        f.service
            .send_otp("  Alice@Example.COM ", &register())
            .await
            .unwrap();
        let code = f.sender.last_code();

        f.service
            .verify_otp("alice@example.com", &code, &register())
            .await
            .unwrap();
        assert_eq!(normalize_email("ＡＢＣ@x.com"), "abc@x.com");
    }

    #[tokio::test]
    async fn email_failure_expires_row_and_cache() {
        let f = fixture(OtpServiceConfig::default(), true, true);
        let err = f.service.send_otp("a@x.com", &register()).await.unwrap_err();
        assert!(matches!(err, OtpError::EmailDelivery(_)));

        assert!(f.cache.get(&code_key(&register(), "a@x.com")).await.unwrap().is_none());
        assert_eq!(f.logs.len().await, 1);
        assert!(matches!(
            f.service.verify_otp("a@x.com", "123456", &register()).await,
            Err(OtpError::NotFound)
        ));
    }

    #[tokio::test]
    async fn verified_token_is_single_use() {
        for with_cache in [true, false] {
            let f = fixture(OtpServiceConfig::default(), with_cache, false);
            f.service.send_otp("a@x.com", &register()).await.unwrap();
            let code = f.sender.last_code();
            let token = f
                .service
                .verify_otp("a@x.com", &code, &register())
                .await
                .unwrap()
                .token;

            assert!(!f
                .service
                .consume_verified_token("a@x.com", &register(), "wrong")
                .await
                .unwrap());
            assert!(!f
                .service
                .consume_verified_token("a@x.com", &OtpPurpose::Login, &token)
                .await
                .unwrap());
            assert!(f
                .service
                .consume_verified_token("A@X.com", &register(), &token)
                .await
                .unwrap());
            assert!(!f
                .service
                .consume_verified_token("a@x.com", &register(), &token)
                .await
                .unwrap());
        }
    }

    #[test]
    fn purpose_round_trips_through_strings() {
        assert_eq!(OtpPurpose::from("reset-password"), OtpPurpose::ResetPassword);
        assert_eq!(OtpPurpose::from("invite").as_str(), "invite");
        assert_eq!(
            serde_json::to_string(&OtpPurpose::Register).unwrap(),
            "\"register\""
        );
    }
}
