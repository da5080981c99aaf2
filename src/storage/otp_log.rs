// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! OTP issuance log.
//!
//! Every `send_otp` call appends one row. Rows are never deleted; they are
//! only status-transitioned, and old rows keep counting toward the rate
//! limit until they fall out of its window.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{StoreError, StoreResult};

/// Lifecycle of an issued code. `Verified` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OtpStatus {
    Pending,
    Verified,
    Expired,
}

/// One issued code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OtpLog {
    /// Unique row identifier (UUID)
    pub id: String,
    /// Normalized recipient address
    pub email: String,
    /// What the code was issued for (`register`, `login`, ...)
    pub purpose: String,
    /// `salt:derivedKeyHex`, never the plaintext code
    pub code_hash: String,
    pub status: OtpStatus,
    /// Verification attempts made against this row
    pub attempts: u32,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OtpLog {
    /// Create a pending row expiring at `expires_at`.
    pub fn new_pending(
        email: impl Into<String>,
        purpose: impl Into<String>,
        code_hash: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.into(),
            purpose: purpose.into(),
            code_hash: code_hash.into(),
            status: OtpStatus::Pending,
            attempts: 0,
            expires_at,
            verified_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == OtpStatus::Pending
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn mark_verified(&mut self, at: DateTime<Utc>) {
        self.status = OtpStatus::Verified;
        self.verified_at = Some(at);
    }

    pub fn mark_expired(&mut self) {
        self.status = OtpStatus::Expired;
    }
}

/// Durable storage for [`OtpLog`] rows.
#[async_trait]
pub trait OtpLogStore: Send + Sync {
    /// Append a new row.
    async fn insert(&self, log: &OtpLog) -> StoreResult<()>;

    /// Replace an existing row by id.
    async fn update(&self, log: &OtpLog) -> StoreResult<()>;

    /// Most recently created `Pending` row for `(email, purpose)`.
    async fn find_latest_pending(&self, email: &str, purpose: &str)
        -> StoreResult<Option<OtpLog>>;

    /// Rows for `(email, purpose)` created at or after `since`, newest first.
    async fn list_created_since(
        &self,
        email: &str,
        purpose: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<OtpLog>>;
}

/// [`OtpLogStore`] kept in process memory.
#[derive(Default)]
pub struct InMemoryOtpLogStore {
    rows: RwLock<Vec<OtpLog>>,
}

impl InMemoryOtpLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a row by id.
    pub async fn get(&self, id: &str) -> Option<OtpLog> {
        self.rows.read().await.iter().find(|row| row.id == id).cloned()
    }

    /// Total rows stored.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl OtpLogStore for InMemoryOtpLogStore {
    async fn insert(&self, log: &OtpLog) -> StoreResult<()> {
        self.rows.write().await.push(log.clone());
        Ok(())
    }

    async fn update(&self, log: &OtpLog) -> StoreResult<()> {
        let mut rows = self.rows.write().await;
        let row = rows
            .iter_mut()
            .find(|row| row.id == log.id)
            .ok_or_else(|| StoreError::NotFound(format!("OTP log {}", log.id)))?;
        *row = log.clone();
        Ok(())
    }

    async fn find_latest_pending(
        &self,
        email: &str,
        purpose: &str,
    ) -> StoreResult<Option<OtpLog>> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|row| row.email == email && row.purpose == purpose && row.is_pending())
            .max_by_key(|row| row.created_at)
            .cloned())
    }

    async fn list_created_since(
        &self,
        email: &str,
        purpose: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<OtpLog>> {
        let rows = self.rows.read().await;
        let mut matching: Vec<OtpLog> = rows
            .iter()
            .filter(|row| row.email == email && row.purpose == purpose && row.created_at >= since)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }
}
