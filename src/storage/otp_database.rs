// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded OTP log backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `otp_logs`: row id → serialized [`OtpLog`]
//! - `otp_log_index`: composite key (len|email, len|purpose, !created_at, id) → row id

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use super::otp_log::{OtpLog, OtpLogStore};
use super::{StoreError, StoreResult};

// =============================================================================
// Table Definitions
// =============================================================================

/// Primary table: row id → serialized OtpLog (JSON bytes).
const OTP_LOGS: TableDefinition<&str, &[u8]> = TableDefinition::new("otp_logs");

/// Index: composite key → row id.
/// Newest rows sort first within an `(email, purpose)` prefix.
const OTP_LOG_INDEX: TableDefinition<&[u8], &str> = TableDefinition::new("otp_log_index");

// =============================================================================
// Index Key Helpers
// =============================================================================

/// Build the composite index key for a row.
///
/// Format: `u32_be(len) email | u32_be(len) purpose | inverted_created_at_be | id`.
/// Length prefixes keep one `(email, purpose)` pair from ever being a byte
/// prefix of another, whatever bytes the components contain.
fn make_index_key(email: &str, purpose: &str, created_at: DateTime<Utc>, id: &str) -> Vec<u8> {
    let mut key = make_prefix(email, purpose);
    key.extend_from_slice(&invert_timestamp(created_at));
    key.extend_from_slice(id.as_bytes());
    key
}

/// Prefix shared by every row of `(email, purpose)`.
fn make_prefix(email: &str, purpose: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(email.len() + purpose.len() + 8);
    push_component(&mut prefix, email);
    push_component(&mut prefix, purpose);
    prefix
}

fn push_component(key: &mut Vec<u8>, value: &str) {
    key.extend_from_slice(&(value.len() as u32).to_be_bytes());
    key.extend_from_slice(value.as_bytes());
}

fn invert_timestamp(at: DateTime<Utc>) -> [u8; 8] {
    (!(at.timestamp_millis() as u64)).to_be_bytes()
}

fn index_timestamp(key: &[u8], prefix_len: usize) -> Option<i64> {
    let bytes: [u8; 8] = key.get(prefix_len..prefix_len + 8)?.try_into().ok()?;
    Some(!u64::from_be_bytes(bytes) as i64)
}

// =============================================================================
// RedbOtpLogStore
// =============================================================================

/// Durable [`OtpLogStore`] in an embedded redb file.
pub struct RedbOtpLogStore {
    db: Database,
}

impl RedbOtpLogStore {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(OTP_LOGS)?;
            let _ = write_txn.open_table(OTP_LOG_INDEX)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Look up a single row by id.
    pub fn get(&self, id: &str) -> StoreResult<Option<OtpLog>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(OTP_LOGS)?;
        match table.get(id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Walk the rows of `(email, purpose)` newest first until `visit` returns `false`.
    fn scan_newest_first<F>(&self, email: &str, purpose: &str, mut visit: F) -> StoreResult<()>
    where
        F: FnMut(i64, OtpLog) -> bool,
    {
        let read_txn = self.db.begin_read()?;
        let idx_table = read_txn.open_table(OTP_LOG_INDEX)?;
        let log_table = read_txn.open_table(OTP_LOGS)?;

        let prefix = make_prefix(email, purpose);

        for entry in idx_table.range(prefix.as_slice()..)? {
            let (key, id) = entry?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let Some(created_ms) = index_timestamp(key.value(), prefix.len()) else {
                tracing::warn!("Skipping malformed OTP index key");
                continue;
            };
            let Some(row) = log_table.get(id.value())? else {
                tracing::warn!(id = %id.value(), "OTP index points at missing row");
                continue;
            };
            let log: OtpLog = serde_json::from_slice(row.value())?;
            if log.email != email || log.purpose != purpose {
                tracing::warn!(id = %log.id, "OTP index entry belongs to another address");
                continue;
            }
            if !visit(created_ms, log) {
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl OtpLogStore for RedbOtpLogStore {
    async fn insert(&self, log: &OtpLog) -> StoreResult<()> {
        let json = serde_json::to_vec(log)?;
        let key = make_index_key(&log.email, &log.purpose, log.created_at, &log.id);

        let write_txn = self.db.begin_write()?;
        {
            let mut log_table = write_txn.open_table(OTP_LOGS)?;
            log_table.insert(log.id.as_str(), json.as_slice())?;

            let mut idx_table = write_txn.open_table(OTP_LOG_INDEX)?;
            idx_table.insert(key.as_slice(), log.id.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    async fn update(&self, log: &OtpLog) -> StoreResult<()> {
        let json = serde_json::to_vec(log)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(OTP_LOGS)?;
            if table.get(log.id.as_str())?.is_none() {
                return Err(StoreError::NotFound(format!("OTP log {}", log.id)));
            }
            table.insert(log.id.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    async fn find_latest_pending(
        &self,
        email: &str,
        purpose: &str,
    ) -> StoreResult<Option<OtpLog>> {
        let mut found = None;
        self.scan_newest_first(email, purpose, |_, log| {
            if log.is_pending() {
                found = Some(log);
                return false;
            }
            true
        })?;
        Ok(found)
    }

    async fn list_created_since(
        &self,
        email: &str,
        purpose: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<OtpLog>> {
        let since_ms = since.timestamp_millis();
        let mut rows = Vec::new();
        self.scan_newest_first(email, purpose, |created_ms, log| {
            if created_ms < since_ms {
                return false;
            }
            rows.push(log);
            true
        })?;
        Ok(rows)
    }
}
