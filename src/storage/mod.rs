// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Collaborator interfaces consumed by the authentication core, plus the
//! implementations shipped with it.
//!
//! ## Layout
//!
//! ```text
//! kv            KeyValueStore (distributed tier) + InMemoryKvStore
//! expiring      bounded in-process map with per-entry TTL (memory tiers)
//! otp_log       OtpLog rows, OtpLogStore trait, InMemoryOtpLogStore
//! otp_database  RedbOtpLogStore (embedded, durable)
//! key_source    PublicKeySource (durable key lookup)
//! ```
//!
//! ## Important Notes
//!
//! - The distributed tier is optional everywhere; memory tiers are not
//!   shared between processes
//! - OTP rows are never deleted, only status-transitioned

pub mod error;
pub mod expiring;
pub mod key_source;
pub mod kv;
pub mod otp_database;
pub mod otp_log;

pub use error::{StoreError, StoreResult};
pub use expiring::ExpiringMap;
pub use key_source::{InMemoryPublicKeySource, PublicKeySource};
pub use kv::{InMemoryKvStore, KeyValueStore};
pub use otp_database::RedbOtpLogStore;
pub use otp_log::{InMemoryOtpLogStore, OtpLog, OtpLogStore, OtpStatus};
