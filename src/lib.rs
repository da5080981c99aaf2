// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational KeyAuth - Client-Key Authentication Core
//!
//! Proves that a request came from the holder of a registered private key,
//! within a freshness window, exactly once; and that a one-time code was
//! issued to an email address and used at most once.
//!
//! ## Modules
//!
//! - `crypto` - ECDSA P-256 key pairs and the AES-256-GCM private key envelope
//! - `auth` - Request signing/verification, nonces, public key cache
//! - `otp` - One-time code issuance and verification
//! - `storage` - Collaborator traits and shipped implementations (redb)
//! - `state` - Wiring of the above into one shareable `AuthCore`

pub mod auth;
pub mod config;
pub mod crypto;
pub mod logging;
pub mod maintenance;
pub mod otp;
pub mod state;
pub mod storage;

pub use auth::AuthError;
pub use config::CoreConfig;
pub use otp::OtpError;
pub use state::{AuthCore, Collaborators};
