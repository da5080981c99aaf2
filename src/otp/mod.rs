// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # OTP Module
//!
//! Email one-time codes: issuance with rate limiting, verification with an
//! attempt limit, and single-use verified tokens.
//!
//! ## Security
//!
//! - Codes are stored durably only as salted scrypt hashes
//! - Comparisons are constant time
//! - `email + purpose` is the unit of rate limiting and lookup

pub mod code;
pub mod email;
pub mod error;
pub mod service;

pub use email::{EmailError, EmailSender, LogEmailSender};
pub use error::OtpError;
pub use service::{normalize_email, OtpPurpose, OtpSent, OtpService, OtpVerification};
