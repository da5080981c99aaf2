// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Client-key request authentication: a request is accepted when it was
//! signed by the holder of a registered private key, within a freshness
//! window, exactly once.
//!
//! ## Auth Flow
//!
//! 1. Client signs `{method, url, body, timestamp, nonce}` with its
//!    ECDSA P-256 private key
//! 2. Client sends `X-Signature`, `X-Timestamp`, `X-Nonce`, `X-Key-Id`
//! 3. Server:
//!    - Resolves the public key for `X-Key-Id` (cache, then key source)
//!    - Checks the timestamp window and the signature
//!    - Records the nonce (replay check) when the route requires it
//!
//! ## Security
//!
//! - Signature verification and replay prevention are separate steps; see
//!   [`ReplayPolicy`]
//! - Default window is 60 seconds, applied in both directions
//! - The public key cache is never authoritative

pub mod authenticator;
pub mod error;
pub mod headers;
pub mod key_cache;
pub mod nonce;
pub mod signature;

pub use authenticator::{AuthenticatedRequest, ReplayPolicy, RequestAuthenticator};
pub use error::AuthError;
pub use headers::{
    extract_signature_headers, sign_request, HeaderSource, SignatureHeaders, SignedHeaders,
};
pub use key_cache::PublicKeyCache;
pub use nonce::NonceManager;
pub use signature::{sign, verify, RequestData, SignatureRequest, SignatureResult};
