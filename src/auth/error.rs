// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Key and signed-request errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::storage::StoreError;

/// Errors raised by key handling and signed-request verification.
///
/// A signature that simply does not match is *not* an error:
/// [`verify`](super::signature::verify) returns `Ok(false)` for it. The
/// authenticator turns that into [`AuthError::InvalidSignature`].
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Key material is not valid base64 / DER of the expected kind
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),
    /// AES-GCM authentication failed (wrong secret or tampered payload)
    #[error("Failed to decrypt private key")]
    Decryption,
    /// Malformed timestamp or signature, or a signature that does not verify
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    /// Request timestamp is outside the freshness window
    #[error("Signed request has expired")]
    ExpiredRequest,
    /// Nonce already used within its window
    #[error("Replay detected: nonce has already been used")]
    ReplayDetected,
    /// Public key rejected by the cache format check
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),
    /// One or more signature headers absent
    #[error("Signature headers are required")]
    MissingSignature,
    /// No public key registered for the presented key id
    #[error("Unknown key id: {key_id}")]
    UnknownKey { key_id: String },
    /// Key source or distributed store failure
    #[error("Key store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Serialize)]
struct AuthErrorBody {
    error: String,
    error_code: String,
}

impl AuthError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::InvalidKeyFormat(_) => "invalid_key_format",
            AuthError::Decryption => "decryption_failed",
            AuthError::InvalidSignature(_) => "invalid_signature",
            AuthError::ExpiredRequest => "expired_request",
            AuthError::ReplayDetected => "replay_detected",
            AuthError::InvalidPublicKey(_) => "invalid_public_key",
            AuthError::MissingSignature => "missing_signature",
            AuthError::UnknownKey { .. } => "unknown_key",
            AuthError::Store(_) => "key_store_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidSignature(_)
            | AuthError::ExpiredRequest
            | AuthError::ReplayDetected
            | AuthError::MissingSignature
            | AuthError::UnknownKey { .. } => StatusCode::UNAUTHORIZED,
            AuthError::InvalidKeyFormat(_) | AuthError::InvalidPublicKey(_) => {
                StatusCode::BAD_REQUEST
            }
            AuthError::Decryption | AuthError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the client can succeed by re-signing a fresh request.
    pub fn is_retryable_with_new_signature(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidSignature(_) | AuthError::ExpiredRequest | AuthError::ReplayDetected
        )
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(AuthErrorBody {
            error: self.to_string(),
            error_code: self.error_code().to_string(),
        });
        (status, body).into_response()
    }
}
