// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! OTP issuance and verification errors.

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use super::email::EmailError;
use crate::storage::StoreError;

/// Errors raised by [`OtpService`](super::OtpService).
///
/// Lockout-style errors carry the numbers a client needs to build its own
/// message.
#[derive(Debug, thiserror::Error)]
pub enum OtpError {
    /// Too many codes issued for this email and purpose
    #[error("Too many OTP requests, retry in {retry_after} seconds")]
    RateLimited { retry_after: u64 },
    /// No pending code for this email and purpose
    #[error("No pending OTP found")]
    NotFound,
    /// The pending code is past its expiry
    #[error("OTP has expired")]
    Expired,
    /// The pending code has used up its attempts
    #[error("Maximum verification attempts ({max}) exceeded")]
    MaxAttempts { max: u32 },
    /// Wrong code
    #[error("Invalid OTP, {remaining_attempts} attempt(s) remaining")]
    InvalidOtp { remaining_attempts: u32 },
    /// The code could not be delivered
    #[error(transparent)]
    EmailDelivery(#[from] EmailError),
    #[error("OTP store error: {0}")]
    Store(#[from] StoreError),
    #[error("Internal OTP error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct OtpErrorBody {
    error: String,
    error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_attempts: Option<u32>,
}

impl OtpError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            OtpError::RateLimited { .. } => "otp_rate_limited",
            OtpError::NotFound => "otp_not_found",
            OtpError::Expired => "otp_expired",
            OtpError::MaxAttempts { .. } => "otp_max_attempts",
            OtpError::InvalidOtp { .. } => "otp_invalid",
            OtpError::EmailDelivery(_) => "otp_email_failed",
            OtpError::Store(_) => "otp_store_error",
            OtpError::Internal(_) => "otp_internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            OtpError::RateLimited { .. } | OtpError::MaxAttempts { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            OtpError::NotFound | OtpError::Expired | OtpError::InvalidOtp { .. } => {
                StatusCode::BAD_REQUEST
            }
            OtpError::EmailDelivery(_) => StatusCode::BAD_GATEWAY,
            OtpError::Store(_) | OtpError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The client must wait (rate limit or lockout) rather than retry.
    pub fn is_lockout(&self) -> bool {
        matches!(
            self,
            OtpError::RateLimited { .. } | OtpError::MaxAttempts { .. }
        )
    }
}

impl IntoResponse for OtpError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (retry_after, remaining_attempts, max_attempts) = match &self {
            OtpError::RateLimited { retry_after } => (Some(*retry_after), None, None),
            OtpError::InvalidOtp { remaining_attempts } => (None, Some(*remaining_attempts), None),
            OtpError::MaxAttempts { max } => (None, None, Some(*max)),
            _ => (None, None, None),
        };
        let body = Json(OtpErrorBody {
            error: self.to_string(),
            error_code: self.error_code().to_string(),
            retry_after,
            remaining_attempts,
            max_attempts,
        });

        let mut response = (status, body).into_response();
        if let Some(seconds) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_of(error: OtpError) -> (StatusCode, serde_json::Value, Option<String>) {
        let response = error.into_response();
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap(), retry_after)
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let (status, body, header) = body_of(OtpError::RateLimited { retry_after: 300 }).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error_code"], "otp_rate_limited");
        assert_eq!(body["retry_after"], 300);
        assert_eq!(header.as_deref(), Some("300"));
    }

    #[tokio::test]
    async fn invalid_otp_carries_remaining_attempts() {
        let (status, body, header) = body_of(OtpError::InvalidOtp {
            remaining_attempts: 2,
        })
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["remaining_attempts"], 2);
        assert!(body.get("retry_after").is_none());
        assert!(header.is_none());
    }

    #[tokio::test]
    async fn max_attempts_is_a_lockout() {
        let error = OtpError::MaxAttempts { max: 5 };
        assert!(error.is_lockout());
        let (status, body, _) = body_of(error).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["max_attempts"], 5);
    }

    #[test]
    fn state_errors_are_not_lockouts() {
        assert!(!OtpError::NotFound.is_lockout());
        assert!(!OtpError::Expired.is_lockout());
        assert!(!OtpError::InvalidOtp { remaining_attempts: 0 }.is_lockout());
    }
}
