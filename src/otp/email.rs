// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! OTP delivery.

use async_trait::async_trait;
use tracing::info;

use super::OtpPurpose;

/// Delivery failure reported by an [`EmailSender`].
#[derive(Debug, thiserror::Error)]
#[error("Email delivery failed: {0}")]
pub struct EmailError(pub String);

/// Sends a freshly issued code to its recipient.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, code: &str, purpose: &OtpPurpose) -> Result<(), EmailError>;
}

/// [`EmailSender`] that only records the dispatch in the log.
///
/// The code itself is never logged. Intended for local development, where
/// the code is read from the distributed store or a debugger instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, to: &str, _code: &str, purpose: &OtpPurpose) -> Result<(), EmailError> {
        info!(to = %mask_email(to), purpose = %purpose, "OTP email dispatched (log only)");
        Ok(())
    }
}

/// `alice@example.com` → `a***@example.com`
pub(crate) fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{first}***@{domain}")
        }
        None => "***".to_string(),
    }
}
