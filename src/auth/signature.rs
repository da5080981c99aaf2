// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! ECDSA P-256 / SHA-256 request signing.
//!
//! ## Canonical message
//!
//! The signed bytes are the compact JSON serialization of
//!
//! ```text
//! {"method":..,"url":..,"body":..,"timestamp":..,"nonce":..}
//! ```
//!
//! with exactly that key order. `body` is `null` when the request has none
//! and `timestamp` is decimal milliseconds since the epoch, as a string.
//!
//! ## Verification order
//!
//! 1. Non-numeric timestamp → [`AuthError::InvalidSignature`]
//! 2. Outside the freshness window → [`AuthError::ExpiredRequest`]
//! 3. Signature check. Any failure here, including a malformed key or
//!    signature encoding, yields `Ok(false)`.
//!
//! Replay prevention is a separate call to the nonce manager.

use std::time::Duration;

use base64ct::{Base64, Encoding};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::Signature;
use serde::Serialize;

use super::AuthError;
use crate::crypto::keys::{parse_signing_key, parse_verifying_key};

/// Default freshness window for signed requests.
pub const DEFAULT_SIGNATURE_WINDOW: Duration = Duration::from_secs(60);

/// The parts of a request covered by a signature.
#[derive(Debug, Clone, Copy)]
pub struct RequestData<'a> {
    pub method: &'a str,
    pub url: &'a str,
    pub body: Option<&'a str>,
}

impl<'a> RequestData<'a> {
    pub fn new(method: &'a str, url: &'a str, body: Option<&'a str>) -> Self {
        Self { method, url, body }
    }
}

/// A request as presented for verification.
#[derive(Debug, Clone, Copy)]
pub struct SignatureRequest<'a> {
    pub method: &'a str,
    pub url: &'a str,
    pub body: Option<&'a str>,
    pub timestamp: &'a str,
    pub nonce: &'a str,
    /// Base64 signature
    pub signature: &'a str,
}

/// Output of [`sign`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureResult {
    /// Base64 DER-encoded ECDSA signature
    pub signature: String,
    /// Decimal milliseconds since the epoch
    pub timestamp: String,
    pub nonce: String,
}

#[derive(Serialize)]
struct CanonicalMessage<'a> {
    method: &'a str,
    url: &'a str,
    body: Option<&'a str>,
    timestamp: &'a str,
    nonce: &'a str,
}

/// Build the exact byte string that gets signed.
pub fn canonical_message(
    data: &RequestData<'_>,
    timestamp: &str,
    nonce: &str,
) -> Result<Vec<u8>, AuthError> {
    serde_json::to_vec(&CanonicalMessage {
        method: data.method,
        url: data.url,
        body: data.body,
        timestamp,
        nonce,
    })
    .map_err(|e| AuthError::InvalidSignature(format!("cannot build canonical message: {e}")))
}

/// Current time in epoch milliseconds.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Sign a request with a fresh timestamp and a random UUIDv4 nonce.
pub fn sign(data: &RequestData<'_>, private_key: &str) -> Result<SignatureResult, AuthError> {
    let timestamp = now_millis().to_string();
    let nonce = uuid::Uuid::new_v4().to_string();
    sign_with(data, private_key, &timestamp, &nonce)
}

/// Sign a request with a caller-supplied timestamp and nonce.
pub fn sign_with(
    data: &RequestData<'_>,
    private_key: &str,
    timestamp: &str,
    nonce: &str,
) -> Result<SignatureResult, AuthError> {
    let signing_key = parse_signing_key(private_key)?;
    let message = canonical_message(data, timestamp, nonce)?;

    let signature: Signature = signing_key.sign(&message);
    Ok(SignatureResult {
        signature: Base64::encode_string(signature.to_der().as_bytes()),
        timestamp: timestamp.to_string(),
        nonce: nonce.to_string(),
    })
}

/// Verify a signed request against `public_key` with the given window.
pub fn verify(
    request: &SignatureRequest<'_>,
    public_key: &str,
    window: Duration,
) -> Result<bool, AuthError> {
    verify_at(request, public_key, window, now_millis())
}

/// [`verify`] with an explicit "now" in epoch milliseconds.
///
/// A request exactly `window` old is still fresh; one millisecond older is
/// expired. The same bound applies to timestamps ahead of `now`.
pub fn verify_at(
    request: &SignatureRequest<'_>,
    public_key: &str,
    window: Duration,
    now_ms: i64,
) -> Result<bool, AuthError> {
    let timestamp: i64 = request
        .timestamp
        .trim()
        .parse()
        .map_err(|_| AuthError::InvalidSignature("timestamp is not numeric".into()))?;

    let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
    let skew = now_ms.saturating_sub(timestamp);
    if skew > window_ms || skew < -window_ms {
        return Err(AuthError::ExpiredRequest);
    }

    let data = RequestData::new(request.method, request.url, request.body);
    let message = canonical_message(&data, request.timestamp, request.nonce)?;

    Ok(signature_matches(&message, request.signature, public_key))
}

fn signature_matches(message: &[u8], signature: &str, public_key: &str) -> bool {
    let Ok(verifying_key) = parse_verifying_key(public_key) else {
        return false;
    };
    let Ok(bytes) = Base64::decode_vec(signature.trim()) else {
        return false;
    };
    // DER is the default encoding; raw r||s (WebCrypto) is accepted too.
    let parsed = Signature::from_der(&bytes).or_else(|_| Signature::from_slice(&bytes));
    match parsed {
        Ok(signature) => verifying_key.verify(message, &signature).is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_key_pair;

    const WINDOW: Duration = Duration::from_secs(60);

    fn data(body: Option<&str>) -> RequestData<'_> {
        RequestData::new("POST", "/api/v1/orders?x=1", body)
    }

    fn request<'a>(data: &RequestData<'a>, signed: &'a SignatureResult) -> SignatureRequest<'a> {
        SignatureRequest {
            method: data.method,
            url: data.url,
            body: data.body,
            timestamp: &signed.timestamp,
            nonce: &signed.nonce,
            signature: &signed.signature,
        }
    }

    #[test]
    fn canonical_message_has_fixed_key_order() {
        let message = canonical_message(&data(Some("{\"a\":1}")), "1700000000000", "n-1").unwrap();
        assert_eq!(
            String::from_utf8(message).unwrap(),
            r#"{"method":"POST","url":"/api/v1/orders?x=1","body":"{\"a\":1}","timestamp":"1700000000000","nonce":"n-1"}"#
        );
    }

    #[test]
    fn canonical_message_null_body() {
        let message = canonical_message(&data(None), "1", "n").unwrap();
        assert!(String::from_utf8(message).unwrap().contains(r#""body":null"#));
    }

    #[test]
    fn sign_then_verify() {
        let pair = generate_key_pair();
        for body in [None, Some(""), Some("{\"amount\":\"10.00\"}")] {
            let data = data(body);
            let signed = sign(&data, &pair.private_key).unwrap();
            assert!(verify(&request(&data, &signed), &pair.public_key, WINDOW).unwrap());
        }
    }

    #[test]
    fn sign_produces_fresh_nonce_and_timestamp() {
        let pair = generate_key_pair();
        let a = sign(&data(None), &pair.private_key).unwrap();
        let b = sign(&data(None), &pair.private_key).unwrap();

        assert_ne!(a.nonce, b.nonce);
        let ts: i64 = a.timestamp.parse().unwrap();
        assert!((now_millis() - ts).abs() < 5_000);
    }

    #[test]
    fn tampered_signature_fails() {
        let pair = generate_key_pair();
        let data = data(Some("payload"));
        let signed = sign(&data, &pair.private_key).unwrap();

        let mut raw = Base64::decode_vec(&signed.signature).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = SignatureResult {
            signature: Base64::encode_string(&raw),
            ..signed.clone()
        };

        assert!(!verify(&request(&data, &tampered), &pair.public_key, WINDOW).unwrap());
    }

    #[test]
    fn tampered_body_fails() {
        let pair = generate_key_pair();
        let signed = sign(&data(Some("amount=10")), &pair.private_key).unwrap();

        let altered = data(Some("amount=11"));
        assert!(!verify(&request(&altered, &signed), &pair.public_key, WINDOW).unwrap());
    }

    #[test]
    fn tampered_nonce_fails() {
        let pair = generate_key_pair();
        let data = data(None);
        let signed = sign(&data, &pair.private_key).unwrap();
        let tampered = SignatureResult {
            nonce: format!("{}x", signed.nonce),
            ..signed.clone()
        };

        assert!(!verify(&request(&data, &tampered), &pair.public_key, WINDOW).unwrap());
    }

    #[test]
    fn wrong_key_fails() {
        let signer = generate_key_pair();
        let other = generate_key_pair();
        let data = data(None);
        let signed = sign(&data, &signer.private_key).unwrap();

        assert!(!verify(&request(&data, &signed), &other.public_key, WINDOW).unwrap());
    }

    #[test]
    fn malformed_key_or_signature_is_false_not_error() {
        let pair = generate_key_pair();
        let data = data(None);
        let signed = sign(&data, &pair.private_key).unwrap();

        assert!(!verify(&request(&data, &signed), "not-a-key", WINDOW).unwrap());

        let garbage = SignatureResult {
            signature: "!!!".into(),
            ..signed.clone()
        };
        assert!(!verify(&request(&data, &garbage), &pair.public_key, WINDOW).unwrap());
    }

    #[test]
    fn raw_signature_encoding_is_accepted() {
        let pair = generate_key_pair();
        let data = data(Some("x"));
        let signed = sign(&data, &pair.private_key).unwrap();

        let der = Base64::decode_vec(&signed.signature).unwrap();
        let raw = Signature::from_der(&der).unwrap().to_bytes();
        let p1363 = SignatureResult {
            signature: Base64::encode_string(&raw),
            ..signed.clone()
        };
        assert!(verify(&request(&data, &p1363), &pair.public_key, WINDOW).unwrap());
    }

    #[test]
    fn non_numeric_timestamp_is_invalid_signature() {
        let pair = generate_key_pair();
        let data = data(None);
        let signed = sign_with(&data, &pair.private_key, "yesterday", "n-1").unwrap();

        assert!(matches!(
            verify(&request(&data, &signed), &pair.public_key, WINDOW),
            Err(AuthError::InvalidSignature(_))
        ));
    }

    #[test]
    fn expiry_boundary() {
        let pair = generate_key_pair();
        let data = data(None);
        let now: i64 = 1_700_000_000_000;
        let window_ms = WINDOW.as_millis() as i64;

        let stale_ts = (now - window_ms - 1).to_string();
        let stale = sign_with(&data, &pair.private_key, &stale_ts, "n-stale").unwrap();
        assert!(matches!(
            verify_at(&request(&data, &stale), &pair.public_key, WINDOW, now),
            Err(AuthError::ExpiredRequest)
        ));

        let edge_ts = (now - window_ms).to_string();
        let edge = sign_with(&data, &pair.private_key, &edge_ts, "n-edge").unwrap();
        assert!(verify_at(&request(&data, &edge), &pair.public_key, WINDOW, now).unwrap());

        let fresh_ts = (now - window_ms + 1).to_string();
        let fresh = sign_with(&data, &pair.private_key, &fresh_ts, "n-fresh").unwrap();
        assert!(verify_at(&request(&data, &fresh), &pair.public_key, WINDOW, now).unwrap());
    }

    #[test]
    fn far_future_timestamp_is_rejected() {
        let pair = generate_key_pair();
        let data = data(None);
        let now: i64 = 1_700_000_000_000;

        let ahead = (now + 61_000).to_string();
        let signed = sign_with(&data, &pair.private_key, &ahead, "n-1").unwrap();
        assert!(matches!(
            verify_at(&request(&data, &signed), &pair.public_key, WINDOW, now),
            Err(AuthError::ExpiredRequest)
        ));

        let slightly_ahead = (now + 5_000).to_string();
        let signed = sign_with(&data, &pair.private_key, &slightly_ahead, "n-2").unwrap();
        assert!(verify_at(&request(&data, &signed), &pair.public_key, WINDOW, now).unwrap());
    }

    #[test]
    fn sign_rejects_bad_private_key() {
        assert!(matches!(
            sign(&data(None), "aGVsbG8="),
            Err(AuthError::InvalidKeyFormat(_))
        ));
    }
}
