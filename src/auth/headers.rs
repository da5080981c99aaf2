// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signature header contract.
//!
//! | Header        | Content                                        |
//! |---------------|------------------------------------------------|
//! | `X-Signature` | base64 ECDSA/SHA-256 signature                 |
//! | `X-Timestamp` | decimal milliseconds since the epoch           |
//! | `X-Nonce`     | opaque, caller-unique string                   |
//! | `X-Key-Id`    | identifier used to look up the public key      |
//!
//! A request carrying only some of these is treated as unsigned, not as a
//! malformed signature.

use std::collections::HashMap;

use axum::http::HeaderMap;

use super::signature::{sign, RequestData};
use super::AuthError;

pub const SIGNATURE_HEADER: &str = "X-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Timestamp";
pub const NONCE_HEADER: &str = "X-Nonce";
pub const KEY_ID_HEADER: &str = "X-Key-Id";

/// Read-only header lookup. Names are matched case-insensitively.
pub trait HeaderSource {
    fn header(&self, name: &str) -> Option<&str>;
}

impl HeaderSource for HeaderMap {
    fn header(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|value| value.to_str().ok())
    }
}

impl HeaderSource for HashMap<String, String> {
    fn header(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str).or_else(|| {
            self.iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str())
        })
    }
}

/// The four signature headers of an incoming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeaders {
    pub signature: String,
    pub timestamp: String,
    pub nonce: String,
    pub key_id: String,
}

/// Pull the signature headers. `None` unless all four are present and
/// non-empty.
pub fn extract_signature_headers<H: HeaderSource + ?Sized>(headers: &H) -> Option<SignatureHeaders> {
    let get = |name: &str| {
        headers
            .header(name)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    Some(SignatureHeaders {
        signature: get(SIGNATURE_HEADER)?,
        timestamp: get(TIMESTAMP_HEADER)?,
        nonce: get(NONCE_HEADER)?,
        key_id: get(KEY_ID_HEADER)?,
    })
}

/// Headers to attach to an outgoing signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub signature: String,
    pub timestamp: String,
    pub nonce: String,
    pub key_id: String,
}

impl SignedHeaders {
    /// `(name, value)` pairs in a fixed order.
    pub fn to_pairs(&self) -> [(&'static str, String); 4] {
        [
            (SIGNATURE_HEADER, self.signature.clone()),
            (TIMESTAMP_HEADER, self.timestamp.clone()),
            (NONCE_HEADER, self.nonce.clone()),
            (KEY_ID_HEADER, self.key_id.clone()),
        ]
    }
}

/// Sign a request and package the result as headers.
pub fn sign_request(
    data: &RequestData<'_>,
    key_id: &str,
    private_key: &str,
) -> Result<SignedHeaders, AuthError> {
    let signed = sign(data, private_key)?;
    Ok(SignedHeaders {
        signature: signed.signature,
        timestamp: signed.timestamp,
        nonce: signed.nonce,
        key_id: key_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_key_pair;
    use axum::http::HeaderValue;

    fn full_map() -> HashMap<String, String> {
        HashMap::from([
            ("x-signature".to_string(), "c2ln".to_string()),
            ("X-TIMESTAMP".to_string(), "1700000000000".to_string()),
            ("X-Nonce".to_string(), "n-1".to_string()),
            ("x-key-id".to_string(), "key-1".to_string()),
        ])
    }

    #[test]
    fn extracts_from_hash_map_case_insensitively() {
        let headers = extract_signature_headers(&full_map()).unwrap();
        assert_eq!(headers.signature, "c2ln");
        assert_eq!(headers.timestamp, "1700000000000");
        assert_eq!(headers.nonce, "n-1");
        assert_eq!(headers.key_id, "key-1");
    }

    #[test]
    fn partial_set_is_none() {
        for missing in ["x-signature", "X-TIMESTAMP", "X-Nonce", "x-key-id"] {
            let mut map = full_map();
            map.remove(missing);
            assert!(extract_signature_headers(&map).is_none(), "{missing}");
        }
    }

    #[test]
    fn empty_value_counts_as_missing() {
        let mut map = full_map();
        map.insert("X-Nonce".into(), "  ".into());
        assert!(extract_signature_headers(&map).is_none());
    }

    #[test]
    fn extracts_from_header_map() {
        let mut map = HeaderMap::new();
        map.insert("x-signature", HeaderValue::from_static("c2ln"));
        map.insert("x-timestamp", HeaderValue::from_static("1"));
        map.insert("x-nonce", HeaderValue::from_static("n"));
        map.insert("x-key-id", HeaderValue::from_static("k"));

        let headers = extract_signature_headers(&map).unwrap();
        assert_eq!(headers.key_id, "k");
    }

    #[test]
    fn signed_headers_round_trip_through_extraction() {
        let pair = generate_key_pair();
        let data = RequestData::new("GET", "/v1/me", None);
        let signed = sign_request(&data, "key-7", &pair.private_key).unwrap();

        let map: HashMap<String, String> = signed
            .to_pairs()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        let extracted = extract_signature_headers(&map).unwrap();

        assert_eq!(extracted.key_id, "key-7");
        assert_eq!(extracted.signature, signed.signature);
        assert_eq!(extracted.nonce, signed.nonce);
    }
}
