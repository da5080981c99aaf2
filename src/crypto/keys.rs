// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! ECDSA P-256 key pairs and transport encoding.
//!
//! Private keys travel as base64 PKCS#8 DER, public keys as base64 SPKI
//! DER. The `is_valid_*` checks are cheap format checks only (base64 that
//! decodes to a non-empty buffer); they do not parse ASN.1.

use base64ct::{Base64, Encoding};
use p256::ecdsa::{SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::auth::AuthError;

/// A freshly generated key pair in transport form.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPair {
    /// Base64 SPKI DER
    pub public_key: String,
    /// Base64 PKCS#8 DER
    pub private_key: String,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Generate a new P-256 key pair.
///
/// Uses the OS random number generator. Encoding a key we just generated
/// cannot fail short of an allocator failure, so this returns the pair
/// directly.
pub fn generate_key_pair() -> KeyPair {
    let signing_key = SigningKey::random(&mut OsRng);
    let verifying_key = VerifyingKey::from(&signing_key);

    let private_der = signing_key
        .to_pkcs8_der()
        .expect("PKCS#8 encoding of a generated P-256 key cannot fail");
    let public_der = verifying_key
        .to_public_key_der()
        .expect("SPKI encoding of a generated P-256 key cannot fail");

    KeyPair {
        public_key: Base64::encode_string(public_der.as_bytes()),
        private_key: Base64::encode_string(private_der.as_bytes()),
    }
}

/// Format check for a transport-encoded public key.
pub fn is_valid_public_key(public_key: &str) -> bool {
    decodes_to_non_empty(public_key)
}

/// Format check for a transport-encoded private key.
pub fn is_valid_private_key(private_key: &str) -> bool {
    decodes_to_non_empty(private_key)
}

fn decodes_to_non_empty(encoded: &str) -> bool {
    matches!(Base64::decode_vec(encoded.trim()), Ok(bytes) if !bytes.is_empty())
}

/// Parse a base64 PKCS#8 DER private key.
pub fn parse_signing_key(private_key: &str) -> Result<SigningKey, AuthError> {
    let der = Base64::decode_vec(private_key.trim())
        .map_err(|e| AuthError::InvalidKeyFormat(format!("private key is not base64: {e}")))?;
    SigningKey::from_pkcs8_der(&der)
        .map_err(|e| AuthError::InvalidKeyFormat(format!("private key is not PKCS#8 P-256: {e}")))
}

/// Parse a base64 SPKI DER public key.
pub fn parse_verifying_key(public_key: &str) -> Result<VerifyingKey, AuthError> {
    let der = Base64::decode_vec(public_key.trim())
        .map_err(|e| AuthError::InvalidKeyFormat(format!("public key is not base64: {e}")))?;
    VerifyingKey::from_public_key_der(&der)
        .map_err(|e| AuthError::InvalidKeyFormat(format!("public key is not SPKI P-256: {e}")))
}

/// Derive the transport-encoded public key from a private key.
pub fn public_key_for(private_key: &str) -> Result<String, AuthError> {
    let signing_key = parse_signing_key(private_key)?;
    let der = VerifyingKey::from(&signing_key)
        .to_public_key_der()
        .map_err(|e| AuthError::InvalidKeyFormat(format!("cannot encode public key: {e}")))?;
    Ok(Base64::encode_string(der.as_bytes()))
}
