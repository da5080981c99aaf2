// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! AES-256-GCM envelope for private keys at rest.
//!
//! # Algorithms
//!
//! - **Key**: `SHA-256(secret)`. This is not a password KDF; the secret must
//!   already be high-entropy (an application master key).
//! - **Encryption**: AES-256-GCM with a random 16-byte IV and a 16-byte tag.
//!
//! # Serialized form
//!
//! `hex(iv):hex(auth_tag):hex(ciphertext)`
//!
//! Every decryption failure (wrong secret, altered ciphertext or tag,
//! malformed blob) surfaces as the same [`AuthError::Decryption`].

use std::fmt;
use std::str::FromStr;

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce, Tag};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::auth::AuthError;

/// IV length in bytes.
pub const IV_LEN: usize = 16;

/// GCM authentication tag length in bytes.
pub const AUTH_TAG_LEN: usize = 16;

/// AES-256-GCM with a 128-bit nonce.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Encrypted private key.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedPrivateKey {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_LEN],
    pub auth_tag: [u8; AUTH_TAG_LEN],
}

impl fmt::Debug for EncryptedPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedPrivateKey")
            .field("ciphertext_len", &self.ciphertext.len())
            .field("iv", &hex::encode(self.iv))
            .finish()
    }
}

impl fmt::Display for EncryptedPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            hex::encode(self.iv),
            hex::encode(self.auth_tag),
            hex::encode(&self.ciphertext)
        )
    }
}

impl FromStr for EncryptedPrivateKey {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().splitn(3, ':');
        let (Some(iv), Some(tag), Some(ciphertext)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::Decryption);
        };

        let iv: [u8; IV_LEN] = decode_fixed(iv)?;
        let auth_tag: [u8; AUTH_TAG_LEN] = decode_fixed(tag)?;
        let ciphertext = hex::decode(ciphertext).map_err(|_| AuthError::Decryption)?;

        Ok(Self {
            ciphertext,
            iv,
            auth_tag,
        })
    }
}

fn decode_fixed<const N: usize>(encoded: &str) -> Result<[u8; N], AuthError> {
    hex::decode(encoded)
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(AuthError::Decryption)
}

impl Serialize for EncryptedPrivateKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EncryptedPrivateKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        encoded
            .parse()
            .map_err(|_| serde::de::Error::custom("malformed encrypted private key"))
    }
}

fn cipher_for(secret: &[u8]) -> Aes256Gcm16 {
    let key = Sha256::digest(secret);
    Aes256Gcm16::new(&key)
}

/// Encrypt a transport-encoded private key under `secret`.
pub fn encrypt_private_key(
    private_key: &str,
    secret: &[u8],
) -> Result<EncryptedPrivateKey, AuthError> {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let mut buffer = private_key.as_bytes().to_vec();
    let tag = cipher_for(secret)
        .encrypt_in_place_detached(Nonce::<U16>::from_slice(&iv), b"", &mut buffer)
        .map_err(|_| AuthError::InvalidKeyFormat("private key too large to encrypt".into()))?;

    let mut auth_tag = [0u8; AUTH_TAG_LEN];
    auth_tag.copy_from_slice(&tag);

    Ok(EncryptedPrivateKey {
        ciphertext: buffer,
        iv,
        auth_tag,
    })
}

/// Decrypt an [`EncryptedPrivateKey`] back to its transport encoding.
pub fn decrypt_private_key(
    encrypted: &EncryptedPrivateKey,
    secret: &[u8],
) -> Result<String, AuthError> {
    let mut buffer = encrypted.ciphertext.clone();
    cipher_for(secret)
        .decrypt_in_place_detached(
            Nonce::<U16>::from_slice(&encrypted.iv),
            b"",
            &mut buffer,
            Tag::<U16>::from_slice(&encrypted.auth_tag),
        )
        .map_err(|_| AuthError::Decryption)?;

    String::from_utf8(buffer).map_err(|_| AuthError::Decryption)
}

/// Decrypt the serialized `iv:tag:ciphertext` form.
pub fn decrypt_private_key_str(blob: &str, secret: &[u8]) -> Result<String, AuthError> {
    let encrypted: EncryptedPrivateKey = blob.parse()?;
    decrypt_private_key(&encrypted, secret)
}
