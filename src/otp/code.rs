// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Code generation and hashing.
//!
//! # Algorithms
//!
//! - **Code**: uniform 6-digit number in `100000..=999999` from the OS RNG
//! - **Hash**: scrypt (N = 2^14, r = 8, p = 1, 64-byte output) with a fresh
//!   random salt per code, stored as `salt:derivedKeyHex`
//! - **Compare**: constant time (`subtle`)
//!
//! scrypt is deliberately slow, so hashing and verification run on the
//! blocking pool.

use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use scrypt::{scrypt, Params};
use subtle::ConstantTimeEq;

use super::OtpError;

/// Number of digits in a code.
pub const CODE_LEN: usize = 6;

const SALT_LEN: usize = 16;
const DERIVED_KEY_LEN: usize = 64;
const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// Verified-token entropy in bytes.
const TOKEN_LEN: usize = 32;

/// Generate a 6-digit numeric code.
pub fn generate_code() -> String {
    OsRng.gen_range(100_000u32..=999_999).to_string()
}

/// Random opaque token (hex).
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_LEN];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Constant-time string equality.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn derive(code: &str, salt: &str) -> Result<[u8; DERIVED_KEY_LEN], OtpError> {
    let params = Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, DERIVED_KEY_LEN)
        .map_err(|e| OtpError::Internal(format!("scrypt params: {e}")))?;
    let mut output = [0u8; DERIVED_KEY_LEN];
    scrypt(code.as_bytes(), salt.as_bytes(), &params, &mut output)
        .map_err(|e| OtpError::Internal(format!("scrypt: {e}")))?;
    Ok(output)
}

fn hash_code_blocking(code: &str) -> Result<String, OtpError> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let salt = hex::encode(salt);

    let derived = derive(code, &salt)?;
    Ok(format!("{salt}:{}", hex::encode(derived)))
}

fn verify_code_blocking(code: &str, stored: &str) -> Result<bool, OtpError> {
    let (salt, expected) = stored
        .split_once(':')
        .ok_or_else(|| OtpError::Internal("malformed stored code hash".into()))?;
    let expected =
        hex::decode(expected).map_err(|_| OtpError::Internal("malformed stored code hash".into()))?;

    let derived = derive(code, salt)?;
    Ok(derived.as_slice().ct_eq(&expected).into())
}

/// Hash a code for storage.
pub async fn hash_code(code: &str) -> Result<String, OtpError> {
    let code = code.to_string();
    tokio::task::spawn_blocking(move || hash_code_blocking(&code))
        .await
        .map_err(|e| OtpError::Internal(format!("hash task failed: {e}")))?
}

/// Check a code against a stored `salt:derivedKeyHex` hash.
pub async fn verify_code(code: &str, stored: &str) -> Result<bool, OtpError> {
    let code = code.to_string();
    let stored = stored.to_string();
    tokio::task::spawn_blocking(move || verify_code_blocking(&code, &stored))
        .await
        .map_err(|e| OtpError::Internal(format!("verify task failed: {e}")))?
}
