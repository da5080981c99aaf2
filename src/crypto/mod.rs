// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Key Cryptography
//!
//! - `keys` - ECDSA P-256 key generation, parsing and format checks
//! - `envelope` - AES-256-GCM encryption of private keys at rest
//!
//! ## Security
//!
//! - Private keys are only held in memory transiently unless encrypted
//! - The envelope secret is an application master key, not a user password

pub mod envelope;
pub mod keys;

pub use envelope::{
    decrypt_private_key, decrypt_private_key_str, encrypt_private_key, EncryptedPrivateKey,
};
pub use keys::{
    generate_key_pair, is_valid_private_key, is_valid_public_key, parse_signing_key,
    parse_verifying_key, public_key_for, KeyPair,
};
