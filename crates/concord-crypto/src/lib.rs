//! Concord Crypto - Cryptographic primitives for the agent platform
//!
//! This crate provides:
//! - Digital signatures over SHA-256 digests (Ed25519 and secp256k1 ECDSA)
//! - Hashing (SHA-256) and HMAC-SHA-256 with constant-time verification
//! - Authenticated encryption (AES-256-GCM)
//! - Key derivation (PBKDF2-HMAC-SHA256 and scrypt)
//! - Cryptographically strong random material
//!
//! # Security Invariant
//!
//! **Private key material is accepted by value and never retained here.**
//! Key lifecycle and custody belong to the keystore.

pub mod sign;
pub mod hash;
pub mod aead;
pub mod kdf;

pub use sign::*;
pub use hash::*;
pub use aead::*;
pub use kdf::*;

use rand::rngs::OsRng;
use rand::RngCore;

/// Default size of a generated challenge nonce, in bytes
pub const NONCE_SIZE: usize = 32;

/// A cryptographically strong random nonce of the given size
pub fn random_nonce(size: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; size];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// A cryptographically strong 32-byte random nonce
pub fn random_nonce_default() -> [u8; NONCE_SIZE] {
    let mut bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut bytes);
    bytes
}
