//! Authenticated encryption (AES-256-GCM)
//!
//! Ciphertexts travel as a single hex string `nonce || ciphertext || tag`
//! with a random 96-bit nonce, so a payload is self-contained next to its
//! key.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

use concord_types::{ConcordError, Result};

/// AES-GCM nonce size in bytes (96 bits)
const GCM_NONCE_SIZE: usize = 12;

/// Encrypt under a 32-byte key; returns hex `nonce || ciphertext || tag`
pub fn encrypt(plaintext: &[u8], key: &[u8; 32]) -> Result<String> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut nonce_bytes = [0u8; GCM_NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| ConcordError::invalid("AEAD encryption failed"))?;

    let mut payload = Vec::with_capacity(GCM_NONCE_SIZE + ciphertext.len());
    payload.extend_from_slice(&nonce_bytes);
    payload.extend_from_slice(&ciphertext);
    Ok(hex::encode(payload))
}

/// Decrypt a hex `nonce || ciphertext || tag` payload under a 32-byte key
///
/// Fails with `DecryptionFailed` on a wrong key or tampered payload.
pub fn decrypt(payload_hex: &str, key: &[u8; 32]) -> Result<Vec<u8>> {
    let payload = hex::decode(payload_hex)
        .map_err(|e| ConcordError::invalid(format!("bad hex AEAD payload: {e}")))?;

    if payload.len() <= GCM_NONCE_SIZE {
        return Err(ConcordError::invalid("AEAD payload too short"));
    }

    let (nonce_bytes, ciphertext) = payload.split_at(GCM_NONCE_SIZE);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| ConcordError::DecryptionFailed {
            message: "wrong key or tampered payload".to_string(),
        })
}
