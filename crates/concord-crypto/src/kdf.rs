//! Password-based key derivation
//!
//! Two named variants: PBKDF2-HMAC-SHA256 at 100 000 iterations and scrypt
//! at the library-recommended parameters. Both emit 32-byte keys alongside
//! the salt that produced them.

use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroize;

use concord_types::{ConcordError, DerivedKey, KdfAlgorithm, Result};

/// PBKDF2 iteration count
const PBKDF2_ITERATIONS: u32 = 100_000;

/// Derived key length in bytes
const KEY_LENGTH: usize = 32;

/// Salt length for generated salts, in bytes
const SALT_LENGTH: usize = 16;

/// Derive a 32-byte key from a password
///
/// A fresh random salt is generated when none is supplied; the salt used
/// is always returned with the key.
pub fn derive_key(
    password: &str,
    salt: Option<&[u8]>,
    algorithm: KdfAlgorithm,
) -> Result<DerivedKey> {
    let salt: Vec<u8> = match salt {
        Some(salt) => salt.to_vec(),
        None => {
            let mut fresh = vec![0u8; SALT_LENGTH];
            OsRng.fill_bytes(&mut fresh);
            fresh
        }
    };

    let mut key = [0u8; KEY_LENGTH];
    match algorithm {
        KdfAlgorithm::Pbkdf2Sha256 => {
            pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut key);
        }
        KdfAlgorithm::Scrypt => {
            let params = scrypt::Params::recommended();
            scrypt::scrypt(password.as_bytes(), &salt, &params, &mut key)
                .map_err(|e| ConcordError::invalid(format!("scrypt failed: {e}")))?;
        }
    }

    let derived = DerivedKey {
        key_hex: hex::encode(key),
        salt_hex: hex::encode(&salt),
    };
    key.zeroize();
    Ok(derived)
}

/// Decode a derived key back into raw 32 bytes
pub fn derived_key_bytes(derived: &DerivedKey) -> Result<[u8; 32]> {
    let bytes = hex::decode(&derived.key_hex)
        .map_err(|e| ConcordError::invalid(format!("bad hex derived key: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| ConcordError::invalid("derived key must be 32 bytes"))
}
