//! Hashing and HMAC

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use concord_types::{ConcordError, Result};

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 digest of the input
pub fn sha256(input: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(input));
    out
}

/// Hex-encoded SHA-256 digest of the input
pub fn sha256_hex(input: &[u8]) -> String {
    hex::encode(sha256(input))
}

/// HMAC-SHA-256 of the message under the secret, hex-encoded
pub fn hmac_sha256(message: &[u8], secret: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time verification of a hex-encoded HMAC-SHA-256 tag
pub fn hmac_sha256_verify(message: &[u8], secret: &[u8], tag_hex: &str) -> Result<bool> {
    let tag = hex::decode(tag_hex)
        .map_err(|e| ConcordError::invalid(format!("bad hex HMAC tag: {e}")))?;

    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(message);
    Ok(mac.verify_slice(&tag).is_ok())
}
