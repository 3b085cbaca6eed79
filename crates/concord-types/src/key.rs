//! Key, signature and key-derivation types
//!
//! Private material is only ever present inside secure-holding components;
//! serialization skips it so a key record can cross a facade safely.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::KeyId;

/// Signing algorithm families supported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyAlgorithm {
    /// Edwards-curve signatures (Ed25519)
    Ed25519,
    /// ECDSA over the Koblitz curve secp256k1, signing SHA-256 digests
    EcdsaSecp256k1,
}

impl std::fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ed25519 => write!(f, "ed25519"),
            Self::EcdsaSecp256k1 => write!(f, "ecdsa-secp256k1"),
        }
    }
}

impl Default for KeyAlgorithm {
    fn default() -> Self {
        Self::Ed25519
    }
}

/// A managed key
///
/// Invariant: a revoked or expired key is never handed to callers that ask
/// for a usable key, even though the record stays in storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    pub id: KeyId,
    pub algorithm: KeyAlgorithm,
    /// Optional named curve, for algorithms with more than one
    #[serde(default)]
    pub curve: Option<String>,
    /// Hex-encoded public material
    pub public_key: String,
    /// Hex-encoded private material; present only inside secure holders,
    /// never serialized
    #[serde(skip)]
    pub private_key: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked: bool,
}

impl KeyRecord {
    /// Whether the key has lapsed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|e| now >= e).unwrap_or(false)
    }

    /// Whether the key may be handed to callers
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired(now)
    }

    /// A copy with the private material stripped
    pub fn public_view(&self) -> Self {
        Self { private_key: None, ..self.clone() }
    }
}

/// Signature produced by the platform primitives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub algorithm: KeyAlgorithm,
    /// Hex-encoded signature bytes
    pub signature: String,
    /// Hex-encoded SHA-256 of the signed message
    pub message_hash: String,
    pub timestamp: DateTime<Utc>,
    pub key_id: KeyId,
}

/// Named key-derivation variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KdfAlgorithm {
    /// PBKDF2-HMAC-SHA256, 100 000 iterations, 32-byte output
    Pbkdf2Sha256,
    /// scrypt with library-default parameters, 32-byte output
    Scrypt,
}

impl std::fmt::Display for KdfAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pbkdf2Sha256 => write!(f, "pbkdf2-sha256"),
            Self::Scrypt => write!(f, "scrypt"),
        }
    }
}

/// Output of a key derivation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedKey {
    /// Hex-encoded 32-byte derived key
    pub key_hex: String,
    /// Hex-encoded salt that produced it
    pub salt_hex: String,
}

/// Password-wrapped key bundle produced by an export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedKeyBundle {
    pub key_id: KeyId,
    pub algorithm: KeyAlgorithm,
    #[serde(default)]
    pub curve: Option<String>,
    /// Hex-encoded public material
    pub public_key: String,
    /// AEAD-encrypted private material: hex `nonce || ciphertext || tag`
    pub encrypted_private_key: String,
    pub kdf: KdfAlgorithm,
    /// Hex-encoded KDF salt
    pub kdf_salt: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> KeyRecord {
        KeyRecord {
            id: KeyId::new("k1"),
            algorithm: KeyAlgorithm::Ed25519,
            curve: None,
            public_key: "aa".into(),
            private_key: Some("bb".into()),
            created_at: Utc::now(),
            expires_at: None,
            revoked: false,
        }
    }

    #[test]
    fn test_usability() {
        let now = Utc::now();
        let mut key = record();
        assert!(key.is_usable(now));

        key.expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(!key.is_usable(now));

        let mut revoked = record();
        revoked.revoked = true;
        assert!(!revoked.is_usable(now));
    }

    #[test]
    fn test_private_material_never_serialized() {
        let key = record();
        let json = serde_json::to_string(&key).unwrap();
        assert!(!json.contains("bb"));

        let view = key.public_view();
        assert!(view.private_key.is_none());
        assert_eq!(view.public_key, key.public_key);
    }
}
