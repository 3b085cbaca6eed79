//! Digital signatures over message digests
//!
//! Both supported algorithm families sign the SHA-256 digest of the
//! message, so a `SignatureRecord` verifies against its own recorded
//! digest and the signer's public key alone.

use chrono::Utc;
use ed25519_dalek::{Signer as _, Verifier as _};
use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};

use concord_types::{ConcordError, KeyAlgorithm, KeyId, KeyRecord, Result, SignatureRecord};

use crate::hash::sha256;

/// Sign a message with the private material of the given key record
///
/// Fails with `KeyUnavailable` when the record carries no private
/// material, and `AlgorithmUnsupported` for algorithms outside the
/// supported families.
pub fn sign(key: &KeyRecord, message: &[u8]) -> Result<SignatureRecord> {
    let private_hex = key.private_key.as_deref().ok_or_else(|| ConcordError::KeyUnavailable {
        key_id: key.id.to_string(),
        reason: "private material missing".to_string(),
    })?;

    let digest = sha256(message);
    let signature = sign_digest(key.algorithm, private_hex, &digest, &key.id)?;

    Ok(SignatureRecord {
        algorithm: key.algorithm,
        signature,
        message_hash: hex::encode(digest),
        timestamp: Utc::now(),
        key_id: key.id.clone(),
    })
}

/// Verify a signature record against a hex-encoded public key
///
/// Returns `Ok(false)` on mismatch; errors only on malformed inputs.
pub fn verify(record: &SignatureRecord, public_key_hex: &str) -> Result<bool> {
    let digest = decode_hex(&record.message_hash, "message hash")?;
    let signature = decode_hex(&record.signature, "signature")?;
    let public = decode_hex(public_key_hex, "public key")?;

    match record.algorithm {
        KeyAlgorithm::Ed25519 => {
            let key_bytes: [u8; 32] = public
                .try_into()
                .map_err(|_| ConcordError::invalid("ed25519 public key must be 32 bytes"))?;
            let verifying = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes)
                .map_err(|e| ConcordError::invalid(format!("bad ed25519 public key: {e}")))?;
            let sig_bytes: [u8; 64] = signature
                .try_into()
                .map_err(|_| ConcordError::invalid("ed25519 signature must be 64 bytes"))?;
            let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
            Ok(verifying.verify(&digest, &sig).is_ok())
        }
        KeyAlgorithm::EcdsaSecp256k1 => {
            let verifying = k256::ecdsa::VerifyingKey::from_sec1_bytes(&public)
                .map_err(|e| ConcordError::invalid(format!("bad secp256k1 public key: {e}")))?;
            let sig = k256::ecdsa::Signature::from_slice(&signature)
                .map_err(|e| ConcordError::invalid(format!("bad ecdsa signature: {e}")))?;
            Ok(verifying.verify_prehash(&digest, &sig).is_ok())
        }
    }
}

/// Generate a fresh keypair for the algorithm, as `(public_hex, private_hex)`
pub fn generate_keypair(algorithm: KeyAlgorithm) -> (String, String) {
    match algorithm {
        KeyAlgorithm::Ed25519 => {
            let signing = ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng);
            (
                hex::encode(signing.verifying_key().as_bytes()),
                hex::encode(signing.to_bytes()),
            )
        }
        KeyAlgorithm::EcdsaSecp256k1 => {
            let signing = k256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
            (
                hex::encode(signing.verifying_key().to_sec1_bytes()),
                hex::encode(signing.to_bytes()),
            )
        }
    }
}

/// Derive the hex public key for existing hex private material
pub fn public_key_for(algorithm: KeyAlgorithm, private_hex: &str) -> Result<String> {
    match algorithm {
        KeyAlgorithm::Ed25519 => {
            let signing = ed25519_signing_key(private_hex)?;
            Ok(hex::encode(signing.verifying_key().as_bytes()))
        }
        KeyAlgorithm::EcdsaSecp256k1 => {
            let signing = secp256k1_signing_key(private_hex)?;
            Ok(hex::encode(signing.verifying_key().to_sec1_bytes()))
        }
    }
}

fn sign_digest(
    algorithm: KeyAlgorithm,
    private_hex: &str,
    digest: &[u8; 32],
    _key_id: &KeyId,
) -> Result<String> {
    match algorithm {
        KeyAlgorithm::Ed25519 => {
            let signing = ed25519_signing_key(private_hex)?;
            Ok(hex::encode(signing.sign(digest).to_bytes()))
        }
        KeyAlgorithm::EcdsaSecp256k1 => {
            let signing = secp256k1_signing_key(private_hex)?;
            let sig: k256::ecdsa::Signature = signing
                .sign_prehash(digest)
                .map_err(|e| ConcordError::invalid(format!("ecdsa signing failed: {e}")))?;
            Ok(hex::encode(sig.to_bytes()))
        }
    }
}

fn ed25519_signing_key(private_hex: &str) -> Result<ed25519_dalek::SigningKey> {
    let bytes = decode_hex(private_hex, "private key")?;
    let key_bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| ConcordError::invalid("ed25519 private key must be 32 bytes"))?;
    Ok(ed25519_dalek::SigningKey::from_bytes(&key_bytes))
}

fn secp256k1_signing_key(private_hex: &str) -> Result<k256::ecdsa::SigningKey> {
    let bytes = decode_hex(private_hex, "private key")?;
    k256::ecdsa::SigningKey::from_slice(&bytes)
        .map_err(|e| ConcordError::invalid(format!("bad secp256k1 private key: {e}")))
}

fn decode_hex(input: &str, what: &str) -> Result<Vec<u8>> {
    hex::decode(input).map_err(|e| ConcordError::invalid(format!("bad hex {what}: {e}")))
}
