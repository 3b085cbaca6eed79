//! Concord KeyStore - Keypair lifecycle management
//!
//! Owns the key-id → key mapping plus the revoked set. Supports generate,
//! import, password-wrapped export/import, rotation and revocation.
//!
//! # Security Invariants
//!
//! - A revoked or expired key is never returned to callers asking for a
//!   usable key, even though the record stays in the map.
//! - Private material leaves the store only through `export`, wrapped by a
//!   password-derived AEAD key.
//!
//! State machine per key: `active → revoked` (terminal). Expiry is a
//! computed condition, not a state; rotation expires the old key in place
//! without revoking it.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use concord_crypto as crypto;
use concord_types::{
    ConcordError, ExportedKeyBundle, KdfAlgorithm, KeyAlgorithm, KeyId, KeyRecord, Result,
};

/// Options for the key store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyStoreConfig {
    /// Lifetime assigned to generated keys, in days
    pub key_rotation_days: i64,
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self { key_rotation_days: 90 }
    }
}

/// Outcome of a key rotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationOutcome {
    pub old_id: KeyId,
    pub new_id: KeyId,
}

/// Keys whose expiry is closer than this window are due for rotation
const ROTATION_WINDOW_DAYS: i64 = 7;

/// In-memory key store
pub struct KeyStore {
    config: KeyStoreConfig,
    keys: RwLock<HashMap<KeyId, KeyRecord>>,
    revoked: RwLock<HashSet<KeyId>>,
}

impl KeyStore {
    pub fn new(config: KeyStoreConfig) -> Self {
        Self {
            config,
            keys: RwLock::new(HashMap::new()),
            revoked: RwLock::new(HashSet::new()),
        }
    }

    /// Generate a fresh keypair under the given id
    ///
    /// The key expires `key_rotation_days` after creation. Fails with
    /// `DuplicateId` when the id is taken.
    pub async fn generate(
        &self,
        key_id: impl Into<KeyId>,
        algorithm: KeyAlgorithm,
        curve: Option<String>,
    ) -> Result<KeyRecord> {
        let key_id = key_id.into();
        let mut keys = self.keys.write().await;
        if keys.contains_key(&key_id) {
            return Err(ConcordError::duplicate("key", key_id.as_str()));
        }

        let (public_key, private_key) = crypto::generate_keypair(algorithm);
        let now = Utc::now();
        let record = KeyRecord {
            id: key_id.clone(),
            algorithm,
            curve,
            public_key,
            private_key: Some(private_key),
            created_at: now,
            expires_at: Some(now + Duration::days(self.config.key_rotation_days)),
            revoked: false,
        };

        keys.insert(key_id.clone(), record.clone());
        info!(key_id = %key_id, algorithm = %algorithm, "key generated");
        Ok(record.public_view())
    }

    /// Import existing key material under the given id
    ///
    /// Private material is stored only when supplied.
    pub async fn import(
        &self,
        key_id: impl Into<KeyId>,
        public_key: impl Into<String>,
        private_key: Option<String>,
        algorithm: KeyAlgorithm,
    ) -> Result<KeyRecord> {
        let key_id = key_id.into();
        let mut keys = self.keys.write().await;
        if keys.contains_key(&key_id) {
            return Err(ConcordError::duplicate("key", key_id.as_str()));
        }

        let record = KeyRecord {
            id: key_id.clone(),
            algorithm,
            curve: None,
            public_key: public_key.into(),
            private_key,
            created_at: Utc::now(),
            expires_at: None,
            revoked: false,
        };

        keys.insert(key_id.clone(), record.clone());
        info!(key_id = %key_id, "key imported");
        Ok(record.public_view())
    }

    /// The key record iff it is neither revoked nor expired
    ///
    /// The returned record carries private material; it is for in-process
    /// signing paths only.
    pub async fn get(&self, key_id: &KeyId) -> Result<KeyRecord> {
        let revoked = self.revoked.read().await.contains(key_id);
        let keys = self.keys.read().await;
        let record = keys
            .get(key_id)
            .ok_or_else(|| ConcordError::KeyUnavailable {
                key_id: key_id.to_string(),
                reason: "unknown key".to_string(),
            })?;

        if revoked || record.revoked {
            return Err(ConcordError::KeyUnavailable {
                key_id: key_id.to_string(),
                reason: "key revoked".to_string(),
            });
        }
        if record.is_expired(Utc::now()) {
            return Err(ConcordError::KeyUnavailable {
                key_id: key_id.to_string(),
                reason: "key expired".to_string(),
            });
        }

        Ok(record.clone())
    }

    /// Public view of a usable key
    pub async fn get_public(&self, key_id: &KeyId) -> Result<KeyRecord> {
        Ok(self.get(key_id).await?.public_view())
    }

    /// Revoke a key; idempotent, and terminal for the key
    pub async fn revoke(&self, key_id: &KeyId) -> Result<()> {
        {
            let mut keys = self.keys.write().await;
            let record = keys
                .get_mut(key_id)
                .ok_or_else(|| ConcordError::not_found("key", key_id.as_str()))?;
            record.revoked = true;
        }
        self.revoked.write().await.insert(key_id.clone());
        info!(key_id = %key_id, "key revoked");
        Ok(())
    }

    /// Rotate a key: generate a successor, expire the old key in place
    ///
    /// The successor id is `<old>_rotated_<timestamp_millis>` and keeps the
    /// old key's algorithm and curve. The old key becomes expired, not
    /// revoked.
    pub async fn rotate(&self, key_id: &KeyId) -> Result<RotationOutcome> {
        let (algorithm, curve) = {
            let record = self.get(key_id).await?;
            (record.algorithm, record.curve)
        };

        let new_id = KeyId::new(format!(
            "{}_rotated_{}",
            key_id.as_str(),
            Utc::now().timestamp_millis()
        ));
        self.generate(new_id.clone(), algorithm, curve).await?;

        {
            let mut keys = self.keys.write().await;
            if let Some(old) = keys.get_mut(key_id) {
                old.expires_at = Some(Utc::now());
            }
        }

        info!(old_id = %key_id, new_id = %new_id, "key rotated");
        Ok(RotationOutcome { old_id: key_id.clone(), new_id })
    }

    /// Non-revoked keys whose expiry is within the rotation window
    pub async fn keys_due_for_rotation(&self) -> Vec<KeyRecord> {
        let now = Utc::now();
        let window = Duration::days(ROTATION_WINDOW_DAYS);
        let revoked = self.revoked.read().await.clone();

        self.keys
            .read()
            .await
            .values()
            .filter(|record| !record.revoked && !revoked.contains(&record.id))
            .filter(|record| match record.expires_at {
                Some(expires_at) => expires_at - now < window,
                None => false,
            })
            .map(KeyRecord::public_view)
            .collect()
    }

    /// Export a key wrapped under a password-derived AEAD key
    pub async fn export(
        &self,
        key_id: &KeyId,
        password: &str,
        kdf: KdfAlgorithm,
    ) -> Result<ExportedKeyBundle> {
        let record = self.get(key_id).await?;
        let private = record.private_key.as_deref().ok_or_else(|| {
            ConcordError::KeyUnavailable {
                key_id: key_id.to_string(),
                reason: "private material missing".to_string(),
            }
        })?;

        let derived = crypto::derive_key(password, None, kdf)?;
        let wrapping = crypto::derived_key_bytes(&derived)?;
        let encrypted_private_key = crypto::encrypt(private.as_bytes(), &wrapping)?;

        Ok(ExportedKeyBundle {
            key_id: record.id.clone(),
            algorithm: record.algorithm,
            curve: record.curve.clone(),
            public_key: record.public_key.clone(),
            encrypted_private_key,
            kdf,
            kdf_salt: derived.salt_hex,
            created_at: record.created_at,
            expires_at: record.expires_at,
        })
    }

    /// Import a bundle previously produced by `export`
    pub async fn import_exported(
        &self,
        bundle: &ExportedKeyBundle,
        password: &str,
    ) -> Result<KeyRecord> {
        let salt = hex::decode(&bundle.kdf_salt)
            .map_err(|e| ConcordError::invalid(format!("bad hex KDF salt: {e}")))?;
        let derived = crypto::derive_key(password, Some(&salt), bundle.kdf)?;
        let wrapping = crypto::derived_key_bytes(&derived)?;

        let private = crypto::decrypt(&bundle.encrypted_private_key, &wrapping)?;
        let private = String::from_utf8(private)
            .map_err(|_| ConcordError::DecryptionFailed {
                message: "decrypted private material is not valid".to_string(),
            })?;

        let mut keys = self.keys.write().await;
        if keys.contains_key(&bundle.key_id) {
            return Err(ConcordError::duplicate("key", bundle.key_id.as_str()));
        }

        let record = KeyRecord {
            id: bundle.key_id.clone(),
            algorithm: bundle.algorithm,
            curve: bundle.curve.clone(),
            public_key: bundle.public_key.clone(),
            private_key: Some(private),
            created_at: bundle.created_at,
            expires_at: bundle.expires_at,
            revoked: false,
        };

        keys.insert(bundle.key_id.clone(), record.clone());
        info!(key_id = %bundle.key_id, "exported key re-imported");
        Ok(record.public_view())
    }

    /// Public views of every stored key, including expired ones
    pub async fn list(&self) -> Vec<KeyRecord> {
        self.keys.read().await.values().map(KeyRecord::public_view).collect()
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new(KeyStoreConfig::default())
    }
}
