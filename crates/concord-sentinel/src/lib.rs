//! Concord Sentinel - The security gateway
//!
//! Composes the key store, crypto primitives, policy engine and security
//! monitor behind one facade. Callers outside the security suite go
//! through Sentinel rather than the parts:
//!
//! - Signing resolves the key, checks caller lockout and produces a
//!   signature record
//! - Verification failures are recorded as `signature_invalid` alerts and
//!   count against the caller's failed attempts
//! - Authorization consults the policy engine and records denials as
//!   `policy_violation` alerts

use serde::{Deserialize, Serialize};
use tracing::info;

use concord_keystore::{KeyStore, KeyStoreConfig};
use concord_monitor::{MonitorConfig, SecurityMonitor};
use concord_policy::{PolicyConfig, PolicyEngine};
use concord_types::{
    KdfAlgorithm, KeyAlgorithm, KeyId, KeyRecord, PolicyContext, PolicyDecision, PrincipalId,
    Result, SignatureRecord,
};

/// Options for the sentinel and its composed subsystems
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SentinelConfig {
    pub keystore: KeyStoreConfig,
    pub policy: PolicyConfig,
    pub monitor: MonitorConfig,
}

/// The security gateway
pub struct Sentinel {
    keystore: KeyStore,
    policy: PolicyEngine,
    monitor: SecurityMonitor,
}

impl Sentinel {
    pub fn new(config: SentinelConfig) -> Self {
        info!("sentinel initialized");
        Self {
            keystore: KeyStore::new(config.keystore),
            policy: PolicyEngine::new(config.policy),
            monitor: SecurityMonitor::new(config.monitor),
        }
    }

    /// Generate a managed key
    pub async fn generate_key(
        &self,
        key_id: impl Into<KeyId>,
        algorithm: KeyAlgorithm,
    ) -> Result<KeyRecord> {
        self.keystore.generate(key_id, algorithm, None).await
    }

    /// Sign a message with a managed key on behalf of a principal
    ///
    /// Fails with `LockedOut` when the principal is under lockout, and
    /// `KeyUnavailable` when the key is revoked, expired or private-less.
    pub async fn sign(
        &self,
        principal: &PrincipalId,
        key_id: &KeyId,
        message: &[u8],
    ) -> Result<SignatureRecord> {
        self.monitor.ensure_not_locked(principal).await?;
        let key = self.keystore.get(key_id).await?;
        concord_crypto::sign(&key, message)
    }

    /// Verify a signature record against a public key
    ///
    /// A failed verification is recorded as a `signature_invalid` alert and
    /// counts one failed attempt against the principal.
    pub async fn verify(
        &self,
        principal: &PrincipalId,
        record: &SignatureRecord,
        public_key_hex: &str,
    ) -> Result<bool> {
        let valid = concord_crypto::verify(record, public_key_hex)?;
        if valid {
            self.monitor.clear_failed_attempts(principal).await;
        } else {
            self.monitor.record_failed_attempt(principal).await;
            self.monitor
                .record_invalid_signature(
                    format!("signature verification failed for key {}", record.key_id),
                    serde_json::json!({
                        "principal": principal,
                        "key_id": record.key_id,
                        "algorithm": record.algorithm,
                    }),
                )
                .await;
        }
        Ok(valid)
    }

    /// Evaluate an access request; denials become `policy_violation` alerts
    pub async fn authorize(&self, context: &PolicyContext) -> PolicyDecision {
        let decision = self.policy.evaluate(context).await;
        if !decision.allowed {
            self.monitor
                .record_policy_violation(
                    format!(
                        "{} denied {} on {}",
                        context.principal, context.action, context.resource
                    ),
                    serde_json::json!({
                        "principal": context.principal,
                        "resource": context.resource,
                        "action": context.action,
                        "reason": decision.reason,
                    }),
                )
                .await;
        }
        decision
    }

    /// Revoke a key that is suspected compromised
    ///
    /// Revocation is immediate and terminal; a `key_compromise` alert is
    /// recorded with the caller's detail.
    pub async fn report_key_compromise(&self, key_id: &KeyId, detail: &str) -> Result<()> {
        self.keystore.revoke(key_id).await?;
        self.monitor
            .record_key_compromise(
                format!("key {key_id} revoked: {detail}"),
                serde_json::json!({ "key_id": key_id, "detail": detail }),
            )
            .await;
        Ok(())
    }

    /// Keys approaching expiry, each flagged with an anomaly alert
    pub async fn rotation_check(&self) -> Vec<KeyRecord> {
        let due = self.keystore.keys_due_for_rotation().await;
        for key in &due {
            self.monitor
                .record_anomaly(
                    format!("key {} is due for rotation", key.id),
                    serde_json::json!({ "key_id": key.id, "expires_at": key.expires_at }),
                )
                .await;
        }
        due
    }

    /// Export a managed key wrapped under a password
    pub async fn export_key(
        &self,
        key_id: &KeyId,
        password: &str,
        kdf: KdfAlgorithm,
    ) -> Result<concord_types::ExportedKeyBundle> {
        self.keystore.export(key_id, password, kdf).await
    }

    /// Direct access to the key store
    pub fn keystore(&self) -> &KeyStore {
        &self.keystore
    }

    /// Direct access to the policy engine
    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    /// Direct access to the security monitor
    pub fn monitor(&self) -> &SecurityMonitor {
        &self.monitor
    }
}

impl Default for Sentinel {
    fn default() -> Self {
        Self::new(SentinelConfig::default())
    }
}
