//! Per-user encryption key lifecycle and payload protection.
//!
//! Message bodies persisted at rest are encrypted with a per-user
//! AES-256-GCM data key. The data key itself is stored wrapped by a
//! master key and unwrapped only in process memory; an in-memory cache
//! keyed by user holds the unwrapped active key to avoid repeated
//! unwrap cost. Rotation demotes the old key before activating the new
//! one, so there is never more than one Active key and never a
//! half-rotated state observable by callers.
//!
//! If the cryptographic primitive fails its power-on self-test the
//! vault degrades to a clearly flagged pass-through (`key_id == "none"`)
//! instead of crashing; callers check `key_id` to know whether data is
//! actually protected.

mod self_test;

pub use self_test::{run_self_tests, SelfTestError};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use dashmap::DashMap;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::store::{KeyStatus, SecurityStore, StoreError, StoredKey};
use crate::telemetry::{log_guard_event, GuardEvent};

/// Key size (256 bits).
pub const KEY_SIZE: usize = 32;
/// Nonce size (96 bits for GCM).
pub const NONCE_SIZE: usize = 12;
/// Authentication tag size (128 bits).
pub const TAG_SIZE: usize = 16;
/// Algorithm label stored with every key.
pub const ALGORITHM: &str = "aes-256-gcm";
/// Key id marking an unprotected pass-through payload.
pub const PASSTHROUGH_KEY_ID: &str = "none";

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("user key is revoked")]
    KeyRevoked,

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("cryptographic operation failed: {0}")]
    CryptoFailure(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Encrypted field as handed to callers and persisted by them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// Base64 ciphertext, tag excluded.
    pub ciphertext: String,
    /// Base64 96-bit nonce; empty in pass-through mode.
    pub nonce: String,
    /// Base64 128-bit authentication tag; empty in pass-through mode.
    pub tag: String,
    pub key_id: String,
}

impl EncryptedPayload {
    /// True when the payload was written without real encryption.
    pub fn is_passthrough(&self) -> bool {
        self.key_id == PASSTHROUGH_KEY_ID
    }
}

/// Vault configuration.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Age past which `needs_rotation` reports true.
    pub key_max_age: Duration,
    /// Master key; when absent one is derived from machine identity.
    pub master_key: Option<[u8; KEY_SIZE]>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            key_max_age: Duration::from_secs(90 * 86_400),
            master_key: None,
        }
    }
}

struct CachedKey {
    key_id: String,
    material: [u8; KEY_SIZE],
}

/// Per-user key vault backed by the security store.
pub struct KeyVault {
    config: VaultConfig,
    store: Arc<dyn SecurityStore>,
    master_key: [u8; KEY_SIZE],
    cache: RwLock<HashMap<String, CachedKey>>,
    /// Serializes generate/rotate/revoke per user so two Active keys can
    /// never be provisioned concurrently.
    user_locks: DashMap<String, Arc<Mutex<()>>>,
    crypto_available: bool,
}

impl KeyVault {
    /// Construct the vault, running the crypto power-on self-test.
    ///
    /// A failed self-test leaves the vault in flagged pass-through mode
    /// rather than aborting startup.
    pub fn new(config: VaultConfig, store: Arc<dyn SecurityStore>) -> Self {
        let crypto_available = match self_test::run_self_tests() {
            Ok(()) => true,
            Err(e) => {
                log_guard_event(
                    GuardEvent::VaultDegraded,
                    &format!("crypto self-test failed: {e}"),
                    &[],
                );
                false
            }
        };

        let master_key = config.master_key.unwrap_or_else(machine_master_key);

        Self {
            config,
            store,
            master_key,
            cache: RwLock::new(HashMap::new()),
            user_locks: DashMap::new(),
            crypto_available,
        }
    }

    fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.user_locks
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }

    #[cfg(test)]
    fn new_degraded(config: VaultConfig, store: Arc<dyn SecurityStore>) -> Self {
        let mut vault = Self::new(config, store);
        vault.crypto_available = false;
        vault
    }

    /// Whether real encryption is in effect.
    pub fn is_crypto_available(&self) -> bool {
        self.crypto_available
    }

    /// Ensure the user has an Active key and return its stored form.
    ///
    /// Fails for revoked users instead of silently re-provisioning.
    pub async fn generate_key(&self, user_id: &str) -> Result<StoredKey, VaultError> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;
        let keys = self.store.load_keys(user_id).await?;
        if keys.iter().any(|k| k.status == KeyStatus::Revoked) {
            return Err(VaultError::KeyRevoked);
        }
        if let Some(active) = keys.into_iter().find(|k| k.status == KeyStatus::Active) {
            return Ok(active);
        }
        self.provision_key(user_id).await
    }

    async fn provision_key(&self, user_id: &str) -> Result<StoredKey, VaultError> {
        let mut material = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut material);

        let stored = StoredKey {
            user_id: user_id.to_string(),
            key_id: uuid::Uuid::new_v4().to_string(),
            encrypted_key: self.wrap_key(&material)?,
            algorithm: ALGORITHM.to_string(),
            created_at: Utc::now(),
            rotated_at: None,
            status: KeyStatus::Active,
        };
        self.store.insert_key(&stored).await?;

        self.cache.write().await.insert(
            user_id.to_string(),
            CachedKey {
                key_id: stored.key_id.clone(),
                material,
            },
        );
        Ok(stored)
    }

    /// Encrypt a plaintext under the user's active key, provisioning one
    /// lazily. A fresh nonce is drawn on every call.
    pub async fn encrypt(&self, user_id: &str, plaintext: &str) -> Result<EncryptedPayload, VaultError> {
        if !self.crypto_available {
            metrics::counter!("vault_passthrough_total").increment(1);
            log_guard_event(
                GuardEvent::VaultDegraded,
                "encrypt served as pass-through",
                &[("user", user_id)],
            );
            return Ok(EncryptedPayload {
                ciphertext: BASE64.encode(plaintext.as_bytes()),
                nonce: String::new(),
                tag: String::new(),
                key_id: PASSTHROUGH_KEY_ID.to_string(),
            });
        }

        let (key_id, material) = self.active_key(user_id).await?;
        let cipher = Aes256Gcm::new_from_slice(&material)
            .map_err(|_| VaultError::CryptoFailure("cipher construction failed".into()))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut sealed = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::CryptoFailure("encryption failed".into()))?;
        let tag = sealed.split_off(sealed.len() - TAG_SIZE);

        Ok(EncryptedPayload {
            ciphertext: BASE64.encode(&sealed),
            nonce: BASE64.encode(nonce_bytes),
            tag: BASE64.encode(&tag),
            key_id,
        })
    }

    /// Decrypt a payload by its explicit key id.
    ///
    /// Deprecated keys remain valid so pre-rotation ciphertexts stay
    /// readable; revoked keys fail.
    pub async fn decrypt(&self, user_id: &str, payload: &EncryptedPayload) -> Result<String, VaultError> {
        if payload.is_passthrough() {
            // Written during an outage; readable regardless of vault state.
            let bytes = BASE64
                .decode(&payload.ciphertext)
                .map_err(|e| VaultError::InvalidPayload(e.to_string()))?;
            return String::from_utf8(bytes)
                .map_err(|e| VaultError::InvalidPayload(e.to_string()));
        }
        if !self.crypto_available {
            return Err(VaultError::CryptoFailure("crypto unavailable".into()));
        }

        let material = self.key_material(user_id, &payload.key_id).await?;
        let cipher = Aes256Gcm::new_from_slice(&material)
            .map_err(|_| VaultError::CryptoFailure("cipher construction failed".into()))?;

        let nonce_bytes = BASE64
            .decode(&payload.nonce)
            .map_err(|e| VaultError::InvalidPayload(e.to_string()))?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(VaultError::InvalidPayload("bad nonce length".into()));
        }
        let mut sealed = BASE64
            .decode(&payload.ciphertext)
            .map_err(|e| VaultError::InvalidPayload(e.to_string()))?;
        let tag = BASE64
            .decode(&payload.tag)
            .map_err(|e| VaultError::InvalidPayload(e.to_string()))?;
        sealed.extend_from_slice(&tag);

        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), sealed.as_slice())
            .map_err(|_| VaultError::CryptoFailure("authentication failed".into()))?;
        String::from_utf8(plaintext).map_err(|e| VaultError::InvalidPayload(e.to_string()))
    }

    /// Rotate the user's key: demote the current Active key to
    /// Deprecated, activate a fresh key, invalidate the cache entry.
    ///
    /// Existing ciphertexts are not re-encrypted; their Deprecated key
    /// keeps decrypting them.
    pub async fn rotate(&self, user_id: &str) -> Result<StoredKey, VaultError> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;
        let keys = self.store.load_keys(user_id).await?;
        if keys.iter().any(|k| k.status == KeyStatus::Revoked) {
            return Err(VaultError::KeyRevoked);
        }

        // Demote first so two Active keys can never coexist.
        if let Some(active) = keys.iter().find(|k| k.status == KeyStatus::Active) {
            self.store
                .update_key_status(
                    user_id,
                    &active.key_id,
                    KeyStatus::Deprecated,
                    Some(Utc::now()),
                )
                .await?;
        }
        self.cache.write().await.remove(user_id);

        let new_key = self.provision_key(user_id).await?;
        log_guard_event(
            GuardEvent::KeyRotated,
            "user key rotated",
            &[("user", user_id), ("key_id", &new_key.key_id)],
        );
        Ok(new_key)
    }

    /// Terminal revocation: every key for the user becomes unusable.
    pub async fn revoke(&self, user_id: &str) -> Result<(), VaultError> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;
        let keys = self.store.load_keys(user_id).await?;
        for key in &keys {
            if key.status != KeyStatus::Revoked {
                self.store
                    .update_key_status(user_id, &key.key_id, KeyStatus::Revoked, None)
                    .await?;
            }
        }
        self.cache.write().await.remove(user_id);
        log_guard_event(GuardEvent::KeyRevoked, "user keys revoked", &[("user", user_id)]);
        Ok(())
    }

    /// True once the active key's age exceeds the configured maximum.
    pub async fn needs_rotation(&self, user_id: &str) -> Result<bool, VaultError> {
        let keys = self.store.load_keys(user_id).await?;
        let Some(active) = keys.iter().find(|k| k.status == KeyStatus::Active) else {
            return Ok(false);
        };
        let age = Utc::now() - active.age_reference();
        let max_age = chrono::Duration::seconds(self.config.key_max_age.as_secs() as i64);
        Ok(age > max_age)
    }

    /// Users whose active key is past its maximum age.
    pub async fn users_needing_rotation(&self) -> Result<Vec<String>, VaultError> {
        let mut due = Vec::new();
        for user_id in self.store.users_with_active_keys().await? {
            if self.needs_rotation(&user_id).await? {
                due.push(user_id);
            }
        }
        Ok(due)
    }

    /// Active key for the user, via the cache, provisioning lazily.
    async fn active_key(&self, user_id: &str) -> Result<(String, [u8; KEY_SIZE]), VaultError> {
        if let Some(cached) = self.cache.read().await.get(user_id) {
            return Ok((cached.key_id.clone(), cached.material));
        }

        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;
        // Another call may have provisioned while we waited.
        if let Some(cached) = self.cache.read().await.get(user_id) {
            return Ok((cached.key_id.clone(), cached.material));
        }

        let keys = self.store.load_keys(user_id).await?;
        if keys.iter().any(|k| k.status == KeyStatus::Revoked) {
            return Err(VaultError::KeyRevoked);
        }
        let stored = match keys.into_iter().find(|k| k.status == KeyStatus::Active) {
            Some(key) => key,
            None => self.provision_key(user_id).await?,
        };
        let material = self.unwrap_key(&stored.encrypted_key)?;

        self.cache.write().await.insert(
            user_id.to_string(),
            CachedKey {
                key_id: stored.key_id.clone(),
                material,
            },
        );
        Ok((stored.key_id, material))
    }

    /// Key material for an explicit key id, any non-revoked status.
    async fn key_material(&self, user_id: &str, key_id: &str) -> Result<[u8; KEY_SIZE], VaultError> {
        if let Some(cached) = self.cache.read().await.get(user_id) {
            if cached.key_id == key_id {
                return Ok(cached.material);
            }
        }

        let keys = self.store.load_keys(user_id).await?;
        let stored = keys
            .into_iter()
            .find(|k| k.key_id == key_id)
            .ok_or_else(|| VaultError::KeyNotFound(key_id.to_string()))?;
        if stored.status == KeyStatus::Revoked {
            return Err(VaultError::KeyRevoked);
        }
        self.unwrap_key(&stored.encrypted_key)
    }

    /// Wrap a data key under the master key for storage.
    fn wrap_key(&self, material: &[u8; KEY_SIZE]) -> Result<String, VaultError> {
        let cipher = Aes256Gcm::new_from_slice(&self.master_key)
            .map_err(|_| VaultError::CryptoFailure("master cipher construction failed".into()))?;
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), material.as_slice())
            .map_err(|_| VaultError::CryptoFailure("key wrap failed".into()))?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + sealed.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&sealed);
        Ok(BASE64.encode(blob))
    }

    fn unwrap_key(&self, wrapped: &str) -> Result<[u8; KEY_SIZE], VaultError> {
        let blob = BASE64
            .decode(wrapped)
            .map_err(|e| VaultError::InvalidPayload(e.to_string()))?;
        if blob.len() <= NONCE_SIZE {
            return Err(VaultError::InvalidPayload("wrapped key too short".into()));
        }
        let (nonce_bytes, sealed) = blob.split_at(NONCE_SIZE);
        let cipher = Aes256Gcm::new_from_slice(&self.master_key)
            .map_err(|_| VaultError::CryptoFailure("master cipher construction failed".into()))?;
        let material = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), sealed)
            .map_err(|_| VaultError::CryptoFailure("key unwrap failed".into()))?;
        material
            .try_into()
            .map_err(|_| VaultError::InvalidPayload("wrapped key has wrong size".into()))
    }
}

/// Derive a master key from machine identity when none is configured.
///
/// Ties stored keys to this host; a configured key takes precedence in
/// any real deployment.
fn machine_master_key() -> [u8; KEY_SIZE] {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let mut hasher = Sha256::new();
    hasher.update(host.as_bytes());
    hasher.update(b"-");
    hasher.update(user.as_bytes());
    hasher.update(b"materna-guard-master-salt");
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn vault() -> KeyVault {
        KeyVault::new(VaultConfig::default(), Arc::new(MemoryStore::default()))
    }

    #[tokio::test]
    async fn test_encrypt_decrypt_round_trip() {
        let vault = vault();
        let payload = vault.encrypt("user-1", "mensagem sensível").await.unwrap();
        assert_ne!(payload.key_id, PASSTHROUGH_KEY_ID);
        assert!(!payload.nonce.is_empty());
        assert!(!payload.tag.is_empty());

        let plaintext = vault.decrypt("user-1", &payload).await.unwrap();
        assert_eq!(plaintext, "mensagem sensível");
    }

    #[tokio::test]
    async fn test_fresh_nonce_per_call() {
        let vault = vault();
        let a = vault.encrypt("user-1", "mesma mensagem").await.unwrap();
        let b = vault.encrypt("user-1", "mesma mensagem").await.unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[tokio::test]
    async fn test_lazy_key_generation() {
        let vault = vault();
        let payload = vault.encrypt("new-user", "oi").await.unwrap();
        let key = vault.generate_key("new-user").await.unwrap();
        assert_eq!(key.key_id, payload.key_id);
        assert_eq!(key.status, KeyStatus::Active);
    }

    #[tokio::test]
    async fn test_rotation_keeps_old_ciphertext_readable() {
        let vault = vault();
        let before = vault.encrypt("user-1", "antes da rotação").await.unwrap();

        let new_key = vault.rotate("user-1").await.unwrap();
        assert_ne!(new_key.key_id, before.key_id);

        let after = vault.encrypt("user-1", "depois da rotação").await.unwrap();
        assert_eq!(after.key_id, new_key.key_id);

        assert_eq!(
            vault.decrypt("user-1", &before).await.unwrap(),
            "antes da rotação"
        );
        assert_eq!(
            vault.decrypt("user-1", &after).await.unwrap(),
            "depois da rotação"
        );
    }

    #[tokio::test]
    async fn test_revoke_is_terminal() {
        let vault = vault();
        let payload = vault.encrypt("user-1", "segredo").await.unwrap();

        vault.revoke("user-1").await.unwrap();

        assert!(matches!(
            vault.encrypt("user-1", "de novo").await,
            Err(VaultError::KeyRevoked)
        ));
        assert!(matches!(
            vault.decrypt("user-1", &payload).await,
            Err(VaultError::KeyRevoked)
        ));
        assert!(matches!(
            vault.rotate("user-1").await,
            Err(VaultError::KeyRevoked)
        ));
    }

    #[tokio::test]
    async fn test_tampered_payload_fails() {
        let vault = vault();
        let mut payload = vault.encrypt("user-1", "íntegra").await.unwrap();
        payload.tag = BASE64.encode([0u8; TAG_SIZE]);
        assert!(vault.decrypt("user-1", &payload).await.is_err());
    }

    #[tokio::test]
    async fn test_needs_rotation_fresh_key() {
        let vault = vault();
        vault.encrypt("user-1", "oi").await.unwrap();
        assert!(!vault.needs_rotation("user-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_passthrough_mode_flags_payload() {
        let degraded = KeyVault::new_degraded(
            VaultConfig::default(),
            Arc::new(MemoryStore::default()),
        );
        let payload = degraded.encrypt("user-1", "sem proteção").await.unwrap();
        assert!(payload.is_passthrough());
        assert_eq!(payload.key_id, PASSTHROUGH_KEY_ID);

        // Readable even by a healthy vault afterwards.
        let healthy = vault();
        assert_eq!(
            healthy.decrypt("user-1", &payload).await.unwrap(),
            "sem proteção"
        );
    }

    #[tokio::test]
    async fn test_decrypt_unknown_key_id() {
        let vault = vault();
        let mut payload = vault.encrypt("user-1", "oi").await.unwrap();
        payload.key_id = "deadbeef".to_string();
        assert!(matches!(
            vault.decrypt("user-1", &payload).await,
            Err(VaultError::KeyNotFound(_))
        ));
    }
}
