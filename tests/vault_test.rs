//! Integration tests for the per-user key vault.

use std::sync::Arc;
use std::time::Duration;

use materna_guard::store::{KeyStatus, MemoryStore, SecurityStore};
use materna_guard::vault::{KeyVault, VaultConfig, VaultError, ALGORITHM, PASSTHROUGH_KEY_ID};

fn vault_with_store() -> (KeyVault, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::default());
    (
        KeyVault::new(VaultConfig::default(), store.clone()),
        store,
    )
}

#[tokio::test]
async fn test_round_trip_for_various_plaintexts() {
    let (vault, _) = vault_with_store();
    let long_line = "linha longa ".repeat(500);
    let plaintexts = [
        "",
        "a",
        "mensagem comum",
        "acentuação: ãé çõ 💜",
        long_line.as_str(),
    ];
    for plaintext in plaintexts {
        let payload = vault.encrypt("mae-1", plaintext).await.unwrap();
        let decrypted = vault.decrypt("mae-1", &payload).await.unwrap();
        assert_eq!(decrypted, plaintext);
    }
}

#[tokio::test]
async fn test_rotation_scenario() {
    let (vault, _) = vault_with_store();

    let before = vault.encrypt("mae-1", "registrada antes").await.unwrap();
    vault.rotate("mae-1").await.unwrap();
    let after = vault.encrypt("mae-1", "registrada depois").await.unwrap();

    // The two key ids differ, and both ciphertexts stay readable.
    assert_ne!(before.key_id, after.key_id);
    assert_eq!(
        vault.decrypt("mae-1", &before).await.unwrap(),
        "registrada antes"
    );
    assert_eq!(
        vault.decrypt("mae-1", &after).await.unwrap(),
        "registrada depois"
    );
}

#[tokio::test]
async fn test_exactly_one_active_key_after_rotations() {
    let (vault, store) = vault_with_store();
    vault.encrypt("mae-1", "oi").await.unwrap();
    vault.rotate("mae-1").await.unwrap();
    vault.rotate("mae-1").await.unwrap();

    let keys = store.load_keys("mae-1").await.unwrap();
    assert_eq!(keys.len(), 3);
    let active: Vec<_> = keys
        .iter()
        .filter(|k| k.status == KeyStatus::Active)
        .collect();
    assert_eq!(active.len(), 1);
    let deprecated = keys
        .iter()
        .filter(|k| k.status == KeyStatus::Deprecated)
        .count();
    assert_eq!(deprecated, 2);
    // Demoted keys carry their rotation timestamp.
    assert!(keys
        .iter()
        .filter(|k| k.status == KeyStatus::Deprecated)
        .all(|k| k.rotated_at.is_some()));
}

#[tokio::test]
async fn test_revoked_user_cannot_reprovision() {
    let (vault, _) = vault_with_store();
    let payload = vault.encrypt("mae-1", "sigilo").await.unwrap();
    vault.revoke("mae-1").await.unwrap();

    assert!(matches!(
        vault.encrypt("mae-1", "outra").await,
        Err(VaultError::KeyRevoked)
    ));
    assert!(matches!(
        vault.decrypt("mae-1", &payload).await,
        Err(VaultError::KeyRevoked)
    ));
    assert!(matches!(
        vault.generate_key("mae-1").await,
        Err(VaultError::KeyRevoked)
    ));
}

#[tokio::test]
async fn test_key_material_never_stored_raw() {
    let (vault, store) = vault_with_store();
    vault.encrypt("mae-1", "corpo da mensagem").await.unwrap();

    let keys = store.load_keys("mae-1").await.unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].algorithm, ALGORITHM);
    // The stored form is the wrapped blob: base64, longer than the key.
    assert!(keys[0].encrypted_key.len() > 44);
}

#[tokio::test]
async fn test_users_needing_rotation_sweep() {
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::default());
    let aging_vault = KeyVault::new(
        VaultConfig {
            key_max_age: Duration::from_secs(0),
            ..Default::default()
        },
        store.clone(),
    );
    aging_vault.encrypt("mae-1", "oi").await.unwrap();
    aging_vault.encrypt("mae-2", "oi").await.unwrap();

    let mut due = aging_vault.users_needing_rotation().await.unwrap();
    due.sort();
    assert_eq!(due, vec!["mae-1".to_string(), "mae-2".to_string()]);
    assert!(aging_vault.needs_rotation("mae-1").await.unwrap());
}

#[tokio::test]
async fn test_payload_fields_are_explicit() {
    let (vault, _) = vault_with_store();
    let payload = vault.encrypt("mae-1", "campos").await.unwrap();
    assert_ne!(payload.key_id, PASSTHROUGH_KEY_ID);
    assert!(!payload.ciphertext.is_empty());
    assert!(!payload.nonce.is_empty());
    assert!(!payload.tag.is_empty());
    assert!(!payload.is_passthrough());
}

#[tokio::test]
async fn test_cross_user_decrypt_fails() {
    let (vault, _) = vault_with_store();
    let payload = vault.encrypt("mae-1", "só minha").await.unwrap();
    // Another user does not hold this key id.
    assert!(matches!(
        vault.decrypt("mae-2", &payload).await,
        Err(VaultError::KeyNotFound(_))
    ));
}
