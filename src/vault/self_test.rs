//! Power-on self-test for the vault's cryptographic primitives.
//!
//! Runs once at vault construction. A failing primitive does not abort
//! the process: the vault degrades to flagged pass-through, because
//! availability of the support channel is itself a safety property.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;

/// Self-test error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelfTestError {
    /// AES-GCM round-trip produced wrong plaintext.
    AesGcmRoundTripFailed,
    /// Tampered ciphertext was not rejected.
    AesGcmTamperUndetected,
    /// RNG produced degenerate output.
    RngHealthFailed,
    /// Cipher construction failed.
    CipherUnavailable,
}

impl std::fmt::Display for SelfTestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AesGcmRoundTripFailed => write!(f, "AES-GCM round-trip self-test failed"),
            Self::AesGcmTamperUndetected => write!(f, "AES-GCM tamper-detection self-test failed"),
            Self::RngHealthFailed => write!(f, "RNG health self-test failed"),
            Self::CipherUnavailable => write!(f, "AES-256-GCM cipher unavailable"),
        }
    }
}

impl std::error::Error for SelfTestError {}

/// Run all self-tests. Must pass before the vault encrypts anything.
pub fn run_self_tests() -> Result<(), SelfTestError> {
    test_aes_gcm()?;
    test_rng()?;
    Ok(())
}

fn test_aes_gcm() -> Result<(), SelfTestError> {
    let key = [0x42u8; 32];
    let nonce_bytes = [0x24u8; 12];
    let plaintext = b"materna-guard vault self-test";

    let cipher =
        Aes256Gcm::new_from_slice(&key).map_err(|_| SelfTestError::CipherUnavailable)?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let mut ciphertext = cipher
        .encrypt(nonce, plaintext.as_slice())
        .map_err(|_| SelfTestError::AesGcmRoundTripFailed)?;

    let decrypted = cipher
        .decrypt(nonce, ciphertext.as_slice())
        .map_err(|_| SelfTestError::AesGcmRoundTripFailed)?;
    if decrypted != plaintext {
        return Err(SelfTestError::AesGcmRoundTripFailed);
    }

    // A flipped ciphertext bit must fail authentication.
    ciphertext[0] ^= 0xFF;
    if cipher.decrypt(nonce, ciphertext.as_slice()).is_ok() {
        return Err(SelfTestError::AesGcmTamperUndetected);
    }

    Ok(())
}

fn test_rng() -> Result<(), SelfTestError> {
    let mut a = [0u8; 32];
    let mut b = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut a);
    rand::rngs::OsRng.fill_bytes(&mut b);

    if a == b || a == [0u8; 32] || b == [0u8; 32] {
        return Err(SelfTestError::RngHealthFailed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_tests_pass() {
        assert!(run_self_tests().is_ok());
    }

    #[test]
    fn test_aes_gcm_alone() {
        assert!(test_aes_gcm().is_ok());
    }

    #[test]
    fn test_rng_alone() {
        assert!(test_rng().is_ok());
    }
}
