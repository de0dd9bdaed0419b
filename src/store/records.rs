//! Persisted record types for the three security tables.
//!
//! These are the backing-store-agnostic row shapes; every store
//! implementation persists exactly these fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One sliding-window counter, owned per `(user_id, endpoint)` pair.
///
/// `requests` holds only timestamps inside the active window; the guard
/// prunes stale entries on every access before persisting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRecord {
    pub user_id: String,
    pub endpoint: String,
    pub requests: Vec<DateTime<Utc>>,
    pub blocked_until: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl RateLimitRecord {
    pub fn new(user_id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            endpoint: endpoint.into(),
            requests: Vec::new(),
            blocked_until: None,
            updated_at: Utc::now(),
        }
    }

    /// Newest request timestamp, used by the idle-eviction sweep.
    pub fn newest_request(&self) -> Option<DateTime<Utc>> {
        self.requests.iter().max().copied()
    }
}

/// Lifecycle state of a per-user encryption key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    /// The single key used for new encryptions.
    Active,
    /// Superseded by rotation; still valid for decryption.
    Deprecated,
    /// Terminal. Never valid again for any operation.
    Revoked,
}

/// A per-user symmetric key as stored at rest.
///
/// `encrypted_key` is the data key wrapped by the master key; the raw key
/// material never appears in this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredKey {
    pub user_id: String,
    pub key_id: String,
    pub encrypted_key: String,
    pub algorithm: String,
    pub created_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
    pub status: KeyStatus,
}

impl StoredKey {
    /// Age reference point for rotation checks: the later of creation
    /// and last rotation.
    pub fn age_reference(&self) -> DateTime<Utc> {
        self.rotated_at.unwrap_or(self.created_at).max(self.created_at)
    }
}
