//! Bounded in-memory store.
//!
//! Used standalone in tests and as the fallback tier when no durable
//! backend is configured. All bounds are explicit so eviction behavior
//! is testable in isolation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::records::{KeyStatus, RateLimitRecord, StoredKey};
use super::{SecurityStore, StoreError};
use crate::audit::{AuditLogEntry, AuditQuery};

/// Capacity bounds for the in-memory tier.
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// Max audit entries held; oldest are evicted past this.
    pub max_audit_entries: usize,
    /// Max tracked rate-limit keys.
    pub max_rate_limit_keys: usize,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_audit_entries: 50_000,
            max_rate_limit_keys: 100_000,
        }
    }
}

/// In-memory implementation of [`SecurityStore`].
pub struct MemoryStore {
    config: MemoryStoreConfig,
    rate_limits: RwLock<HashMap<(String, String), RateLimitRecord>>,
    keys: RwLock<HashMap<String, Vec<StoredKey>>>,
    audit: RwLock<Vec<AuditLogEntry>>,
}

impl MemoryStore {
    pub fn new(config: MemoryStoreConfig) -> Self {
        Self {
            config,
            rate_limits: RwLock::new(HashMap::new()),
            keys: RwLock::new(HashMap::new()),
            audit: RwLock::new(Vec::new()),
        }
    }

    /// Current audit entry count, for tests and health reporting.
    pub fn audit_len(&self) -> usize {
        self.audit.read().len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(MemoryStoreConfig::default())
    }
}

#[async_trait]
impl SecurityStore for MemoryStore {
    async fn load_rate_limit(
        &self,
        user_id: &str,
        endpoint: &str,
    ) -> Result<Option<RateLimitRecord>, StoreError> {
        let map = self.rate_limits.read();
        Ok(map.get(&(user_id.to_string(), endpoint.to_string())).cloned())
    }

    async fn save_rate_limit(&self, record: &RateLimitRecord) -> Result<(), StoreError> {
        let mut map = self.rate_limits.write();
        let key = (record.user_id.clone(), record.endpoint.clone());
        if !map.contains_key(&key) && map.len() >= self.config.max_rate_limit_keys {
            // Make room by dropping the stalest record.
            if let Some(oldest) = map
                .iter()
                .min_by_key(|(_, r)| r.updated_at)
                .map(|(k, _)| k.clone())
            {
                map.remove(&oldest);
            }
        }
        map.insert(key, record.clone());
        Ok(())
    }

    async fn delete_rate_limits(
        &self,
        user_id: &str,
        endpoint: Option<&str>,
    ) -> Result<u64, StoreError> {
        let mut map = self.rate_limits.write();
        let before = map.len();
        map.retain(|(u, e), _| {
            !(u == user_id && endpoint.map_or(true, |wanted| e == wanted))
        });
        Ok((before - map.len()) as u64)
    }

    async fn list_rate_limits(&self, user_id: &str) -> Result<Vec<RateLimitRecord>, StoreError> {
        let map = self.rate_limits.read();
        Ok(map
            .iter()
            .filter(|((u, _), _)| u == user_id)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn sweep_rate_limits(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut map = self.rate_limits.write();
        let before = map.len();
        map.retain(|_, record| match record.newest_request() {
            Some(newest) => newest >= cutoff,
            None => record.updated_at >= cutoff,
        });
        Ok((before - map.len()) as u64)
    }

    async fn load_keys(&self, user_id: &str) -> Result<Vec<StoredKey>, StoreError> {
        Ok(self.keys.read().get(user_id).cloned().unwrap_or_default())
    }

    async fn insert_key(&self, key: &StoredKey) -> Result<(), StoreError> {
        self.keys
            .write()
            .entry(key.user_id.clone())
            .or_default()
            .push(key.clone());
        Ok(())
    }

    async fn update_key_status(
        &self,
        user_id: &str,
        key_id: &str,
        status: KeyStatus,
        rotated_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut keys = self.keys.write();
        let user_keys = keys
            .get_mut(user_id)
            .ok_or_else(|| StoreError::InvalidRecord(format!("no keys for user {user_id}")))?;
        let entry = user_keys
            .iter_mut()
            .find(|k| k.key_id == key_id)
            .ok_or_else(|| StoreError::InvalidRecord(format!("unknown key {key_id}")))?;
        entry.status = status;
        if rotated_at.is_some() {
            entry.rotated_at = rotated_at;
        }
        Ok(())
    }

    async fn users_with_active_keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .keys
            .read()
            .iter()
            .filter(|(_, ks)| ks.iter().any(|k| k.status == KeyStatus::Active))
            .map(|(u, _)| u.clone())
            .collect())
    }

    async fn append_audit(&self, entries: &[AuditLogEntry]) -> Result<(), StoreError> {
        let mut audit = self.audit.write();
        audit.extend_from_slice(entries);
        if audit.len() > self.config.max_audit_entries {
            let excess = audit.len() - self.config.max_audit_entries;
            audit.drain(0..excess);
        }
        Ok(())
    }

    async fn query_audit(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>, StoreError> {
        let audit = self.audit.read();
        let mut matched: Vec<AuditLogEntry> = audit
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        matched.sort_by_key(|e| std::cmp::Reverse(e.timestamp));
        matched.truncate(query.limit);
        Ok(matched)
    }

    async fn purge_audit_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut audit = self.audit.write();
        let before = audit.len();
        audit.retain(|e| e.timestamp >= cutoff);
        Ok((before - audit.len()) as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
