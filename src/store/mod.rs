//! Storage seam for the security layer.
//!
//! All stateful components persist through the [`SecurityStore`] trait so
//! the backing store (SQL, document, in-memory) is swappable. Every
//! storage round-trip in the request path goes through [`TimeoutStore`],
//! which converts a slow backend into an explicit [`StoreError::Timeout`]
//! that each component maps to its fail-open policy.

mod memory;
mod records;

pub use memory::{MemoryStore, MemoryStoreConfig};
pub use records::{KeyStatus, RateLimitRecord, StoredKey};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::audit::{AuditLogEntry, AuditQuery};

/// Infrastructure errors from the backing store.
///
/// Detection outcomes are never errors; only the store being slow,
/// unreachable, or corrupt lands here.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage timeout after {0}ms")]
    Timeout(u64),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage rejected record: {0}")]
    InvalidRecord(String),
}

/// Backing-store contract for the three security tables.
#[async_trait]
pub trait SecurityStore: Send + Sync {
    // rate_limits
    async fn load_rate_limit(
        &self,
        user_id: &str,
        endpoint: &str,
    ) -> Result<Option<RateLimitRecord>, StoreError>;
    async fn save_rate_limit(&self, record: &RateLimitRecord) -> Result<(), StoreError>;
    /// Delete records for a user; `endpoint = None` clears all endpoints.
    async fn delete_rate_limits(
        &self,
        user_id: &str,
        endpoint: Option<&str>,
    ) -> Result<u64, StoreError>;
    async fn list_rate_limits(&self, user_id: &str) -> Result<Vec<RateLimitRecord>, StoreError>;
    /// Evict records whose newest request is older than `cutoff`.
    async fn sweep_rate_limits(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    // encryption_keys
    async fn load_keys(&self, user_id: &str) -> Result<Vec<StoredKey>, StoreError>;
    async fn insert_key(&self, key: &StoredKey) -> Result<(), StoreError>;
    async fn update_key_status(
        &self,
        user_id: &str,
        key_id: &str,
        status: KeyStatus,
        rotated_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;
    /// Users holding at least one `Active` key, for the rotation sweep.
    async fn users_with_active_keys(&self) -> Result<Vec<String>, StoreError>;

    // audit_logs
    async fn append_audit(&self, entries: &[AuditLogEntry]) -> Result<(), StoreError>;
    async fn query_audit(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>, StoreError>;
    async fn purge_audit_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Cheap reachability probe for health checks.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Decorator applying a hard timeout to every store operation.
///
/// A timed-out operation returns [`StoreError::Timeout`] rather than
/// blocking the caller; the component above decides the fallback.
pub struct TimeoutStore {
    inner: Arc<dyn SecurityStore>,
    timeout: Duration,
}

impl TimeoutStore {
    pub fn new(inner: Arc<dyn SecurityStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: std::future::Future<Output = Result<T, StoreError>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout.as_millis() as u64)),
        }
    }
}

#[async_trait]
impl SecurityStore for TimeoutStore {
    async fn load_rate_limit(
        &self,
        user_id: &str,
        endpoint: &str,
    ) -> Result<Option<RateLimitRecord>, StoreError> {
        self.bounded(self.inner.load_rate_limit(user_id, endpoint)).await
    }

    async fn save_rate_limit(&self, record: &RateLimitRecord) -> Result<(), StoreError> {
        self.bounded(self.inner.save_rate_limit(record)).await
    }

    async fn delete_rate_limits(
        &self,
        user_id: &str,
        endpoint: Option<&str>,
    ) -> Result<u64, StoreError> {
        self.bounded(self.inner.delete_rate_limits(user_id, endpoint)).await
    }

    async fn list_rate_limits(&self, user_id: &str) -> Result<Vec<RateLimitRecord>, StoreError> {
        self.bounded(self.inner.list_rate_limits(user_id)).await
    }

    async fn sweep_rate_limits(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.bounded(self.inner.sweep_rate_limits(cutoff)).await
    }

    async fn load_keys(&self, user_id: &str) -> Result<Vec<StoredKey>, StoreError> {
        self.bounded(self.inner.load_keys(user_id)).await
    }

    async fn insert_key(&self, key: &StoredKey) -> Result<(), StoreError> {
        self.bounded(self.inner.insert_key(key)).await
    }

    async fn update_key_status(
        &self,
        user_id: &str,
        key_id: &str,
        status: KeyStatus,
        rotated_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.bounded(self.inner.update_key_status(user_id, key_id, status, rotated_at))
            .await
    }

    async fn users_with_active_keys(&self) -> Result<Vec<String>, StoreError> {
        self.bounded(self.inner.users_with_active_keys()).await
    }

    async fn append_audit(&self, entries: &[AuditLogEntry]) -> Result<(), StoreError> {
        self.bounded(self.inner.append_audit(entries)).await
    }

    async fn query_audit(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>, StoreError> {
        self.bounded(self.inner.query_audit(query)).await
    }

    async fn purge_audit_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.bounded(self.inner.purge_audit_before(cutoff)).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.bounded(self.inner.ping()).await
    }
}
