//! Sliding-window rate limiting per `(user, endpoint)`.
//!
//! The guard is the first check on every inbound message: cheapest
//! first, protecting downstream model cost. Mutation of a single key's
//! record is serialized through a per-key async mutex so racing
//! requests cannot both observe a free slot; different keys never
//! contend. On any storage failure the guard fails open — availability
//! of the support channel outranks strict enforcement — and emits an
//! observable warning.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::store::{RateLimitRecord, SecurityStore, StoreError};
use crate::telemetry::{log_guard_event, GuardEvent};

/// Limits for one endpoint class.
#[derive(Debug, Clone, Copy)]
pub struct EndpointPolicy {
    pub max_requests: u32,
    pub window: Duration,
    pub block_duration: Duration,
}

/// Per-endpoint policy table with a conservative fallback for unknown
/// endpoints.
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    pub policies: HashMap<String, EndpointPolicy>,
    pub default_policy: EndpointPolicy,
    /// Records idle longer than this are evicted by `cleanup`.
    pub max_idle: Duration,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        let hour = Duration::from_secs(3600);
        let day = Duration::from_secs(86_400);
        let mut policies = HashMap::new();
        policies.insert(
            "chat_message".to_string(),
            EndpointPolicy {
                max_requests: 20,
                window: hour,
                block_duration: Duration::from_secs(15 * 60),
            },
        );
        policies.insert(
            "onboarding".to_string(),
            EndpointPolicy {
                max_requests: 5,
                window: day,
                block_duration: Duration::from_secs(6 * 3600),
            },
        );
        policies.insert(
            "data_export".to_string(),
            EndpointPolicy {
                max_requests: 3,
                window: day,
                block_duration: Duration::from_secs(6 * 3600),
            },
        );

        Self {
            policies,
            default_policy: EndpointPolicy {
                max_requests: 10,
                window: hour,
                block_duration: Duration::from_secs(30 * 60),
            },
            max_idle: day,
        }
    }
}

/// Outcome of one quota check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u32,
    /// When capacity frees up: oldest in-window request plus the window.
    pub reset_at: DateTime<Utc>,
    pub retry_after_seconds: Option<u64>,
}

/// Read-only window occupancy for one endpoint, for operator tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointUsage {
    pub endpoint: String,
    pub used: u32,
    pub limit: u32,
    pub reset_at: Option<DateTime<Utc>>,
    pub blocked: bool,
}

/// Stateful sliding-window guard backed by the security store.
pub struct QuotaGuard {
    config: QuotaConfig,
    store: Arc<dyn SecurityStore>,
    locks: DashMap<(String, String), Arc<Mutex<()>>>,
}

impl QuotaGuard {
    pub fn new(config: QuotaConfig, store: Arc<dyn SecurityStore>) -> Self {
        Self {
            config,
            store,
            locks: DashMap::new(),
        }
    }

    fn policy_for(&self, endpoint: &str) -> EndpointPolicy {
        self.config
            .policies
            .get(endpoint)
            .copied()
            .unwrap_or(self.config.default_policy)
    }

    fn key_lock(&self, user_id: &str, endpoint: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry((user_id.to_string(), endpoint.to_string()))
            .or_default()
            .clone()
    }

    /// Check and consume one request slot.
    ///
    /// Infrastructure failures never surface: the request is admitted
    /// and the degradation is logged.
    pub async fn check(&self, user_id: &str, endpoint: &str) -> RateLimitResult {
        let policy = self.policy_for(endpoint);
        let lock = self.key_lock(user_id, endpoint);
        let _guard = lock.lock().await;

        let now = Utc::now();
        let window = chrono::Duration::from_std(policy.window).unwrap_or(chrono::Duration::hours(1));

        let mut record = match self.store.load_rate_limit(user_id, endpoint).await {
            Ok(Some(record)) => record,
            Ok(None) => RateLimitRecord::new(user_id, endpoint),
            Err(e) => {
                self.fail_open(user_id, endpoint, &e);
                return RateLimitResult {
                    allowed: true,
                    remaining: policy.max_requests,
                    reset_at: now + window,
                    retry_after_seconds: None,
                };
            }
        };

        // An active block short-circuits before the window is touched.
        if let Some(blocked_until) = record.blocked_until {
            if blocked_until > now {
                let retry = (blocked_until - now).num_seconds().max(1) as u64;
                return RateLimitResult {
                    allowed: false,
                    remaining: 0,
                    reset_at: blocked_until,
                    retry_after_seconds: Some(retry),
                };
            }
        }

        let window_start = now - window;
        record.requests.retain(|t| *t > window_start);

        if record.requests.len() as u32 >= policy.max_requests {
            record.blocked_until =
                Some(now + chrono::Duration::seconds(policy.block_duration.as_secs() as i64));
            record.updated_at = now;
            let reset_at = record
                .requests
                .iter()
                .min()
                .map(|oldest| *oldest + window)
                .unwrap_or(now + window);
            self.persist(&record).await;
            log_guard_event(
                GuardEvent::RateLimited,
                "request over quota",
                &[("user", user_id), ("endpoint", endpoint)],
            );
            return RateLimitResult {
                allowed: false,
                remaining: 0,
                reset_at,
                retry_after_seconds: Some(policy.block_duration.as_secs()),
            };
        }

        record.requests.push(now);
        record.blocked_until = None;
        record.updated_at = now;
        let used = record.requests.len() as u32;
        let reset_at = record
            .requests
            .iter()
            .min()
            .map(|oldest| *oldest + window)
            .unwrap_or(now + window);
        self.persist(&record).await;

        RateLimitResult {
            allowed: true,
            remaining: policy.max_requests.saturating_sub(used),
            reset_at,
            retry_after_seconds: None,
        }
    }

    async fn persist(&self, record: &RateLimitRecord) {
        if let Err(e) = self.store.save_rate_limit(record).await {
            self.fail_open(&record.user_id, &record.endpoint, &e);
        }
    }

    fn fail_open(&self, user_id: &str, endpoint: &str, error: &StoreError) {
        metrics::counter!("quota_fail_open_total").increment(1);
        log_guard_event(
            GuardEvent::QuotaFailOpen,
            &format!("rate limit store error: {error}"),
            &[("user", user_id), ("endpoint", endpoint)],
        );
    }

    /// Operator override: drop tracked windows for a user.
    pub async fn clear(&self, user_id: &str, endpoint: Option<&str>) -> Result<u64, StoreError> {
        self.store.delete_rate_limits(user_id, endpoint).await
    }

    /// Current occupancy across all tracked endpoints, without mutating
    /// any window.
    pub async fn stats(&self, user_id: &str) -> Result<Vec<EndpointUsage>, StoreError> {
        let now = Utc::now();
        let records = self.store.list_rate_limits(user_id).await?;
        Ok(records
            .into_iter()
            .map(|record| {
                let policy = self.policy_for(&record.endpoint);
                let window =
                    chrono::Duration::from_std(policy.window).unwrap_or(chrono::Duration::hours(1));
                let window_start = now - window;
                let in_window: Vec<_> = record
                    .requests
                    .iter()
                    .filter(|t| **t > window_start)
                    .collect();
                EndpointUsage {
                    used: in_window.len() as u32,
                    limit: policy.max_requests,
                    reset_at: in_window.iter().min().map(|oldest| **oldest + window),
                    blocked: record.blocked_until.map_or(false, |until| until > now),
                    endpoint: record.endpoint,
                }
            })
            .collect())
    }

    /// Evict records idle past the configured maximum age, and release
    /// per-key locks no check currently holds.
    pub async fn cleanup(&self) -> Result<u64, StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::seconds(self.config.max_idle.as_secs() as i64);
        let removed = self.store.sweep_rate_limits(cutoff).await?;
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Ok(removed)
    }
}
