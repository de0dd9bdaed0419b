//! Health check surface for operators.
//!
//! Probes every dependency the middleware needs to protect users —
//! storage, crypto, rate limiting, audit configuration, upstream AI
//! credentials — and reports pass/warn/fail with a latency measurement
//! per probe. A warning means protection is degraded but the channel is
//! up; only a hard failure marks the service unhealthy.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::audit::AuditLogger;
use crate::quota::QuotaGuard;
use crate::shutdown::ShutdownState;
use crate::store::SecurityStore;
use crate::vault::KeyVault;

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Outcome of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub name: String,
    pub status: ProbeStatus,
    pub latency_ms: u64,
    pub detail: Option<String>,
}

/// Detailed health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub state: HealthState,
    pub ready: bool,
    pub accepting_requests: bool,
    pub probes: Vec<ProbeResult>,
    pub uptime_secs: u64,
}

/// Aggregates health information from the security components.
pub struct HealthChecker {
    start_time: Instant,
    /// Env var expected to hold the upstream AI credential.
    ai_credential_env: String,
}

impl HealthChecker {
    pub fn new(ai_credential_env: impl Into<String>) -> Self {
        Self {
            start_time: Instant::now(),
            ai_credential_env: ai_credential_env.into(),
        }
    }

    /// Check liveness: process is responsive.
    pub fn is_alive(&self) -> bool {
        true
    }

    /// Generate the full health report.
    pub async fn report(
        &self,
        shutdown_state: ShutdownState,
        store: &Arc<dyn SecurityStore>,
        vault: &KeyVault,
        quota: &QuotaGuard,
        audit: &AuditLogger,
    ) -> HealthReport {
        let probes = vec![
            self.probe_storage(store).await,
            self.probe_crypto(vault),
            self.probe_rate_limiter(quota).await,
            self.probe_audit(audit),
            self.probe_ai_credential(),
        ];

        let accepting = shutdown_state == ShutdownState::Running;
        let state = if !accepting || probes.iter().any(|p| p.status == ProbeStatus::Fail) {
            HealthState::Unhealthy
        } else if probes.iter().any(|p| p.status == ProbeStatus::Warn) {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        HealthReport {
            state,
            ready: accepting && state != HealthState::Unhealthy,
            accepting_requests: accepting,
            probes,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    async fn probe_storage(&self, store: &Arc<dyn SecurityStore>) -> ProbeResult {
        let started = Instant::now();
        let (status, detail) = match store.ping().await {
            Ok(()) => (ProbeStatus::Pass, None),
            Err(e) => (ProbeStatus::Fail, Some(e.to_string())),
        };
        ProbeResult {
            name: "storage".to_string(),
            status,
            latency_ms: started.elapsed().as_millis() as u64,
            detail,
        }
    }

    fn probe_crypto(&self, vault: &KeyVault) -> ProbeResult {
        let started = Instant::now();
        let (status, detail) = if vault.is_crypto_available() {
            (ProbeStatus::Pass, None)
        } else {
            (
                ProbeStatus::Warn,
                Some("vault in pass-through mode, payloads unprotected".to_string()),
            )
        };
        ProbeResult {
            name: "crypto".to_string(),
            status,
            latency_ms: started.elapsed().as_millis() as u64,
            detail,
        }
    }

    async fn probe_rate_limiter(&self, quota: &QuotaGuard) -> ProbeResult {
        let started = Instant::now();
        // Read-only stats on a reserved probe user exercises the full
        // store path without consuming anyone's quota.
        let (status, detail) = match quota.stats("_health_probe").await {
            Ok(_) => (ProbeStatus::Pass, None),
            Err(e) => (ProbeStatus::Fail, Some(e.to_string())),
        };
        ProbeResult {
            name: "rate_limiter".to_string(),
            status,
            latency_ms: started.elapsed().as_millis() as u64,
            detail,
        }
    }

    fn probe_audit(&self, audit: &AuditLogger) -> ProbeResult {
        let started = Instant::now();
        let config = audit.config();
        let (status, detail) = if !config.is_sane() {
            (
                ProbeStatus::Fail,
                Some("audit configuration invalid".to_string()),
            )
        } else if audit.buffered_entries() * 5 >= config.buffer_hard_cap * 4 {
            (
                ProbeStatus::Warn,
                Some(format!(
                    "audit buffer at {}/{}",
                    audit.buffered_entries(),
                    config.buffer_hard_cap
                )),
            )
        } else if audit.dropped_entries() > 0 {
            (
                ProbeStatus::Warn,
                Some(format!("{} entries dropped", audit.dropped_entries())),
            )
        } else {
            (ProbeStatus::Pass, None)
        };
        ProbeResult {
            name: "audit".to_string(),
            status,
            latency_ms: started.elapsed().as_millis() as u64,
            detail,
        }
    }

    fn probe_ai_credential(&self) -> ProbeResult {
        let started = Instant::now();
        let present = std::env::var(&self.ai_credential_env)
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false);
        let (status, detail) = if present {
            (ProbeStatus::Pass, None)
        } else {
            (
                ProbeStatus::Warn,
                Some(format!("{} not set", self.ai_credential_env)),
            )
        };
        ProbeResult {
            name: "ai_credential".to_string(),
            status,
            latency_ms: started.elapsed().as_millis() as u64,
            detail,
        }
    }
}
