//! Materna Guard — trust & safety middleware.
//!
//! Sits between end users and the conversational AI of a perinatal
//! support service. Every inbound message passes through one pipeline:
//!
//! - **Quota Guard** first (cheapest check, protects model cost)
//! - **PII Redactor** sanitizes before anything is logged
//! - **Content Policy** and **Risk Detector** run on the raw, in-memory
//!   text, since detection patterns need it; only the sanitized form and
//!   derived flags ever reach the audit trail or durable storage
//! - **Key Vault** encrypts message bodies persisted at rest
//! - **Audit Logger** keeps the compliance trail, batched and PII-free
//!
//! # Failure model
//!
//! Detection outcomes (PII found, policy violated, risk elevated) are
//! values, not errors. Infrastructure failures never block the
//! conversation: the quota guard admits, the vault degrades to flagged
//! pass-through, the audit logger retries — each with an observable
//! warning. Availability of the support channel is itself a safety
//! property in this domain.

pub mod audit;
pub mod config;
pub mod health;
pub mod maintenance;
pub mod policy;
pub mod quota;
pub mod redact;
pub mod risk;
pub mod shutdown;
pub mod store;
pub mod telemetry;
pub mod vault;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use audit::{AuditAction, AuditLogEntry, AuditLogger};
use config::GuardConfig;
use health::{HealthChecker, HealthReport};
use maintenance::MaintenanceSummary;
use policy::{ContentPolicy, ContentValidationResult};
use quota::{QuotaGuard, RateLimitResult};
use redact::{PiiDetectionResult, PiiRedactor};
use risk::{RiskAnalysisResult, RiskDetector, SafetyResponse, Urgency};
use shutdown::{ShutdownCoordinator, ShutdownResult};
use store::{SecurityStore, TimeoutStore};
use telemetry::{log_guard_event, GuardEvent};
use vault::{EncryptedPayload, KeyVault, VaultError};

/// Per-request caller identity, passed into every check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityContext {
    pub user_id: String,
    pub endpoint: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl SecurityContext {
    pub fn new(user_id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            endpoint: endpoint.into(),
            ip_address: None,
            user_agent: None,
        }
    }
}

/// Combined outcome of screening one inbound message.
#[derive(Debug, Clone)]
pub struct ScreeningResult {
    pub pii: PiiDetectionResult,
    pub content: ContentValidationResult,
    pub risk: RiskAnalysisResult,
}

/// The security layer: one instance per process, explicitly constructed
/// and injected into request handlers.
///
/// Construction wires every component around a single timeout-guarded
/// store; [`SecurityLayer::start`] spawns the background flush and
/// maintenance tasks; [`SecurityLayer::shutdown`] drains in-flight work
/// and the audit buffer before stopping them.
pub struct SecurityLayer {
    config: GuardConfig,
    store: Arc<dyn SecurityStore>,
    redactor: Arc<PiiRedactor>,
    policy: Arc<ContentPolicy>,
    risk: Arc<RiskDetector>,
    quota: Arc<QuotaGuard>,
    vault: Arc<KeyVault>,
    audit: Arc<AuditLogger>,
    health: HealthChecker,
    shutdown: Arc<ShutdownCoordinator>,
    recent: DashMap<String, VecDeque<String>>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl SecurityLayer {
    /// Build the layer around a backing store.
    pub fn new(config: GuardConfig, backend: Arc<dyn SecurityStore>) -> Self {
        let store: Arc<dyn SecurityStore> =
            Arc::new(TimeoutStore::new(backend, config.store_timeout));

        let redactor = Arc::new(PiiRedactor::new());
        let policy = Arc::new(ContentPolicy::new());
        let risk = Arc::new(RiskDetector::new(config.risk_thresholds));
        let quota = Arc::new(QuotaGuard::new(config.quota.clone(), store.clone()));
        let vault = Arc::new(KeyVault::new(config.vault.clone(), store.clone()));
        let audit = Arc::new(AuditLogger::new(
            config.audit.clone(),
            store.clone(),
            redactor.clone(),
        ));
        let health = HealthChecker::new(config.ai_credential_env.clone());

        Self {
            config,
            store,
            redactor,
            policy,
            risk,
            quota,
            vault,
            audit,
            health,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            recent: DashMap::new(),
            tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Spawn the audit flusher and the periodic maintenance loop.
    ///
    /// Call once after construction, inside a tokio runtime.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        tasks.push(
            self.audit
                .clone()
                .spawn_flusher(self.shutdown.stop_signal()),
        );
        tasks.push(maintenance::spawn_maintenance(
            self.quota.clone(),
            self.audit.clone(),
            self.vault.clone(),
            self.config.maintenance_interval,
            self.shutdown.stop_signal(),
        ));
    }

    /// Drain in-flight calls and buffered audit entries, then stop the
    /// background tasks.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownResult {
        let result = self.shutdown.initiate(timeout).await;
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        result
    }

    /// Check the caller's quota. Call before any expensive downstream
    /// work. Fails open on infrastructure errors.
    pub async fn check_quota(&self, ctx: &SecurityContext) -> RateLimitResult {
        let _guard = self.shutdown.track();
        let result = self.quota.check(&ctx.user_id, &ctx.endpoint).await;
        if !result.allowed {
            self.audit.log_rate_limit_hit(ctx, &result);
        }
        result
    }

    /// Screen one inbound message: PII, content policy, and crisis risk
    /// in a single pass. Callers must reject the message when
    /// `content.allowed` is false and trigger the emergency UX path when
    /// `risk.urgency` is Emergency.
    pub fn screen_message(&self, ctx: &SecurityContext, text: &str) -> ScreeningResult {
        let _guard = self.shutdown.track();
        let started = Instant::now();

        let pii = self.redactor.detect(text);

        let history: Vec<String> = self
            .recent
            .get(&ctx.user_id)
            .map(|entry| entry.iter().cloned().collect())
            .unwrap_or_default();
        let content = self.policy.validate(text, &history);
        let risk = self.risk.analyze(text);

        if content.allowed {
            // Raw text lives only in this bounded in-memory window; it
            // feeds the repeat-spam heuristic and nothing else.
            let mut entry = self.recent.entry(ctx.user_id.clone()).or_default();
            entry.push_back(text.to_string());
            while entry.len() > self.config.recent_history_size {
                entry.pop_front();
            }
            drop(entry);
            self.audit.log_chat_message(
                ctx,
                pii.has_pii,
                started.elapsed().as_millis() as u64,
            );
        } else {
            log_guard_event(
                GuardEvent::ContentBlocked,
                "message rejected by content policy",
                &[("user", &ctx.user_id), ("endpoint", &ctx.endpoint)],
            );
            self.audit.log_content_blocked(ctx, &content.violations);
        }

        if risk.needs_human_review {
            if risk.urgency == Urgency::Emergency {
                log_guard_event(
                    GuardEvent::RiskEmergency,
                    "emergency risk signal detected",
                    &[("user", &ctx.user_id)],
                );
            }
            self.audit.log_risk_detected(ctx, &risk);
        }

        ScreeningResult { pii, content, risk }
    }

    /// The fixed user-facing response for a screening's risk outcome.
    pub fn safety_response(&self, result: &ScreeningResult) -> SafetyResponse {
        self.risk.compose_safety_response(&result.risk)
    }

    /// Record a security-relevant action in the audit trail.
    /// Fire-and-forget; metadata is redacted before buffering.
    pub fn record_audit(
        &self,
        action: AuditAction,
        metadata: serde_json::Value,
        ctx: &SecurityContext,
    ) {
        let mut builder = AuditLogEntry::builder(action, &ctx.user_id)
            .endpoint(&ctx.endpoint)
            .metadata(metadata);
        if let Some(ip) = &ctx.ip_address {
            builder = builder.ip_address(ip.clone());
        }
        if let Some(agent) = &ctx.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        self.audit.log(builder.build());
    }

    /// Encrypt a raw message body for persistence at rest.
    pub async fn protect(
        &self,
        user_id: &str,
        plaintext: &str,
    ) -> Result<EncryptedPayload, VaultError> {
        self.vault.encrypt(user_id, plaintext).await
    }

    /// Decrypt a previously protected payload.
    pub async fn reveal(
        &self,
        user_id: &str,
        payload: &EncryptedPayload,
    ) -> Result<String, VaultError> {
        self.vault.decrypt(user_id, payload).await
    }

    /// Full health report with per-probe latency.
    pub async fn health(&self) -> HealthReport {
        self.health
            .report(
                self.shutdown.state().await,
                &self.store,
                &self.vault,
                &self.quota,
                &self.audit,
            )
            .await
    }

    /// Run one maintenance cycle immediately (the background loop does
    /// this on its own schedule).
    pub async fn run_maintenance(&self) -> MaintenanceSummary {
        maintenance::run_maintenance_cycle(&self.quota, &self.audit, &self.vault).await
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn quota(&self) -> &Arc<QuotaGuard> {
        &self.quota
    }

    pub fn vault(&self) -> &Arc<KeyVault> {
        &self.vault
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    pub fn redactor(&self) -> &Arc<PiiRedactor> {
        &self.redactor
    }

    pub fn risk(&self) -> &Arc<RiskDetector> {
        &self.risk
    }

    pub fn policy(&self) -> &Arc<ContentPolicy> {
        &self.policy
    }
}
