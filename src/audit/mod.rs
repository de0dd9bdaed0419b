//! Compliance-grade, PII-free audit trail.
//!
//! Entries are buffered in memory and flushed to the store as atomic
//! batches, either when the buffer reaches the batch size or on a timer,
//! whichever comes first. A failed flush re-queues the batch at the
//! front; a hard cap bounds memory during a sustained outage, dropping
//! oldest entries with an observable counter.
//!
//! Logging never throws by construction: `log` returns nothing and every
//! failure funnels into the retry/fail-open path. Every metadata value
//! passes through the structured PII redactor before buffering; no raw
//! user text reaches durable storage through this module.

mod entry;

pub use entry::{AuditAction, AuditEntryBuilder, AuditFlag, AuditLogEntry, AuditQuery};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::policy::ContentViolation;
use crate::quota::RateLimitResult;
use crate::redact::PiiRedactor;
use crate::risk::RiskAnalysisResult;
use crate::store::{SecurityStore, StoreError};
use crate::telemetry::{log_guard_event, GuardEvent};
use crate::SecurityContext;

/// Audit logger configuration.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Flush when the buffer reaches this many entries.
    pub batch_size: usize,
    /// Flush at least this often regardless of buffer depth.
    pub flush_interval: Duration,
    /// Hard buffer cap; oldest entries are dropped past this.
    pub buffer_hard_cap: usize,
    /// Entries older than this are removed by `cleanup_old_logs`.
    pub retention: Duration,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            flush_interval: Duration::from_secs(5),
            buffer_hard_cap: 10_000,
            retention: Duration::from_secs(180 * 86_400),
        }
    }
}

impl AuditConfig {
    /// Sanity check used by the health surface.
    pub fn is_sane(&self) -> bool {
        self.batch_size > 0
            && self.batch_size <= self.buffer_hard_cap
            && !self.flush_interval.is_zero()
            && self.retention >= Duration::from_secs(86_400)
    }
}

/// Aggregate view over a user's audit entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStats {
    pub total: u64,
    pub failures: u64,
    pub by_action: HashMap<String, u64>,
    pub by_flag: HashMap<String, u64>,
    pub avg_latency_ms: Option<f64>,
}

/// Export formats accepted by compliance tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

/// Buffered, batched audit logger.
pub struct AuditLogger {
    config: AuditConfig,
    store: Arc<dyn SecurityStore>,
    redactor: Arc<PiiRedactor>,
    buffer: Mutex<VecDeque<AuditLogEntry>>,
    flush_notify: Notify,
    dropped: AtomicU64,
}

impl AuditLogger {
    pub fn new(
        config: AuditConfig,
        store: Arc<dyn SecurityStore>,
        redactor: Arc<PiiRedactor>,
    ) -> Self {
        Self {
            config,
            store,
            redactor,
            buffer: Mutex::new(VecDeque::new()),
            flush_notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Entries dropped at the hard cap since startup.
    pub fn dropped_entries(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Current buffer depth.
    pub fn buffered_entries(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Append one entry. Fire-and-forget: never fails, never blocks on
    /// storage. The entry's metadata and error message are redacted
    /// before they touch the buffer.
    pub fn log(&self, mut entry: AuditLogEntry) {
        self.redactor.redact_structured(&mut entry.metadata);
        if let Some(message) = entry.error_message.take() {
            entry.error_message = Some(self.redactor.sanitize(&message));
        }

        let depth = {
            let mut buffer = self.buffer.lock();
            buffer.push_back(entry);
            while buffer.len() > self.config.buffer_hard_cap {
                buffer.pop_front();
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                metrics::counter!("audit_dropped_total").increment(1);
                if total == 1 || total % 1000 == 0 {
                    log_guard_event(
                        GuardEvent::AuditDropped,
                        "audit buffer at hard cap, dropping oldest",
                        &[("dropped_total", &total.to_string())],
                    );
                }
            }
            buffer.len()
        };

        if depth >= self.config.batch_size {
            self.flush_notify.notify_one();
        }
    }

    /// Spawn the background flush task. Stops cleanly when `stop` flips
    /// to true, draining the buffer first.
    pub fn spawn_flusher(self: Arc<Self>, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
        let logger = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(logger.config.flush_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = logger.flush_notify.notified() => {}
                    _ = stop.changed() => {
                        if *stop.borrow() {
                            logger.drain().await;
                            return;
                        }
                    }
                }
                logger.flush_once().await;
            }
        })
    }

    /// Flush up to one batch. A failed insert re-queues the batch at the
    /// front of the buffer in its original order.
    pub async fn flush_once(&self) -> bool {
        let batch: Vec<AuditLogEntry> = {
            let mut buffer = self.buffer.lock();
            let take = buffer.len().min(self.config.batch_size);
            buffer.drain(..take).collect()
        };
        if batch.is_empty() {
            return true;
        }

        match self.store.append_audit(&batch).await {
            Ok(()) => {
                metrics::counter!("audit_flushed_total").increment(batch.len() as u64);
                true
            }
            Err(e) => {
                let mut buffer = self.buffer.lock();
                for entry in batch.into_iter().rev() {
                    buffer.push_front(entry);
                }
                log_guard_event(
                    GuardEvent::AuditRequeued,
                    &format!("audit flush failed, batch re-queued: {e}"),
                    &[("buffered", &buffer.len().to_string())],
                );
                false
            }
        }
    }

    /// Drain the whole buffer, giving up after repeated flush failures
    /// so shutdown cannot hang on a dead store.
    pub async fn drain(&self) {
        let mut failures = 0;
        while self.buffered_entries() > 0 {
            if self.flush_once().await {
                failures = 0;
            } else {
                failures += 1;
                if failures >= 3 {
                    tracing::warn!(
                        remaining = self.buffered_entries(),
                        "audit drain abandoned after repeated flush failures"
                    );
                    return;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }

    /// Query persisted entries, flushing pending ones first so recent
    /// activity is visible.
    pub async fn get_logs(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>, StoreError> {
        self.flush_once().await;
        self.store.query_audit(query).await
    }

    /// Aggregate statistics over a user's entries in a time range.
    pub async fn get_stats(
        &self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<AuditStats, StoreError> {
        let mut query = AuditQuery::for_user(user_id);
        query.since = since;
        query.until = until;
        query.limit = usize::MAX;
        let entries = self.get_logs(&query).await?;

        let mut by_action: HashMap<String, u64> = HashMap::new();
        let mut by_flag: HashMap<String, u64> = HashMap::new();
        let mut failures = 0u64;
        let mut latency_sum = 0u64;
        let mut latency_count = 0u64;

        for entry in &entries {
            *by_action.entry(entry.action.as_str().to_string()).or_default() += 1;
            for flag in &entry.flags {
                *by_flag.entry(flag.as_str().to_string()).or_default() += 1;
            }
            if !entry.success {
                failures += 1;
            }
            if let Some(latency) = entry.latency_ms {
                latency_sum += latency;
                latency_count += 1;
            }
        }

        Ok(AuditStats {
            total: entries.len() as u64,
            failures,
            by_action,
            by_flag,
            avg_latency_ms: (latency_count > 0)
                .then(|| latency_sum as f64 / latency_count as f64),
        })
    }

    /// Hard-delete entries past retention. Returns the count removed.
    pub async fn cleanup_old_logs(&self) -> Result<u64, StoreError> {
        let cutoff =
            Utc::now() - chrono::Duration::seconds(self.config.retention.as_secs() as i64);
        self.store.purge_audit_before(cutoff).await
    }

    /// Serialize a user's full trail for a compliance request.
    pub async fn export_for_compliance(
        &self,
        user_id: &str,
        format: ExportFormat,
    ) -> Result<String, StoreError> {
        let mut query = AuditQuery::for_user(user_id);
        query.limit = usize::MAX;
        let entries = self.get_logs(&query).await?;

        match format {
            ExportFormat::Json => serde_json::to_string_pretty(&entries)
                .map_err(|e| StoreError::InvalidRecord(e.to_string())),
            ExportFormat::Csv => Ok(to_csv(&entries)),
        }
    }

    // Helper wrappers. Each sets the action/flag combination for one
    // call site; all of them share the redaction path in `log`.

    pub fn log_chat_message(&self, ctx: &SecurityContext, pii_detected: bool, latency_ms: u64) {
        let mut builder = AuditLogEntry::builder(AuditAction::ChatMessage, &ctx.user_id)
            .endpoint(&ctx.endpoint)
            .metadata(serde_json::json!({ "pii_detected": pii_detected }))
            .latency_ms(latency_ms);
        if pii_detected {
            builder = builder.flag(AuditFlag::PiiDetected);
        }
        self.log(apply_context(builder, ctx));
    }

    pub fn log_content_blocked(&self, ctx: &SecurityContext, violations: &[ContentViolation]) {
        let kinds: Vec<crate::policy::ViolationKind> =
            violations.iter().map(|v| v.kind).collect();
        let builder = AuditLogEntry::builder(AuditAction::MessageBlocked, &ctx.user_id)
            .endpoint(&ctx.endpoint)
            .metadata(serde_json::json!({ "violations": kinds }))
            .success(false)
            .flag(AuditFlag::ContentBlocked);
        self.log(apply_context(builder, ctx));
    }

    pub fn log_risk_detected(&self, ctx: &SecurityContext, result: &RiskAnalysisResult) {
        let builder = AuditLogEntry::builder(AuditAction::RiskDetected, &ctx.user_id)
            .endpoint(&ctx.endpoint)
            .metadata(serde_json::json!({
                "level": result.level,
                "urgency": result.urgency,
                "score": result.score,
                "recommended_action": result.recommended_action,
            }))
            .flag(AuditFlag::RiskDetected);
        self.log(apply_context(builder, ctx));
    }

    pub fn log_rate_limit_hit(&self, ctx: &SecurityContext, result: &RateLimitResult) {
        let builder = AuditLogEntry::builder(AuditAction::RateLimitHit, &ctx.user_id)
            .endpoint(&ctx.endpoint)
            .metadata(serde_json::json!({
                "retry_after_seconds": result.retry_after_seconds,
            }))
            .success(false)
            .flag(AuditFlag::RateLimited);
        self.log(apply_context(builder, ctx));
    }

    pub fn log_data_export(&self, ctx: &SecurityContext) {
        let builder =
            AuditLogEntry::builder(AuditAction::DataExport, &ctx.user_id).endpoint(&ctx.endpoint);
        self.log(apply_context(builder, ctx));
    }

    pub fn log_data_delete(&self, ctx: &SecurityContext) {
        let builder =
            AuditLogEntry::builder(AuditAction::DataDelete, &ctx.user_id).endpoint(&ctx.endpoint);
        self.log(apply_context(builder, ctx));
    }
}

fn apply_context(mut builder: AuditEntryBuilder, ctx: &SecurityContext) -> AuditLogEntry {
    if let Some(ip) = &ctx.ip_address {
        builder = builder.ip_address(ip.clone());
    }
    if let Some(agent) = &ctx.user_agent {
        builder = builder.user_agent(agent.clone());
    }
    builder.build()
}

fn to_csv(entries: &[AuditLogEntry]) -> String {
    let mut out = String::from(
        "id,timestamp,user_id,action,endpoint,success,error_message,latency_ms,flags,metadata\n",
    );
    for entry in entries {
        let flags = entry
            .flags
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join("|");
        let row = [
            entry.id.clone(),
            entry.timestamp.to_rfc3339(),
            entry.user_id.clone(),
            entry.action.as_str().to_string(),
            entry.endpoint.clone(),
            entry.success.to_string(),
            entry.error_message.clone().unwrap_or_default(),
            entry
                .latency_ms
                .map(|l| l.to_string())
                .unwrap_or_default(),
            flags,
            entry.metadata.to_string(),
        ];
        let escaped: Vec<String> = row.iter().map(|field| csv_escape(field)).collect();
        out.push_str(&escaped.join(","));
        out.push('\n');
    }
    out
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn logger_with_store() -> (Arc<AuditLogger>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        let logger = Arc::new(AuditLogger::new(
            AuditConfig::default(),
            store.clone(),
            Arc::new(PiiRedactor::new()),
        ));
        (logger, store)
    }

    fn ctx() -> SecurityContext {
        SecurityContext {
            user_id: "user-1".to_string(),
            endpoint: "chat_message".to_string(),
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: None,
        }
    }

    #[tokio::test]
    async fn test_log_and_flush() {
        let (logger, store) = logger_with_store();
        logger.log_chat_message(&ctx(), false, 12);
        assert_eq!(logger.buffered_entries(), 1);

        assert!(logger.flush_once().await);
        assert_eq!(logger.buffered_entries(), 0);
        assert_eq!(store.audit_len(), 1);
    }

    #[tokio::test]
    async fn test_metadata_is_redacted_before_buffering() {
        let (logger, _) = logger_with_store();
        let entry = AuditLogEntry::builder(AuditAction::ChatMessage, "user-1")
            .metadata(serde_json::json!({
                "note": "contato: (11) 98765-4321, ana@example.com"
            }))
            .build();
        logger.log(entry);

        let buffered = logger.buffer.lock().front().cloned().unwrap();
        let flat = buffered.metadata.to_string();
        assert!(flat.contains("[telefone removido]"));
        assert!(flat.contains("[e-mail removido]"));
        assert!(!flat.contains("98765-4321"));
    }

    #[tokio::test]
    async fn test_hard_cap_drops_oldest_and_counts() {
        let store = Arc::new(MemoryStore::default());
        let logger = AuditLogger::new(
            AuditConfig {
                buffer_hard_cap: 5,
                ..Default::default()
            },
            store,
            Arc::new(PiiRedactor::new()),
        );
        for i in 0..8 {
            logger.log(
                AuditLogEntry::builder(AuditAction::ChatMessage, format!("user-{i}")).build(),
            );
        }
        assert_eq!(logger.buffered_entries(), 5);
        assert_eq!(logger.dropped_entries(), 3);
    }

    #[tokio::test]
    async fn test_stats_aggregation() {
        let (logger, _) = logger_with_store();
        let context = ctx();
        logger.log_chat_message(&context, true, 10);
        logger.log_chat_message(&context, false, 30);
        logger.log_content_blocked(
            &context,
            &[ContentViolation {
                kind: crate::policy::ViolationKind::Commercial,
                severity: crate::policy::Severity::High,
                description: "oferta".to_string(),
                matched_text: None,
            }],
        );

        let stats = logger.get_stats("user-1", None, None).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.by_action.get("chat_message"), Some(&2));
        assert_eq!(stats.by_flag.get("pii_detected"), Some(&1));
        assert_eq!(stats.avg_latency_ms, Some(20.0));
    }

    #[tokio::test]
    async fn test_export_json_and_csv() {
        let (logger, _) = logger_with_store();
        logger.log_chat_message(&ctx(), false, 5);

        let json = logger
            .export_for_compliance("user-1", ExportFormat::Json)
            .await
            .unwrap();
        assert!(json.trim_start().starts_with('['));
        assert!(json.contains("chat_message"));

        let csv = logger
            .export_for_compliance("user-1", ExportFormat::Csv)
            .await
            .unwrap();
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("id,timestamp"));
        assert!(lines.next().unwrap().contains("chat_message"));
    }

    #[tokio::test]
    async fn test_cleanup_returns_removed_count() {
        let (logger, _) = logger_with_store();
        logger.log_chat_message(&ctx(), false, 5);
        logger.flush_once().await;

        // Nothing is old enough yet.
        assert_eq!(logger.cleanup_old_logs().await.unwrap(), 0);
    }
}
