//! Structured one-line logging for guard events.
//!
//! Every fallback activation and enforcement decision goes through this
//! module so operators can detect degraded protection from the log
//! stream alone.

use std::time::{SystemTime, UNIX_EPOCH};

/// Security-relevant event types emitted by the middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardEvent {
    /// Rate limit enforced for a key.
    RateLimited,
    /// Storage failure made the quota guard admit a request unchecked.
    QuotaFailOpen,
    /// Crypto unavailable; vault writing flagged pass-through payloads.
    VaultDegraded,
    /// Audit flush failed and the batch was re-queued.
    AuditRequeued,
    /// Audit buffer hit its hard cap and dropped oldest entries.
    AuditDropped,
    /// A message tripped a blocking content violation.
    ContentBlocked,
    /// A message tripped an Emergency-urgency risk signal.
    RiskEmergency,
    /// A user key was rotated.
    KeyRotated,
    /// A user key was revoked.
    KeyRevoked,
}

impl GuardEvent {
    /// Get the severity level for this event.
    pub fn severity(&self) -> GuardSeverity {
        match self {
            Self::RateLimited => GuardSeverity::Info,
            Self::QuotaFailOpen => GuardSeverity::Warning,
            Self::VaultDegraded => GuardSeverity::Critical,
            Self::AuditRequeued => GuardSeverity::Warning,
            Self::AuditDropped => GuardSeverity::Critical,
            Self::ContentBlocked => GuardSeverity::Info,
            Self::RiskEmergency => GuardSeverity::Critical,
            Self::KeyRotated => GuardSeverity::Info,
            Self::KeyRevoked => GuardSeverity::Warning,
        }
    }

    /// Get a string representation of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::QuotaFailOpen => "quota_fail_open",
            Self::VaultDegraded => "vault_degraded",
            Self::AuditRequeued => "audit_requeued",
            Self::AuditDropped => "audit_dropped",
            Self::ContentBlocked => "content_blocked",
            Self::RiskEmergency => "risk_emergency",
            Self::KeyRotated => "key_rotated",
            Self::KeyRevoked => "key_revoked",
        }
    }
}

/// Severity levels for guard events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GuardSeverity {
    Info,
    Warning,
    Critical,
}

impl GuardSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
        }
    }
}

/// Log a guard event with structured key-value details.
///
/// Detail values must already be PII-free; callers pass identifiers and
/// endpoint names, never message text.
pub fn log_guard_event(event: GuardEvent, message: &str, details: &[(&str, &str)]) {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let severity = event.severity();
    let details_str = details
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ");

    let log_line = if details_str.is_empty() {
        format!("[{}] GUARD {} {}: {}", timestamp, severity.as_str(), event.as_str(), message)
    } else {
        format!(
            "[{}] GUARD {} {}: {} | {}",
            timestamp,
            severity.as_str(),
            event.as_str(),
            message,
            details_str
        )
    };

    match severity {
        GuardSeverity::Info => tracing::info!("{}", log_line),
        GuardSeverity::Warning => tracing::warn!("{}", log_line),
        GuardSeverity::Critical => tracing::error!("{}", log_line),
    }
}
