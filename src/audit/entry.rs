//! Audit entry types, builder, and query filter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Security-relevant action types recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ChatMessage,
    MessageBlocked,
    RiskDetected,
    RateLimitHit,
    DataExport,
    DataDelete,
    KeyRotated,
    KeyRevoked,
    QuotaCleared,
    HealthCheck,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatMessage => "chat_message",
            Self::MessageBlocked => "message_blocked",
            Self::RiskDetected => "risk_detected",
            Self::RateLimitHit => "rate_limit_hit",
            Self::DataExport => "data_export",
            Self::DataDelete => "data_delete",
            Self::KeyRotated => "key_rotated",
            Self::KeyRevoked => "key_revoked",
            Self::QuotaCleared => "quota_cleared",
            Self::HealthCheck => "health_check",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flags marking what the security layer saw for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditFlag {
    PiiDetected,
    RiskDetected,
    ContentBlocked,
    RateLimited,
}

impl AuditFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PiiDetected => "pii_detected",
            Self::RiskDetected => "risk_detected",
            Self::ContentBlocked => "content_blocked",
            Self::RateLimited => "rate_limited",
        }
    }
}

/// One append-only audit row. Metadata is PII-free by construction: the
/// logger redacts it before the entry ever reaches the buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub action: AuditAction,
    pub endpoint: String,
    pub metadata: serde_json::Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub latency_ms: Option<u64>,
    pub flags: Vec<AuditFlag>,
}

impl AuditLogEntry {
    /// Start building an entry; action and user are always required.
    pub fn builder(action: AuditAction, user_id: impl Into<String>) -> AuditEntryBuilder {
        AuditEntryBuilder {
            action,
            user_id: user_id.into(),
            endpoint: String::new(),
            metadata: serde_json::Value::Object(serde_json::Map::new()),
            ip_address: None,
            user_agent: None,
            success: true,
            error_message: None,
            latency_ms: None,
            flags: Vec::new(),
        }
    }
}

/// Builder for audit entries.
#[derive(Debug)]
pub struct AuditEntryBuilder {
    action: AuditAction,
    user_id: String,
    endpoint: String,
    metadata: serde_json::Value,
    ip_address: Option<String>,
    user_agent: Option<String>,
    success: bool,
    error_message: Option<String>,
    latency_ms: Option<u64>,
    flags: Vec<AuditFlag>,
}

impl AuditEntryBuilder {
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn latency_ms(mut self, latency: u64) -> Self {
        self.latency_ms = Some(latency);
        self
    }

    pub fn flag(mut self, flag: AuditFlag) -> Self {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
        self
    }

    pub fn build(self) -> AuditLogEntry {
        AuditLogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            user_id: self.user_id,
            action: self.action,
            endpoint: self.endpoint,
            metadata: self.metadata,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            success: self.success,
            error_message: self.error_message,
            latency_ms: self.latency_ms,
            flags: self.flags,
        }
    }
}

/// Filter for audit queries.
#[derive(Debug, Clone)]
pub struct AuditQuery {
    pub user_id: String,
    pub action: Option<AuditAction>,
    pub flag: Option<AuditFlag>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub success: Option<bool>,
    pub limit: usize,
}

impl AuditQuery {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            action: None,
            flag: None,
            since: None,
            until: None,
            success: None,
            limit: 100,
        }
    }

    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        if entry.user_id != self.user_id {
            return false;
        }
        if let Some(action) = self.action {
            if entry.action != action {
                return false;
            }
        }
        if let Some(flag) = self.flag {
            if !entry.flags.contains(&flag) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.timestamp > until {
                return false;
            }
        }
        if let Some(success) = self.success {
            if entry.success != success {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let entry = AuditLogEntry::builder(AuditAction::ChatMessage, "user-1")
            .endpoint("chat_message")
            .build();
        assert_eq!(entry.action, AuditAction::ChatMessage);
        assert_eq!(entry.user_id, "user-1");
        assert!(entry.success);
        assert!(entry.flags.is_empty());
        assert_eq!(entry.id.len(), 36);
    }

    #[test]
    fn test_builder_deduplicates_flags() {
        let entry = AuditLogEntry::builder(AuditAction::ChatMessage, "user-1")
            .flag(AuditFlag::PiiDetected)
            .flag(AuditFlag::PiiDetected)
            .build();
        assert_eq!(entry.flags.len(), 1);
    }

    #[test]
    fn test_query_matches() {
        let entry = AuditLogEntry::builder(AuditAction::RiskDetected, "user-1")
            .flag(AuditFlag::RiskDetected)
            .build();

        let mut query = AuditQuery::for_user("user-1");
        assert!(query.matches(&entry));

        query.action = Some(AuditAction::ChatMessage);
        assert!(!query.matches(&entry));

        query.action = Some(AuditAction::RiskDetected);
        query.flag = Some(AuditFlag::RiskDetected);
        assert!(query.matches(&entry));

        query.success = Some(false);
        assert!(!query.matches(&entry));
    }
}
