//! Configuration loading from environment variables.
//!
//! All values are loaded from `MG_*` environment variables with
//! sensible defaults. Invalid values fall back to defaults without
//! crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `MG_CHAT_MAX_REQUESTS` | 20 | Chat messages per window |
//! | `MG_CHAT_WINDOW_SECS` | 3600 | Chat sliding window (secs) |
//! | `MG_CHAT_BLOCK_SECS` | 900 | Chat block duration (secs) |
//! | `MG_ONBOARDING_MAX_REQUESTS` | 5 | Onboarding completions per window |
//! | `MG_ONBOARDING_WINDOW_SECS` | 86400 | Onboarding window (secs) |
//! | `MG_QUOTA_MAX_IDLE_SECS` | 86400 | Rate-limit record idle eviction |
//! | `MG_AUDIT_BATCH_SIZE` | 50 | Audit flush batch size |
//! | `MG_AUDIT_FLUSH_SECS` | 5 | Audit flush interval (secs) |
//! | `MG_AUDIT_BUFFER_CAP` | 10000 | Audit buffer hard cap |
//! | `MG_AUDIT_RETENTION_DAYS` | 180 | Audit retention (days) |
//! | `MG_KEY_MAX_AGE_DAYS` | 90 | Key age before rotation (days) |
//! | `MG_MASTER_KEY` | (derived) | Hex-encoded 32-byte master key |
//! | `MG_RISK_THRESHOLD_LOW` | 20 | Risk level ladder: low |
//! | `MG_RISK_THRESHOLD_MEDIUM` | 40 | Risk level ladder: medium |
//! | `MG_RISK_THRESHOLD_HIGH` | 60 | Risk level ladder: high |
//! | `MG_RISK_THRESHOLD_CRITICAL` | 80 | Risk level ladder: critical |
//! | `MG_STORE_TIMEOUT_MS` | 800 | Storage operation timeout (ms) |
//! | `MG_MAINTENANCE_INTERVAL_SECS` | 86400 | Periodic job interval (secs) |
//! | `MG_AI_CREDENTIAL_ENV` | MATERNA_AI_API_KEY | Env var probed for the AI credential |
//! | `MG_RECENT_HISTORY_SIZE` | 5 | Messages kept for the repeat-spam check |
//! | `MG_LOG_FORMAT` | json | Log format (json or pretty), see `telemetry` |
//! | `MG_LOG_LEVEL` | info | Log env-filter level |
//! | `MG_LOG_FILE` | (stderr) | Optional log file path |

use std::time::Duration;

use serde::Serialize;

use crate::audit::AuditConfig;
use crate::quota::{EndpointPolicy, QuotaConfig};
use crate::risk::RiskThresholds;
use crate::vault::VaultConfig;

/// All middleware configuration.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub quota: QuotaConfig,
    pub audit: AuditConfig,
    pub vault: VaultConfig,
    pub risk_thresholds: RiskThresholds,
    pub store_timeout: Duration,
    pub maintenance_interval: Duration,
    pub ai_credential_env: String,
    pub recent_history_size: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            quota: QuotaConfig::default(),
            audit: AuditConfig::default(),
            vault: VaultConfig::default(),
            risk_thresholds: RiskThresholds::default(),
            store_timeout: Duration::from_millis(800),
            maintenance_interval: Duration::from_secs(86_400),
            ai_credential_env: "MATERNA_AI_API_KEY".to_string(),
            recent_history_size: 5,
        }
    }
}

/// Effective configuration summary (serializable, PII-free).
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub chat_max_requests: u32,
    pub chat_window_secs: u64,
    pub audit_batch_size: usize,
    pub audit_flush_secs: u64,
    pub audit_buffer_cap: usize,
    pub audit_retention_days: u64,
    pub key_max_age_days: u64,
    pub master_key_configured: bool,
    pub risk_thresholds: RiskThresholds,
    pub store_timeout_ms: u64,
    pub maintenance_interval_secs: u64,
    pub recent_history_size: usize,
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u32` env var, returning `default` on missing or invalid.
fn parse_u32(key: &str, default: u32) -> u32 {
    match std::env::var(key) {
        Ok(val) => val.parse::<u32>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u8` env var, returning `default` on missing or invalid.
fn parse_u8(key: &str, default: u8) -> u8 {
    match std::env::var(key) {
        Ok(val) => val.parse::<u8>().unwrap_or(default),
        Err(_) => default,
    }
}

fn load_quota_config() -> QuotaConfig {
    let mut config = QuotaConfig::default();

    let chat_max = parse_u32("MG_CHAT_MAX_REQUESTS", 20).max(1);
    let chat_window = parse_u64("MG_CHAT_WINDOW_SECS", 3600).max(1);
    let chat_block = parse_u64("MG_CHAT_BLOCK_SECS", 900).max(1);
    config.policies.insert(
        "chat_message".to_string(),
        EndpointPolicy {
            max_requests: chat_max,
            window: Duration::from_secs(chat_window),
            block_duration: Duration::from_secs(chat_block),
        },
    );

    let onboarding_max = parse_u32("MG_ONBOARDING_MAX_REQUESTS", 5).max(1);
    let onboarding_window = parse_u64("MG_ONBOARDING_WINDOW_SECS", 86_400).max(1);
    if let Some(policy) = config.policies.get_mut("onboarding") {
        policy.max_requests = onboarding_max;
        policy.window = Duration::from_secs(onboarding_window);
    }

    config.max_idle = Duration::from_secs(parse_u64("MG_QUOTA_MAX_IDLE_SECS", 86_400).max(3600));
    config
}

fn load_audit_config() -> AuditConfig {
    let batch_size = parse_usize("MG_AUDIT_BATCH_SIZE", 50).max(1);
    let buffer_hard_cap = parse_usize("MG_AUDIT_BUFFER_CAP", 10_000).max(batch_size);
    AuditConfig {
        batch_size,
        flush_interval: Duration::from_secs(parse_u64("MG_AUDIT_FLUSH_SECS", 5).max(1)),
        buffer_hard_cap,
        retention: Duration::from_secs(
            parse_u64("MG_AUDIT_RETENTION_DAYS", 180).max(1) * 86_400,
        ),
    }
}

fn load_vault_config() -> VaultConfig {
    let master_key = std::env::var("MG_MASTER_KEY")
        .ok()
        .and_then(|hex_key| hex::decode(hex_key.trim()).ok())
        .and_then(|bytes| <[u8; 32]>::try_from(bytes.as_slice()).ok());

    VaultConfig {
        key_max_age: Duration::from_secs(parse_u64("MG_KEY_MAX_AGE_DAYS", 90).max(1) * 86_400),
        master_key,
    }
}

fn load_risk_thresholds() -> RiskThresholds {
    let thresholds = RiskThresholds {
        low: parse_u8("MG_RISK_THRESHOLD_LOW", 20),
        medium: parse_u8("MG_RISK_THRESHOLD_MEDIUM", 40),
        high: parse_u8("MG_RISK_THRESHOLD_HIGH", 60),
        critical: parse_u8("MG_RISK_THRESHOLD_CRITICAL", 80),
    };
    // A broken ladder would make the level mapping ambiguous.
    if thresholds.is_monotonic() {
        thresholds
    } else {
        RiskThresholds::default()
    }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> GuardConfig {
    GuardConfig {
        quota: load_quota_config(),
        audit: load_audit_config(),
        vault: load_vault_config(),
        risk_thresholds: load_risk_thresholds(),
        store_timeout: Duration::from_millis(parse_u64("MG_STORE_TIMEOUT_MS", 800).clamp(50, 30_000)),
        maintenance_interval: Duration::from_secs(
            parse_u64("MG_MAINTENANCE_INTERVAL_SECS", 86_400).max(60),
        ),
        ai_credential_env: std::env::var("MG_AI_CREDENTIAL_ENV")
            .unwrap_or_else(|_| "MATERNA_AI_API_KEY".to_string()),
        recent_history_size: parse_usize("MG_RECENT_HISTORY_SIZE", 5).clamp(1, 50),
    }
}

impl GuardConfig {
    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        let chat = self
            .quota
            .policies
            .get("chat_message")
            .copied()
            .unwrap_or(self.quota.default_policy);
        EffectiveConfig {
            chat_max_requests: chat.max_requests,
            chat_window_secs: chat.window.as_secs(),
            audit_batch_size: self.audit.batch_size,
            audit_flush_secs: self.audit.flush_interval.as_secs(),
            audit_buffer_cap: self.audit.buffer_hard_cap,
            audit_retention_days: self.audit.retention.as_secs() / 86_400,
            key_max_age_days: self.vault.key_max_age.as_secs() / 86_400,
            master_key_configured: self.vault.master_key.is_some(),
            risk_thresholds: self.risk_thresholds,
            store_timeout_ms: self.store_timeout.as_millis() as u64,
            maintenance_interval_secs: self.maintenance_interval.as_secs(),
            recent_history_size: self.recent_history_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serialize env-mutating tests to avoid cross-test pollution.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "MG_CHAT_MAX_REQUESTS",
        "MG_CHAT_WINDOW_SECS",
        "MG_CHAT_BLOCK_SECS",
        "MG_ONBOARDING_MAX_REQUESTS",
        "MG_ONBOARDING_WINDOW_SECS",
        "MG_QUOTA_MAX_IDLE_SECS",
        "MG_AUDIT_BATCH_SIZE",
        "MG_AUDIT_FLUSH_SECS",
        "MG_AUDIT_BUFFER_CAP",
        "MG_AUDIT_RETENTION_DAYS",
        "MG_KEY_MAX_AGE_DAYS",
        "MG_MASTER_KEY",
        "MG_RISK_THRESHOLD_LOW",
        "MG_RISK_THRESHOLD_MEDIUM",
        "MG_RISK_THRESHOLD_HIGH",
        "MG_RISK_THRESHOLD_CRITICAL",
        "MG_STORE_TIMEOUT_MS",
        "MG_MAINTENANCE_INTERVAL_SECS",
        "MG_AI_CREDENTIAL_ENV",
        "MG_RECENT_HISTORY_SIZE",
    ];

    fn clear_env_vars() {
        for k in ENV_KEYS {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn test_defaults_are_sensible() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let cfg = load();
        let chat = cfg.quota.policies.get("chat_message").unwrap();
        assert_eq!(chat.max_requests, 20);
        assert_eq!(chat.window.as_secs(), 3600);
        assert_eq!(cfg.audit.batch_size, 50);
        assert_eq!(cfg.audit.retention.as_secs(), 180 * 86_400);
        assert_eq!(cfg.vault.key_max_age.as_secs(), 90 * 86_400);
        assert!(cfg.vault.master_key.is_none());
        assert_eq!(cfg.risk_thresholds.critical, 80);
        assert_eq!(cfg.store_timeout.as_millis(), 800);
        assert_eq!(cfg.recent_history_size, 5);
    }

    #[test]
    fn test_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("MG_CHAT_MAX_REQUESTS", "30");
        std::env::set_var("MG_AUDIT_BATCH_SIZE", "100");
        std::env::set_var("MG_STORE_TIMEOUT_MS", "1500");
        let cfg = load();
        assert_eq!(
            cfg.quota.policies.get("chat_message").unwrap().max_requests,
            30
        );
        assert_eq!(cfg.audit.batch_size, 100);
        assert_eq!(cfg.store_timeout.as_millis(), 1500);
        clear_env_vars();
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("MG_CHAT_MAX_REQUESTS", "abc");
        std::env::set_var("MG_MASTER_KEY", "not-hex");
        let cfg = load();
        assert_eq!(
            cfg.quota.policies.get("chat_message").unwrap().max_requests,
            20
        );
        assert!(cfg.vault.master_key.is_none());
        clear_env_vars();
    }

    #[test]
    fn test_master_key_parses_hex() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("MG_MASTER_KEY", "11".repeat(32));
        let cfg = load();
        assert_eq!(cfg.vault.master_key, Some([0x11u8; 32]));
        clear_env_vars();
    }

    #[test]
    fn test_non_monotonic_thresholds_fall_back() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("MG_RISK_THRESHOLD_LOW", "90");
        let cfg = load();
        assert_eq!(cfg.risk_thresholds.low, 20);
        clear_env_vars();
    }

    #[test]
    fn test_effective_config_summary() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let cfg = load();
        let eff = cfg.effective_config();
        assert_eq!(eff.chat_max_requests, 20);
        assert_eq!(eff.audit_retention_days, 180);
        assert_eq!(eff.key_max_age_days, 90);
        assert!(!eff.master_key_configured);
        assert!(eff.store_timeout_ms >= 50);
    }
}
