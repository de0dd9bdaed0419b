//! Periodic maintenance jobs.
//!
//! One background loop runs the three sweeps on a schedule: rate-limit
//! record eviction, audit retention, and key rotation for keys past
//! their maximum age. Each sweep is independent; a failing one logs a
//! warning and the others still run.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::audit::AuditLogger;
use crate::quota::QuotaGuard;
use crate::vault::KeyVault;

/// Outcome of one maintenance cycle, for operator visibility.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaintenanceSummary {
    pub rate_limit_records_evicted: u64,
    pub audit_entries_purged: u64,
    pub keys_rotated: u64,
    pub errors: Vec<String>,
}

/// Run one full cycle of the periodic jobs.
pub async fn run_maintenance_cycle(
    quota: &QuotaGuard,
    audit: &AuditLogger,
    vault: &KeyVault,
) -> MaintenanceSummary {
    let mut summary = MaintenanceSummary::default();

    match quota.cleanup().await {
        Ok(count) => summary.rate_limit_records_evicted = count,
        Err(e) => summary.errors.push(format!("rate limit sweep: {e}")),
    }

    match audit.cleanup_old_logs().await {
        Ok(count) => summary.audit_entries_purged = count,
        Err(e) => summary.errors.push(format!("audit retention: {e}")),
    }

    match vault.users_needing_rotation().await {
        Ok(users) => {
            for user_id in users {
                match vault.rotate(&user_id).await {
                    Ok(_) => summary.keys_rotated += 1,
                    Err(e) => summary.errors.push(format!("rotate {user_id}: {e}")),
                }
            }
        }
        Err(e) => summary.errors.push(format!("rotation sweep: {e}")),
    }

    if summary.errors.is_empty() {
        tracing::info!(
            evicted = summary.rate_limit_records_evicted,
            purged = summary.audit_entries_purged,
            rotated = summary.keys_rotated,
            "maintenance cycle complete"
        );
    } else {
        tracing::warn!(errors = ?summary.errors, "maintenance cycle completed with errors");
    }

    summary
}

/// Spawn the periodic maintenance loop. Exits when `stop` flips true;
/// a cycle already underway finishes first.
pub fn spawn_maintenance(
    quota: Arc<QuotaGuard>,
    audit: Arc<AuditLogger>,
    vault: Arc<KeyVault>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup is quiet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    run_maintenance_cycle(&quota, &audit, &vault).await;
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        return;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditConfig;
    use crate::quota::QuotaConfig;
    use crate::redact::PiiRedactor;
    use crate::store::{MemoryStore, SecurityStore};
    use crate::vault::VaultConfig;

    #[tokio::test]
    async fn test_cycle_runs_all_sweeps() {
        let store: Arc<dyn SecurityStore> = Arc::new(MemoryStore::default());
        let quota = QuotaGuard::new(QuotaConfig::default(), store.clone());
        let audit = AuditLogger::new(
            AuditConfig::default(),
            store.clone(),
            Arc::new(PiiRedactor::new()),
        );
        let vault = KeyVault::new(VaultConfig::default(), store.clone());

        quota.check("user-1", "chat_message").await;
        let summary = run_maintenance_cycle(&quota, &audit, &vault).await;

        assert!(summary.errors.is_empty());
        // The fresh record is inside the idle window, nothing evicted.
        assert_eq!(summary.rate_limit_records_evicted, 0);
        assert_eq!(summary.keys_rotated, 0);
    }

    #[tokio::test]
    async fn test_rotation_sweep_rotates_old_keys() {
        let store: Arc<dyn SecurityStore> = Arc::new(MemoryStore::default());
        let quota = QuotaGuard::new(QuotaConfig::default(), store.clone());
        let audit = AuditLogger::new(
            AuditConfig::default(),
            store.clone(),
            Arc::new(PiiRedactor::new()),
        );
        // Zero max age: any key immediately needs rotation.
        let vault = KeyVault::new(
            VaultConfig {
                key_max_age: Duration::from_secs(0),
                ..Default::default()
            },
            store.clone(),
        );

        vault.encrypt("user-1", "mensagem").await.unwrap();
        let summary = run_maintenance_cycle(&quota, &audit, &vault).await;
        assert_eq!(summary.keys_rotated, 1);
    }
}
