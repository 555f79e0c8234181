//! Background maintenance worker.
//!
//! On every tick the worker sweeps each organization for drift between the
//! secret catalog, the value store and the quota ledger, then purges expired
//! refresh-token rotation records. If the registry is unreachable the
//! organization listing is retried with exponential backoff (1s, 2s, 4s)
//! before giving up on that tick. A consecutive-failure counter escalates
//! log severity so persistent outages stand out from transient blips.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use orgsecrets_core::error::RegistryError;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::state::AppState;

/// Maximum retries per tick when the registry is unreachable.
const MAX_RETRIES: u32 = 3;

/// Consecutive failed ticks before failures are logged at `error`.
const ESCALATE_AFTER: u32 = 5;

/// Outcome of one maintenance tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub organizations: usize,
    pub drifted: usize,
    pub failed: usize,
    pub rotation_records_purged: u64,
}

/// Run `op` with exponential backoff. Returns:
/// - `Ok(Some(value))` on success
/// - `Ok(None)` if shutdown was signalled during a backoff
/// - `Err(last_error)` once all retries are exhausted
async fn retry<T, F, Fut>(
    what: &'static str,
    shutdown: &mut watch::Receiver<bool>,
    mut op: F,
) -> Result<Option<T>, RegistryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RegistryError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(Some(value)),
            Err(e) if attempt >= MAX_RETRIES => return Err(e),
            Err(e) => {
                let backoff = Duration::from_secs(1u64 << attempt);
                attempt = attempt.saturating_add(1);
                debug!(
                    what,
                    attempt,
                    max = MAX_RETRIES.saturating_add(1),
                    backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "maintenance step failed, retrying"
                );
                tokio::select! {
                    () = tokio::time::sleep(backoff) => {}
                    _ = shutdown.changed() => return Ok(None),
                }
            }
        }
    }
}

/// Run one maintenance pass.
///
/// Returns `Ok(None)` if shutdown was requested mid-pass.
///
/// # Errors
///
/// Returns the last [`RegistryError`] if the organization listing keeps
/// failing. Per-organization sweep failures are counted, not returned.
pub async fn run_once(
    state: &AppState,
    repair: bool,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<Option<TickSummary>, RegistryError> {
    let directory = state.accounts.directory();
    let Some(organization_ids) = retry("list organizations", shutdown, || {
        directory.list_organization_ids()
    })
    .await?
    else {
        return Ok(None);
    };

    let mut summary = TickSummary {
        organizations: organization_ids.len(),
        ..TickSummary::default()
    };

    for organization_id in organization_ids {
        match state
            .reconciler
            .sweep_organization(organization_id, repair)
            .await
        {
            Ok(report) if report.is_consistent() => {}
            Ok(_) => summary.drifted = summary.drifted.saturating_add(1),
            Err(e) => {
                summary.failed = summary.failed.saturating_add(1);
                warn!(organization_id = %organization_id, error = %e, "reconciliation sweep failed");
            }
        }
    }

    match state.auth.tokens().purge_consumed().await {
        Ok(purged) => summary.rotation_records_purged = purged,
        Err(e) => warn!(error = %e, "failed to purge consumed refresh tokens"),
    }

    Ok(Some(summary))
}

/// Run maintenance every `interval` until `shutdown` fires.
pub async fn worker(
    state: Arc<AppState>,
    interval: Duration,
    repair: bool,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    let mut consecutive_failures: u32 = 0;
    info!(interval_secs = interval.as_secs(), repair, "maintenance worker started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match run_once(&state, repair, &mut shutdown).await {
                    Ok(None) => {
                        info!("maintenance worker shutting down");
                        return;
                    }
                    Ok(Some(summary)) => {
                        consecutive_failures = 0;
                        info!(
                            organizations = summary.organizations,
                            drifted = summary.drifted,
                            failed = summary.failed,
                            purged = summary.rotation_records_purged,
                            "maintenance tick complete"
                        );
                    }
                    Err(last_err) => {
                        consecutive_failures = consecutive_failures.saturating_add(1);
                        if consecutive_failures >= ESCALATE_AFTER {
                            error!(
                                error = %last_err,
                                consecutive_failures,
                                "maintenance persistently failing, registry may be down"
                            );
                        } else {
                            warn!(
                                error = %last_err,
                                consecutive_failures,
                                retries = MAX_RETRIES,
                                "maintenance failed after retries, will retry next tick"
                            );
                        }
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("maintenance worker shutting down");
                return;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use orgsecrets_core::models::NewSecret;
    use orgsecrets_storage::{MemoryStore, SecretFields, ValueStore};
    use uuid::Uuid;

    use super::*;
    use crate::config::ServerConfig;
    use crate::state::Registries;

    fn state(values: MemoryStore) -> AppState {
        let config = ServerConfig::from_lookup(|name| {
            (name == "ORGSECRETS_JWT_SECRET").then(|| "x".repeat(32))
        })
        .unwrap();
        AppState::new(&config, Registries::in_memory(5), Arc::new(values))
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_after_max_retries() {
        let (_tx, mut rx) = watch::channel(false);
        let calls = AtomicU32::new(0);
        let result: Result<Option<()>, _> = retry("test", &mut rx, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(RegistryError::Unavailable {
                    reason: "down".to_owned(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_RETRIES + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_stops_on_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        let result: Result<Option<()>, _> = retry("test", &mut rx, || async {
            Err(RegistryError::Unavailable {
                reason: "down".to_owned(),
            })
        })
        .await;
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn tick_sweeps_every_organization() {
        let values = MemoryStore::new();
        let state = state(values.clone());
        let (_tx, mut rx) = watch::channel(false);

        let owner = Uuid::new_v4();
        let clean = state
            .accounts
            .create_organization(owner, "clean", "")
            .await
            .unwrap();
        let drifted = state
            .accounts
            .create_organization(owner, "drifted", "")
            .await
            .unwrap();

        let scope = orgsecrets_core::models::Scope::new(clean.id, Uuid::new_v4(), "dev").unwrap();
        state
            .secrets
            .create(
                NewSecret {
                    path: scope.secret("A").unwrap(),
                    value: "v".to_owned(),
                    description: String::new(),
                    created_by: owner,
                },
                state.deadline(),
            )
            .await
            .unwrap();

        let orphan = format!("{}/{}/dev/ORPHAN", drifted.id, Uuid::new_v4());
        values
            .put(
                &orphan,
                &SecretFields {
                    value: "o".to_owned(),
                    created_at: 0,
                    created_by: String::new(),
                    description: String::new(),
                },
            )
            .await
            .unwrap();

        let summary = run_once(&state, true, &mut rx).await.unwrap().unwrap();
        assert_eq!(summary.organizations, 2);
        assert_eq!(summary.drifted, 1);
        assert_eq!(summary.failed, 0);
        assert!(values.get(&orphan).await.unwrap().is_none());
    }
}
