//! Shared application state for the `orgsecrets` server.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`. It holds the core services, wired to whichever
//! registries and value store the configuration selected.

use std::sync::Arc;
use std::time::Duration;

use orgsecrets_core::accounts::{AccountService, OrganizationDirectory};
use orgsecrets_core::auth::{AuthService, UserDirectory};
use orgsecrets_core::catalog::SecretCatalog;
use orgsecrets_core::coordinator::SecretCoordinator;
use orgsecrets_core::deadline::Deadline;
use orgsecrets_core::error::RegistryError;
use orgsecrets_core::memory::{
    MemoryOrganizationDirectory, MemoryQuotaLedger, MemoryRefreshRotation, MemorySecretCatalog,
    MemoryUserDirectory,
};
use orgsecrets_core::quota::QuotaLedger;
use orgsecrets_core::reconcile::{DEFAULT_GRACE_PERIOD, Reconciler};
use orgsecrets_core::token::{RefreshRotation, TokenService};
use orgsecrets_storage::ValueStore;

use crate::config::ServerConfig;

/// Cheap liveness check for the relational registry.
#[async_trait::async_trait]
pub trait Readiness: Send + Sync {
    async fn ping(&self) -> Result<(), RegistryError>;
}

/// Registry that is always reachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReady;

#[async_trait::async_trait]
impl Readiness for AlwaysReady {
    async fn ping(&self) -> Result<(), RegistryError> {
        Ok(())
    }
}

/// Every relational registry the server depends on.
#[derive(Clone)]
pub struct Registries {
    pub users: Arc<dyn UserDirectory>,
    pub organizations: Arc<dyn OrganizationDirectory>,
    pub ledger: Arc<dyn QuotaLedger>,
    pub catalog: Arc<dyn SecretCatalog>,
    pub rotation: Arc<dyn RefreshRotation>,
    pub readiness: Arc<dyn Readiness>,
}

impl Registries {
    /// Fresh in-memory registries.
    #[must_use]
    pub fn in_memory(free_tier_limit: i64) -> Self {
        Self {
            users: Arc::new(MemoryUserDirectory::new()),
            organizations: Arc::new(MemoryOrganizationDirectory::new()),
            ledger: Arc::new(MemoryQuotaLedger::new(free_tier_limit)),
            catalog: Arc::new(MemorySecretCatalog::new()),
            rotation: Arc::new(MemoryRefreshRotation::new()),
            readiness: Arc::new(AlwaysReady),
        }
    }
}

/// Shared application state passed to all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Registration, login, refresh, and profile operations.
    pub auth: AuthService,
    /// Organization creation and membership checks.
    pub accounts: AccountService,
    /// Quota counters and subscriptions.
    pub ledger: Arc<dyn QuotaLedger>,
    /// Secret lifecycle across the catalog, the ledger, and the value store.
    pub secrets: SecretCoordinator,
    /// Cross-store drift detection.
    pub reconciler: Reconciler,
    /// Registry liveness check for `/v1/health`.
    pub readiness: Arc<dyn Readiness>,
    /// Store deadline applied to each secret request.
    pub request_timeout: Duration,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

/// How long a create can hold a reservation or an unreferenced value: the
/// request deadline plus up to three compensations, never under the default.
fn orphan_grace_period(config: &ServerConfig) -> Duration {
    let worst_case = config
        .request_timeout
        .saturating_add(config.compensation_timeout.saturating_mul(3));
    worst_case.max(DEFAULT_GRACE_PERIOD)
}

impl AppState {
    /// Wire the services from registries, a value store, and configuration.
    #[must_use]
    pub fn new(config: &ServerConfig, registries: Registries, values: Arc<dyn ValueStore>) -> Self {
        let tokens = TokenService::new(
            config.jwt_secret.as_bytes(),
            chrono::Duration::from_std(config.access_ttl).unwrap_or(chrono::Duration::hours(24)),
            chrono::Duration::from_std(config.refresh_ttl).unwrap_or(chrono::Duration::days(7)),
        )
        .with_rotation(registries.rotation);

        Self {
            auth: AuthService::new(registries.users, Arc::new(tokens)),
            accounts: AccountService::new(registries.organizations),
            ledger: registries.ledger.clone(),
            secrets: SecretCoordinator::new(
                registries.catalog.clone(),
                registries.ledger.clone(),
                values.clone(),
            )
            .with_compensation_budget(config.compensation_timeout),
            reconciler: Reconciler::new(registries.catalog, registries.ledger, values)
                .with_grace_period(orphan_grace_period(config)),
            readiness: registries.readiness,
            request_timeout: config.request_timeout,
        }
    }

    /// A deadline for the current request's store calls.
    #[must_use]
    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.request_timeout)
    }
}
