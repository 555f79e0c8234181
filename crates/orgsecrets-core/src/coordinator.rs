//! Secret lifecycle coordination across the quota ledger, the secret
//! catalog and the value store.
//!
//! The three stores fail independently and no transaction spans them, so
//! every multi-store write is a short saga:
//!
//! ```text
//! create:  lookup ─► reserve quota ─► claim value ─► insert metadata
//!                        │                 │                │
//!                        ▼                 ▼                ▼
//!                 QuotaExceeded      occupied: exists   delete row (if landed)
//!                                    failed: discard    discard value
//!                                    release slot       release slot
//!
//! delete:  lookup ─► delete value ─► delete metadata ─► release slot
//! ```
//!
//! Metadata is authoritative: reads start at the catalog and never consult
//! the value store for a path without a row. Compensating actions run under
//! their own short budget so they still execute after the caller's deadline
//! has passed. A compensation that fails is logged at `error` and left for
//! the [`Reconciler`](crate::reconcile::Reconciler).

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orgsecrets_storage::{SecretFields, ValueStore};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::catalog::SecretCatalog;
use crate::deadline::Deadline;
use crate::error::{RegistryError, SecretError};
use crate::models::{NewSecret, Scope, Secret, SecretMetadata, SecretPath, SecretUpdate};
use crate::quota::{QuotaLedger, Reservation};

/// Default time allowed for each compensating action.
pub const DEFAULT_COMPENSATION_BUDGET: Duration = Duration::from_secs(5);

/// Metadata-only view of one environment.
#[derive(Debug, Clone, Serialize)]
pub struct SecretListing {
    pub secrets: Vec<Secret>,
    /// Keys that could not be resolved and were left out.
    pub skipped: usize,
}

/// Map a registry failure to a secret error, naming the organization when
/// the registry reports it missing.
fn registry_error(organization_id: Uuid, err: RegistryError) -> SecretError {
    match err {
        RegistryError::NotFound {
            entity: "organization",
        } => SecretError::OrganizationNotFound { organization_id },
        other => SecretError::from(other),
    }
}

/// Orchestrates create, read, update, list and delete across the stores.
#[derive(Clone)]
pub struct SecretCoordinator {
    catalog: Arc<dyn SecretCatalog>,
    ledger: Arc<dyn QuotaLedger>,
    values: Arc<dyn ValueStore>,
    compensation_budget: Duration,
}

impl std::fmt::Debug for SecretCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCoordinator")
            .field("compensation_budget", &self.compensation_budget)
            .finish_non_exhaustive()
    }
}

impl SecretCoordinator {
    #[must_use]
    pub fn new(
        catalog: Arc<dyn SecretCatalog>,
        ledger: Arc<dyn QuotaLedger>,
        values: Arc<dyn ValueStore>,
    ) -> Self {
        Self {
            catalog,
            ledger,
            values,
            compensation_budget: DEFAULT_COMPENSATION_BUDGET,
        }
    }

    #[must_use]
    pub fn with_compensation_budget(mut self, budget: Duration) -> Self {
        self.compensation_budget = budget;
        self
    }

    /// Create a secret.
    ///
    /// Succeeds only once the quota slot, the value and the metadata row are
    /// all in place. On failure every step already taken is undone.
    ///
    /// # Errors
    ///
    /// - [`SecretError::SecretExists`] if the path is taken
    /// - [`SecretError::QuotaExceeded`] at the plan limit
    /// - [`SecretError::DeadlineExceeded`] if `deadline` passes
    /// - [`SecretError::StoreUnavailable`] if a store fails
    #[instrument(skip_all, fields(path = %new.path))]
    pub async fn create(&self, new: NewSecret, deadline: Deadline) -> Result<Secret, SecretError> {
        let path = new.path.clone();
        let key = path.to_string();
        let org = path.organization_id();

        if self.lookup(&path, deadline).await?.is_some() {
            return Err(SecretError::SecretExists { path: key });
        }

        let reservation = match deadline
            .run("quota reservation", self.ledger.try_reserve(org))
            .await
        {
            Ok(outcome) => outcome.map_err(|e| registry_error(org, e))?,
            Err(err) => {
                warn!(organization_id = %org, "quota reservation outcome unknown, counter may drift until reconciled");
                return Err(err);
            }
        };
        match reservation {
            Reservation::Denied { count, limit } => {
                info!(organization_id = %org, count, limit, "secret quota exceeded");
                return Err(SecretError::QuotaExceeded {
                    organization_id: org,
                    limit,
                });
            }
            Reservation::Granted { count } => {
                debug!(organization_id = %org, count, "quota slot reserved");
            }
        }

        let now = Utc::now();
        let fields = SecretFields {
            value: new.value.clone(),
            created_at: now.timestamp(),
            created_by: new.created_by.to_string(),
            description: new.description.clone(),
        };
        let claimed = deadline
            .run("value write", self.values.put_if_absent(&key, &fields))
            .await
            .and_then(|r| r.map_err(SecretError::from));
        match claimed {
            Ok(true) => {}
            Ok(false) => {
                // Another create holds the path, or an orphan awaits the reconciler.
                info!("value already present at path, create refused");
                self.release(org, &key).await;
                return Err(SecretError::SecretExists { path: key });
            }
            Err(err) => {
                warn!(error = %err, "value write failed, rolling back");
                self.discard_own_value(&key, &fields).await;
                self.release(org, &key).await;
                return Err(err);
            }
        }

        let metadata = SecretMetadata {
            id: Uuid::new_v4(),
            name: path.name().to_owned(),
            description: new.description,
            organization_id: org,
            project_id: path.project_id(),
            environment: path.environment().to_owned(),
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
            version: 1,
        };

        match deadline
            .run("metadata insert", self.catalog.create(&metadata))
            .await
        {
            Ok(Ok(())) => {
                info!(secret_id = %metadata.id, "secret created");
                Ok(Secret::from_metadata(metadata, Some(new.value)))
            }
            Ok(Err(RegistryError::Conflict { .. })) => {
                // A row appeared after our value claim, e.g. a delete still in
                // flight. The value we wrote is ours to remove.
                warn!("metadata row already present, rolling back");
                self.discard_value(&key).await;
                self.release(org, &key).await;
                Err(SecretError::SecretExists { path: key })
            }
            Ok(Err(e)) => {
                let err = registry_error(org, e);
                warn!(error = %err, "metadata insert failed, rolling back");
                self.roll_back_create(&metadata, &key).await;
                Err(err)
            }
            Err(err) => {
                warn!(error = %err, "metadata insert timed out, rolling back");
                self.roll_back_create(&metadata, &key).await;
                Err(err)
            }
        }
    }

    /// Read a secret including its value.
    ///
    /// # Errors
    ///
    /// - [`SecretError::SecretNotFound`] if no metadata row exists
    /// - [`SecretError::InconsistentState`] if the row exists but the value
    ///   does not
    #[instrument(skip_all, fields(path = %path))]
    pub async fn read(&self, path: &SecretPath, deadline: Deadline) -> Result<Secret, SecretError> {
        let key = path.to_string();
        let Some(metadata) = self.lookup(path, deadline).await? else {
            return Err(SecretError::SecretNotFound { path: key });
        };

        let fields = deadline
            .run("value read", self.values.get(&key))
            .await??
            .ok_or_else(|| {
                error!(secret_id = %metadata.id, "metadata present but value missing");
                SecretError::InconsistentState {
                    path: key.clone(),
                    detail: "metadata exists but the value is missing".to_owned(),
                }
            })?;

        Ok(Secret::from_metadata(metadata, Some(fields.value)))
    }

    /// Replace a secret's value and optionally its description, bumping the
    /// version.
    ///
    /// If the metadata update fails after the new value is written, the
    /// previous value is restored.
    ///
    /// # Errors
    ///
    /// - [`SecretError::SecretNotFound`] if no metadata row exists
    /// - [`SecretError::InconsistentState`] if the current value is missing
    #[instrument(skip_all, fields(path = %update.path))]
    pub async fn update(
        &self,
        update: SecretUpdate,
        deadline: Deadline,
    ) -> Result<Secret, SecretError> {
        let key = update.path.to_string();
        let org = update.path.organization_id();
        let Some(mut metadata) = self.lookup(&update.path, deadline).await? else {
            return Err(SecretError::SecretNotFound { path: key });
        };

        let previous = deadline
            .run("value read", self.values.get(&key))
            .await??
            .ok_or_else(|| SecretError::InconsistentState {
                path: key.clone(),
                detail: "metadata exists but the value is missing".to_owned(),
            })?;

        if let Some(description) = update.description {
            metadata.description = description;
        }
        let fields = SecretFields {
            value: update.value.clone(),
            created_at: previous.created_at,
            created_by: previous.created_by.clone(),
            description: metadata.description.clone(),
        };
        deadline
            .run("value write", self.values.put(&key, &fields))
            .await??;

        match deadline
            .run("metadata update", self.catalog.update(&metadata))
            .await
        {
            Ok(Ok(stored)) => {
                info!(secret_id = %stored.id, version = stored.version, "secret updated");
                Ok(Secret::from_metadata(stored, Some(update.value)))
            }
            Ok(Err(RegistryError::NotFound { .. })) => {
                // Deleted concurrently; our write must not leave an orphan.
                warn!("secret deleted during update, discarding value");
                self.discard_value(&key).await;
                Err(SecretError::SecretNotFound { path: key })
            }
            Ok(Err(e)) => {
                let err = registry_error(org, e);
                warn!(error = %err, "metadata update failed, restoring previous value");
                self.restore_value(&key, &previous).await;
                Err(err)
            }
            Err(err) => {
                warn!(error = %err, "metadata update timed out, restoring previous value");
                self.restore_value(&key, &previous).await;
                Err(err)
            }
        }
    }

    /// List the secrets of one environment without their values.
    ///
    /// Keys are enumerated from the value store and each is resolved through
    /// [`read`](Self::read). Keys that fail to resolve are skipped, counted
    /// in [`SecretListing::skipped`] and logged.
    ///
    /// # Errors
    ///
    /// Fails only if the value store listing itself fails or the deadline
    /// passes.
    #[instrument(skip_all, fields(scope = %scope))]
    pub async fn list(&self, scope: &Scope, deadline: Deadline) -> Result<SecretListing, SecretError> {
        let prefix = scope.to_string();
        let keys = deadline
            .run("value list", self.values.list_keys(&prefix))
            .await??;

        let mut secrets = Vec::with_capacity(keys.len());
        let mut skipped = 0usize;
        for key in keys {
            let resolved = match scope.secret(key.as_str()) {
                Ok(path) => self.read(&path, deadline).await,
                Err(err) => Err(err),
            };
            match resolved {
                Ok(secret) => secrets.push(secret.without_value()),
                Err(err @ SecretError::DeadlineExceeded { .. }) => return Err(err),
                Err(err) => {
                    skipped = skipped.saturating_add(1);
                    warn!(key = %key, error = %err, "skipping unresolvable key in listing");
                }
            }
        }

        Ok(SecretListing { secrets, skipped })
    }

    /// Delete a secret. Deleting an absent path succeeds without touching
    /// the quota.
    ///
    /// # Errors
    ///
    /// [`SecretError::StoreUnavailable`] or
    /// [`SecretError::DeadlineExceeded`] if a step fails. A retry resumes
    /// where the failed attempt stopped.
    #[instrument(skip_all, fields(path = %path))]
    pub async fn delete(&self, path: &SecretPath, deadline: Deadline) -> Result<(), SecretError> {
        let key = path.to_string();
        let org = path.organization_id();
        let Some(metadata) = self.lookup(path, deadline).await? else {
            debug!("delete of absent secret is a no-op");
            return Ok(());
        };

        deadline
            .run("value delete", self.values.delete(&key))
            .await??;

        let removed = deadline
            .run("metadata delete", self.catalog.delete_by_id(metadata.id))
            .await
            .and_then(|r| r.map_err(|e| registry_error(org, e)))
            .inspect_err(|e| {
                error!(secret_id = %metadata.id, error = %e, "value deleted but metadata delete failed");
            })?;

        // A concurrent delete already released the slot.
        if removed {
            deadline
                .run("quota release", self.ledger.decrement(org))
                .await
                .and_then(|r| r.map_err(|e| registry_error(org, e)))
                .inspect_err(|e| {
                    warn!(organization_id = %org, error = %e, "secret deleted but counter not decremented");
                })?;
        }

        info!(secret_id = %metadata.id, "secret deleted");
        Ok(())
    }

    async fn lookup(
        &self,
        path: &SecretPath,
        deadline: Deadline,
    ) -> Result<Option<SecretMetadata>, SecretError> {
        deadline
            .run("metadata lookup", self.catalog.get_by_path(path))
            .await?
            .map_err(|e| registry_error(path.organization_id(), e))
    }

    // ── Compensation ─────────────────────────────────────────────────

    async fn compensate<F, T, E>(&self, step: &'static str, path: &str, fut: F)
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        match tokio::time::timeout(self.compensation_budget, fut).await {
            Ok(Ok(_)) => debug!(step, path, "compensation applied"),
            Ok(Err(e)) => {
                error!(step, path, error = %e, "compensation failed, reconciliation required");
            }
            Err(_) => error!(step, path, "compensation timed out, reconciliation required"),
        }
    }

    async fn discard_value(&self, key: &str) {
        self.compensate("discard value", key, self.values.delete(key))
            .await;
    }

    /// Delete the value at `key` only if it is the payload this request
    /// wrote. Used when a create-only write failed with an unknown outcome
    /// and the path may belong to someone else.
    async fn discard_own_value(&self, key: &str, ours: &SecretFields) {
        match tokio::time::timeout(self.compensation_budget, self.values.get(key)).await {
            Ok(Ok(Some(found))) if found == *ours => self.discard_value(key).await,
            Ok(Ok(_)) => debug!(path = key, "no value of ours to discard"),
            Ok(Err(e)) => {
                error!(path = key, error = %e, "could not inspect value after failed write, reconciliation required");
            }
            Err(_) => error!(path = key, "value inspection timed out, reconciliation required"),
        }
    }

    async fn restore_value(&self, key: &str, previous: &SecretFields) {
        self.compensate("restore value", key, self.values.put(key, previous))
            .await;
    }

    async fn release(&self, organization_id: Uuid, key: &str) {
        self.compensate("release quota", key, self.ledger.decrement(organization_id))
            .await;
    }

    async fn roll_back_create(&self, metadata: &SecretMetadata, key: &str) {
        self.compensate("remove metadata", key, self.catalog.delete_by_id(metadata.id))
            .await;
        self.discard_value(key).await;
        self.release(metadata.organization_id, key).await;
    }
}
