//! Reconciliation between the secret catalog, the value store and the
//! quota ledger.
//!
//! A sweep walks the value-store tree of one organization
//! (`{org}/{project}/{environment}/{name}`) and compares it with the
//! organization's metadata rows:
//!
//! - a value with no row is an orphan and is deleted on repair, unless it
//!   was written within the grace period; such a value may belong to a
//!   create that has not inserted its row yet
//! - a row with no value is reported but never repaired; reads of that path
//!   keep failing with `InconsistentState` until an operator intervenes
//! - a recorded secret count below the row count is raised at once on
//!   repair; a count above it is lowered only after two sweeps at least a
//!   grace period apart saw the same counts, since a reservation or release
//!   still in flight looks exactly like drift
//!
//! Count corrections are compare-and-set against the count the sweep read.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orgsecrets_storage::ValueStore;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::SecretCatalog;
use crate::error::SecretError;
use crate::quota::QuotaLedger;

/// Default age below which an unreferenced value is left alone.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(60);

/// Findings of one organization sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub organization_id: Uuid,
    /// Value-store paths with no metadata row.
    pub orphaned_values: Vec<String>,
    /// Unreferenced values younger than the grace period. Not drift.
    pub pending_values: Vec<String>,
    /// Metadata paths with no stored value.
    pub missing_values: Vec<String>,
    /// Secret count held by the quota ledger before the sweep.
    pub recorded_count: i64,
    /// Number of metadata rows.
    pub live_count: i64,
    /// Whether repairs were requested.
    pub repair: bool,
    /// Orphans actually deleted.
    pub orphans_removed: usize,
    /// Whether the recorded count was reset.
    pub count_corrected: bool,
    /// A lower count awaits confirmation by a later sweep.
    pub count_correction_deferred: bool,
}

impl ReconcileReport {
    /// True when nothing disagrees.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.orphaned_values.is_empty()
            && self.missing_values.is_empty()
            && self.recorded_count == self.live_count
    }
}

/// Counts seen by an earlier sweep that wanted to lower the recorded count.
#[derive(Debug, Clone, Copy)]
struct Observation {
    recorded: i64,
    live: i64,
    seen_at: Instant,
}

/// Sweeps organizations for cross-store drift.
#[derive(Clone)]
pub struct Reconciler {
    catalog: Arc<dyn SecretCatalog>,
    ledger: Arc<dyn QuotaLedger>,
    values: Arc<dyn ValueStore>,
    grace: Duration,
    observations: Arc<Mutex<HashMap<Uuid, Observation>>>,
}

impl Reconciler {
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
            grace: DEFAULT_GRACE_PERIOD,
            observations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Must exceed the longest a create can hold a reservation or an
    /// unreferenced value: the request deadline plus its compensations.
    #[must_use]
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Collect every leaf key under `{organization_id}/`.
    async fn stored_paths(&self, organization_id: Uuid) -> Result<BTreeSet<String>, SecretError> {
        let mut leaves = BTreeSet::new();
        let mut folders = vec![(format!("{organization_id}/"), 0u8)];

        // Depth 0 lists projects, 1 environments, 2 names.
        while let Some((folder, depth)) = folders.pop() {
            for child in self.values.list_keys(&folder).await? {
                match (child.strip_suffix('/'), depth) {
                    (Some(dir), 0 | 1) => folders.push((format!("{folder}{dir}/"), depth + 1)),
                    (None, 2) => {
                        leaves.insert(format!("{folder}{child}"));
                    }
                    _ => warn!(folder = %folder, child = %child, "unexpected entry in value store tree"),
                }
            }
        }
        Ok(leaves)
    }

    /// Split unreferenced paths into settled orphans and recent writes.
    async fn classify_unreferenced(
        &self,
        candidates: Vec<String>,
    ) -> Result<(Vec<String>, Vec<String>), SecretError> {
        let grace = i64::try_from(self.grace.as_secs()).unwrap_or(i64::MAX);
        let cutoff = Utc::now().timestamp().saturating_sub(grace);
        let mut orphaned = Vec::new();
        let mut pending = Vec::new();
        for path in candidates {
            match self.values.get(&path).await? {
                Some(fields) if fields.created_at > cutoff => pending.push(path),
                Some(_) => orphaned.push(path),
                // Removed since the listing.
                None => {}
            }
        }
        Ok((orphaned, pending))
    }

    /// Compare stores for one organization, optionally repairing.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::StoreUnavailable`] if a store cannot be read.
    /// Individual repair failures are logged and left in the report.
    pub async fn sweep_organization(
        &self,
        organization_id: Uuid,
        repair: bool,
    ) -> Result<ReconcileReport, SecretError> {
        let stored = self.stored_paths(organization_id).await?;
        let rows = self.catalog.list_by_organization(organization_id).await?;
        let recorded_count = self.ledger.get_count(organization_id).await?;

        let described: BTreeSet<String> = rows.iter().map(|m| m.path().to_string()).collect();
        let live_count = i64::try_from(rows.len()).unwrap_or(i64::MAX);
        let (orphaned_values, pending_values) = self
            .classify_unreferenced(stored.difference(&described).cloned().collect())
            .await?;

        let mut report = ReconcileReport {
            organization_id,
            orphaned_values,
            pending_values,
            missing_values: described.difference(&stored).cloned().collect(),
            recorded_count,
            live_count,
            repair,
            ..ReconcileReport::default()
        };

        for path in &report.missing_values {
            warn!(organization_id = %organization_id, path = %path, "metadata row has no stored value");
        }
        if !report.pending_values.is_empty() {
            debug!(organization_id = %organization_id, pending = report.pending_values.len(), "recent unreferenced values left alone");
        }

        if repair {
            for path in &report.orphaned_values {
                match self.values.delete(path).await {
                    Ok(()) => report.orphans_removed = report.orphans_removed.saturating_add(1),
                    Err(e) => warn!(path = %path, error = %e, "failed to delete orphaned value"),
                }
            }
            self.repair_count(&mut report).await;
        }

        if report.is_consistent() {
            info!(organization_id = %organization_id, live_count, "organization consistent");
        } else {
            warn!(
                organization_id = %organization_id,
                orphaned = report.orphaned_values.len(),
                missing = report.missing_values.len(),
                recorded_count,
                live_count,
                repair,
                deferred = report.count_correction_deferred,
                "organization drift detected"
            );
        }
        Ok(report)
    }

    async fn repair_count(&self, report: &mut ReconcileReport) {
        let organization_id = report.organization_id;
        let (recorded, live) = (report.recorded_count, report.live_count);
        let mut observations = self.observations.lock().await;

        if recorded == live {
            observations.remove(&organization_id);
            return;
        }

        if recorded > live {
            match observations.get(&organization_id) {
                Some(seen) if seen.recorded == recorded && seen.live == live => {
                    if seen.seen_at.elapsed() < self.grace {
                        report.count_correction_deferred = true;
                        return;
                    }
                }
                _ => {
                    observations.insert(
                        organization_id,
                        Observation {
                            recorded,
                            live,
                            seen_at: Instant::now(),
                        },
                    );
                    report.count_correction_deferred = true;
                    return;
                }
            }
        }

        observations.remove(&organization_id);
        match self.ledger.correct_count(organization_id, recorded, live).await {
            Ok(true) => report.count_corrected = true,
            Ok(false) => {
                debug!(organization_id = %organization_id, "secret count moved during sweep, correction skipped");
            }
            Err(e) => warn!(organization_id = %organization_id, error = %e, "failed to correct secret count"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use orgsecrets_storage::{MemoryStore, SecretFields};

    use super::*;
    use crate::coordinator::SecretCoordinator;
    use crate::deadline::Deadline;
    use crate::memory::{MemoryQuotaLedger, MemorySecretCatalog};
    use crate::models::{NewSecret, Scope, SecretMetadata, SecretPath};
    use crate::quota::Reservation;

    struct Fixture {
        coordinator: SecretCoordinator,
        reconciler: Reconciler,
        catalog: Arc<MemorySecretCatalog>,
        ledger: Arc<MemoryQuotaLedger>,
        store: MemoryStore,
        scope: Scope,
    }

    fn fixture() -> Fixture {
        fixture_with_limit(10)
    }

    fn fixture_with_limit(limit: i64) -> Fixture {
        let catalog = Arc::new(MemorySecretCatalog::new());
        let ledger = Arc::new(MemoryQuotaLedger::new(limit));
        let store = MemoryStore::new();
        let values: Arc<dyn ValueStore> = Arc::new(store.clone());
        Fixture {
            coordinator: SecretCoordinator::new(catalog.clone(), ledger.clone(), values.clone()),
            reconciler: Reconciler::new(catalog.clone(), ledger.clone(), values),
            catalog,
            ledger,
            store,
            scope: Scope::new(Uuid::new_v4(), Uuid::new_v4(), "dev").unwrap(),
        }
    }

    fn metadata_for(path: &SecretPath) -> SecretMetadata {
        let now = Utc::now();
        SecretMetadata {
            id: Uuid::new_v4(),
            name: path.name().to_owned(),
            description: String::new(),
            organization_id: path.organization_id(),
            project_id: path.project_id(),
            environment: path.environment().to_owned(),
            created_by: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    async fn create(f: &Fixture, name: &str) {
        f.coordinator
            .create(
                NewSecret {
                    path: f.scope.secret(name).unwrap(),
                    value: "v".to_owned(),
                    description: String::new(),
                    created_by: Uuid::new_v4(),
                },
                Deadline::after(Duration::from_secs(5)),
            )
            .await
            .unwrap();
    }

    fn fields() -> SecretFields {
        SecretFields {
            value: "orphan".to_owned(),
            created_at: 0,
            created_by: String::new(),
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn clean_organization_is_consistent() {
        let f = fixture();
        create(&f, "A").await;
        create(&f, "B").await;
        let report = f
            .reconciler
            .sweep_organization(f.scope.organization_id(), false)
            .await
            .unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.live_count, 2);
    }

    #[tokio::test]
    async fn finds_orphans_and_missing_values() {
        let f = fixture();
        create(&f, "A").await;
        create(&f, "B").await;
        let orphan = f.scope.secret("ORPHAN").unwrap().to_string();
        f.store.put(&orphan, &fields()).await.unwrap();
        let missing = f.scope.secret("B").unwrap().to_string();
        f.store.delete(&missing).await.unwrap();

        let report = f
            .reconciler
            .sweep_organization(f.scope.organization_id(), false)
            .await
            .unwrap();
        assert_eq!(report.orphaned_values, vec![orphan.clone()]);
        assert_eq!(report.missing_values, vec![missing]);
        assert_eq!(report.orphans_removed, 0);
        assert!(f.store.get(&orphan).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn repair_removes_orphans_and_fixes_count() {
        let f = fixture();
        let org = f.scope.organization_id();
        create(&f, "A").await;
        let orphan = f.scope.secret("ORPHAN").unwrap().to_string();
        f.store.put(&orphan, &fields()).await.unwrap();
        f.ledger.set_count(org, 7).await.unwrap();

        let first = f.reconciler.sweep_organization(org, true).await.unwrap();
        assert_eq!(first.recorded_count, 7);
        assert_eq!(first.live_count, 1);
        assert_eq!(first.orphans_removed, 1);
        assert!(first.count_correction_deferred);
        assert!(!first.count_corrected);
        assert!(f.store.get(&orphan).await.unwrap().is_none());
        assert_eq!(f.ledger.get_count(org).await.unwrap(), 7);

        tokio::time::advance(DEFAULT_GRACE_PERIOD).await;
        let second = f.reconciler.sweep_organization(org, true).await.unwrap();
        assert!(second.count_corrected);
        assert_eq!(f.ledger.get_count(org).await.unwrap(), 1);

        let again = f.reconciler.sweep_organization(org, false).await.unwrap();
        assert!(again.is_consistent());
    }

    #[tokio::test]
    async fn undercount_is_raised_immediately() {
        let f = fixture();
        let org = f.scope.organization_id();
        create(&f, "A").await;
        create(&f, "B").await;
        f.ledger.set_count(org, 0).await.unwrap();

        let report = f.reconciler.sweep_organization(org, true).await.unwrap();
        assert!(report.count_corrected);
        assert!(!report.count_correction_deferred);
        assert_eq!(f.ledger.get_count(org).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn value_of_unfinished_create_is_not_an_orphan() {
        let f = fixture();
        let org = f.scope.organization_id();
        let path = f.scope.secret("NEW").unwrap();

        // Reserved and written, metadata not inserted yet.
        assert!(matches!(
            f.ledger.try_reserve(org).await.unwrap(),
            Reservation::Granted { .. }
        ));
        let fresh = SecretFields {
            value: "fresh".to_owned(),
            created_at: Utc::now().timestamp(),
            created_by: String::new(),
            description: String::new(),
        };
        assert!(f.store.put_if_absent(&path.to_string(), &fresh).await.unwrap());

        let report = f.reconciler.sweep_organization(org, true).await.unwrap();
        assert!(report.orphaned_values.is_empty());
        assert_eq!(report.pending_values, vec![path.to_string()]);
        assert_eq!(report.orphans_removed, 0);
        assert!(f.store.get(&path.to_string()).await.unwrap().is_some());

        // The create commits; its secret is readable.
        f.catalog.create(&metadata_for(&path)).await.unwrap();
        let read = f.coordinator.read(&path, Deadline::after(Duration::from_secs(5))).await.unwrap();
        assert_eq!(read.value.as_deref(), Some("fresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_reservation_survives_repair() {
        let f = fixture_with_limit(3);
        let org = f.scope.organization_id();
        create(&f, "A").await;
        create(&f, "B").await;

        // A third create has reserved its slot but not inserted its row.
        assert!(matches!(
            f.ledger.try_reserve(org).await.unwrap(),
            Reservation::Granted { count: 3 }
        ));

        let report = f.reconciler.sweep_organization(org, true).await.unwrap();
        assert_eq!((report.recorded_count, report.live_count), (3, 2));
        assert!(report.count_correction_deferred);
        assert_eq!(f.ledger.get_count(org).await.unwrap(), 3);

        // The create lands before the next sweep.
        let path = f.scope.secret("C").unwrap();
        f.catalog.create(&metadata_for(&path)).await.unwrap();
        tokio::time::advance(DEFAULT_GRACE_PERIOD).await;

        let next = f.reconciler.sweep_organization(org, true).await.unwrap();
        assert!(!next.count_corrected);
        assert_eq!(f.ledger.get_count(org).await.unwrap(), 3);
        assert!(matches!(
            f.ledger.try_reserve(org).await.unwrap(),
            Reservation::Denied { count: 3, limit: 3 }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn moved_counts_restart_confirmation() {
        let f = fixture();
        let org = f.scope.organization_id();
        create(&f, "A").await;
        f.ledger.set_count(org, 4).await.unwrap();

        let first = f.reconciler.sweep_organization(org, true).await.unwrap();
        assert!(first.count_correction_deferred);

        f.ledger.set_count(org, 5).await.unwrap();
        tokio::time::advance(DEFAULT_GRACE_PERIOD).await;
        let second = f.reconciler.sweep_organization(org, true).await.unwrap();
        assert!(second.count_correction_deferred);
        assert_eq!(f.ledger.get_count(org).await.unwrap(), 5);

        tokio::time::advance(DEFAULT_GRACE_PERIOD).await;
        let third = f.reconciler.sweep_organization(org, true).await.unwrap();
        assert!(third.count_corrected);
        assert_eq!(f.ledger.get_count(org).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn other_organizations_are_untouched() {
        let f = fixture();
        create(&f, "A").await;
        let foreign = format!("{}/{}/dev/X", Uuid::new_v4(), Uuid::new_v4());
        f.store.put(&foreign, &fields()).await.unwrap();

        let report = f
            .reconciler
            .sweep_organization(f.scope.organization_id(), true)
            .await
            .unwrap();
        assert!(report.orphaned_values.is_empty());
        assert!(f.store.get(&foreign).await.unwrap().is_some());
    }
}
