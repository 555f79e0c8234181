//! In-memory registry implementations.
//!
//! Each type keeps its state behind a `tokio::sync` lock and mirrors the
//! constraints of the relational schema: unique emails, unique organization
//! names, unique secret paths, one active subscription per organization.
//! Used by unit tests, the server's integration tests, and local runs
//! without a database.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::accounts::OrganizationDirectory;
use crate::auth::UserDirectory;
use crate::catalog::SecretCatalog;
use crate::error::RegistryError;
use crate::models::{
    MemberRole, NewOrganization, NewSubscription, NewUser, Organization, Scope, SecretMetadata,
    SecretPath, Subscription, SubscriptionStatus, User,
};
use crate::quota::{QuotaLedger, Reservation};
use crate::token::RefreshRotation;

fn conflict(constraint: &str) -> RegistryError {
    RegistryError::Conflict {
        constraint: constraint.to_owned(),
    }
}

// ── Users ────────────────────────────────────────────────────────────

/// In-memory [`UserDirectory`].
#[derive(Debug, Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn create_user(&self, new: NewUser) -> Result<User, RegistryError> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == new.email) {
            return Err(conflict("users_email_key"));
        }
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: new.email,
            password_hash: new.password_hash,
            first_name: new.first_name,
            last_name: new.last_name,
            role: "user".to_owned(),
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RegistryError> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RegistryError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), RegistryError> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&id)
            .ok_or(RegistryError::NotFound { entity: "user" })?;
        password_hash.clone_into(&mut user.password_hash);
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        first_name: &str,
        last_name: &str,
    ) -> Result<User, RegistryError> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&id)
            .ok_or(RegistryError::NotFound { entity: "user" })?;
        first_name.clone_into(&mut user.first_name);
        last_name.clone_into(&mut user.last_name);
        user.updated_at = Utc::now();
        Ok(user.clone())
    }
}

// ── Organizations ────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct OrganizationState {
    organizations: HashMap<Uuid, Organization>,
    members: HashMap<(Uuid, Uuid), MemberRole>,
}

/// In-memory [`OrganizationDirectory`].
#[derive(Debug, Default)]
pub struct MemoryOrganizationDirectory {
    state: RwLock<OrganizationState>,
}

impl MemoryOrganizationDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `user_id` to an organization with `role`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the organization is missing.
    pub async fn add_member(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
    ) -> Result<(), RegistryError> {
        let mut state = self.state.write().await;
        if !state.organizations.contains_key(&organization_id) {
            return Err(RegistryError::NotFound {
                entity: "organization",
            });
        }
        state.members.insert((organization_id, user_id), role);
        Ok(())
    }
}

#[async_trait::async_trait]
impl OrganizationDirectory for MemoryOrganizationDirectory {
    async fn create_organization(
        &self,
        new: NewOrganization,
    ) -> Result<Organization, RegistryError> {
        let mut state = self.state.write().await;
        if state.organizations.values().any(|o| o.name == new.name) {
            return Err(conflict("organizations_name_key"));
        }
        let now = Utc::now();
        let org = Organization {
            id: Uuid::new_v4(),
            name: new.name,
            description: new.description,
            owner_id: new.owner_id,
            created_at: now,
            updated_at: now,
        };
        state.organizations.insert(org.id, org.clone());
        state
            .members
            .insert((org.id, org.owner_id), MemberRole::Admin);
        Ok(org)
    }

    async fn get_organization(&self, id: Uuid) -> Result<Option<Organization>, RegistryError> {
        Ok(self.state.read().await.organizations.get(&id).cloned())
    }

    async fn member_role(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<MemberRole>, RegistryError> {
        let state = self.state.read().await;
        Ok(state.members.get(&(organization_id, user_id)).copied())
    }

    async fn list_organization_ids(&self) -> Result<Vec<Uuid>, RegistryError> {
        Ok(self.state.read().await.organizations.keys().copied().collect())
    }
}

// ── Quota ledger ─────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
struct Usage {
    secret_count: i64,
    api_calls: i64,
}

#[derive(Debug, Default)]
struct LedgerState {
    usage: HashMap<Uuid, Usage>,
    subscriptions: Vec<Subscription>,
}

impl LedgerState {
    fn limit(&self, organization_id: Uuid, free_tier_limit: i64) -> i64 {
        let now = Utc::now();
        self.subscriptions
            .iter()
            .filter(|s| {
                s.organization_id == organization_id
                    && s.status == SubscriptionStatus::Active
                    && s.end_date > now
            })
            .max_by_key(|s| s.end_date)
            .map_or(free_tier_limit, |s| s.secrets_limit)
    }
}

/// In-memory [`QuotaLedger`]. A single lock covers counters and
/// subscriptions so reservations are atomic.
#[derive(Debug)]
pub struct MemoryQuotaLedger {
    state: Mutex<LedgerState>,
    free_tier_limit: i64,
}

impl MemoryQuotaLedger {
    #[must_use]
    pub fn new(free_tier_limit: i64) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            free_tier_limit,
        }
    }

    /// Store a subscription as given, bypassing activation.
    #[cfg(test)]
    pub(crate) async fn insert_subscription(&self, subscription: Subscription) {
        self.state.lock().await.subscriptions.push(subscription);
    }

    /// Number of active subscriptions held by an organization.
    pub async fn active_subscriptions(&self, organization_id: Uuid) -> usize {
        let state = self.state.lock().await;
        state
            .subscriptions
            .iter()
            .filter(|s| {
                s.organization_id == organization_id && s.status == SubscriptionStatus::Active
            })
            .count()
    }
}

#[async_trait::async_trait]
impl QuotaLedger for MemoryQuotaLedger {
    async fn get_count(&self, organization_id: Uuid) -> Result<i64, RegistryError> {
        let state = self.state.lock().await;
        Ok(state
            .usage
            .get(&organization_id)
            .map_or(0, |u| u.secret_count))
    }

    async fn get_limit(&self, organization_id: Uuid) -> Result<i64, RegistryError> {
        let state = self.state.lock().await;
        Ok(state.limit(organization_id, self.free_tier_limit))
    }

    async fn increment(&self, organization_id: Uuid) -> Result<(), RegistryError> {
        let mut state = self.state.lock().await;
        let usage = state.usage.entry(organization_id).or_default();
        usage.secret_count = usage.secret_count.saturating_add(1);
        Ok(())
    }

    async fn decrement(&self, organization_id: Uuid) -> Result<(), RegistryError> {
        let mut state = self.state.lock().await;
        if let Some(usage) = state.usage.get_mut(&organization_id) {
            usage.secret_count = (usage.secret_count - 1).max(0);
        }
        Ok(())
    }

    async fn try_reserve(&self, organization_id: Uuid) -> Result<Reservation, RegistryError> {
        let mut state = self.state.lock().await;
        let limit = state.limit(organization_id, self.free_tier_limit);
        let usage = state.usage.entry(organization_id).or_default();
        if usage.secret_count >= limit {
            return Ok(Reservation::Denied {
                count: usage.secret_count,
                limit,
            });
        }
        usage.secret_count = usage.secret_count.saturating_add(1);
        Ok(Reservation::Granted {
            count: usage.secret_count,
        })
    }

    async fn set_count(&self, organization_id: Uuid, count: i64) -> Result<(), RegistryError> {
        let mut state = self.state.lock().await;
        state.usage.entry(organization_id).or_default().secret_count = count.max(0);
        Ok(())
    }

    async fn correct_count(
        &self,
        organization_id: Uuid,
        expected: i64,
        count: i64,
    ) -> Result<bool, RegistryError> {
        let mut state = self.state.lock().await;
        let usage = state.usage.entry(organization_id).or_default();
        if usage.secret_count != expected {
            return Ok(false);
        }
        usage.secret_count = count.max(0);
        Ok(true)
    }

    async fn increment_api_call(&self, organization_id: Uuid) -> Result<(), RegistryError> {
        let mut state = self.state.lock().await;
        let usage = state.usage.entry(organization_id).or_default();
        usage.api_calls = usage.api_calls.saturating_add(1);
        Ok(())
    }

    async fn api_calls(&self, organization_id: Uuid) -> Result<i64, RegistryError> {
        let state = self.state.lock().await;
        Ok(state.usage.get(&organization_id).map_or(0, |u| u.api_calls))
    }

    async fn activate_subscription(
        &self,
        new: NewSubscription,
    ) -> Result<Subscription, RegistryError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        for existing in &mut state.subscriptions {
            if existing.organization_id == new.organization_id
                && existing.status == SubscriptionStatus::Active
            {
                existing.status = SubscriptionStatus::Cancelled;
                existing.updated_at = now;
            }
        }
        let subscription = Subscription {
            id: Uuid::new_v4(),
            organization_id: new.organization_id,
            plan_id: new.plan_id,
            status: SubscriptionStatus::Active,
            secrets_limit: new.secrets_limit,
            start_date: new.start_date,
            end_date: new.end_date,
            created_at: now,
            updated_at: now,
        };
        state.subscriptions.push(subscription.clone());
        Ok(subscription)
    }
}

// ── Secret catalog ───────────────────────────────────────────────────

#[derive(Debug, Default)]
struct CatalogState {
    rows: HashMap<Uuid, SecretMetadata>,
    by_path: HashMap<String, Uuid>,
}

/// In-memory [`SecretCatalog`], unique on path.
#[derive(Debug, Default)]
pub struct MemorySecretCatalog {
    state: RwLock<CatalogState>,
}

impl MemorySecretCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.rows.is_empty()
    }
}

#[async_trait::async_trait]
impl SecretCatalog for MemorySecretCatalog {
    async fn create(&self, metadata: &SecretMetadata) -> Result<(), RegistryError> {
        let mut state = self.state.write().await;
        let key = metadata.path().to_string();
        if state.by_path.contains_key(&key) {
            return Err(conflict("secret_metadata_path_key"));
        }
        state.by_path.insert(key, metadata.id);
        state.rows.insert(metadata.id, metadata.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<SecretMetadata>, RegistryError> {
        Ok(self.state.read().await.rows.get(&id).cloned())
    }

    async fn get_by_path(
        &self,
        path: &SecretPath,
    ) -> Result<Option<SecretMetadata>, RegistryError> {
        let state = self.state.read().await;
        Ok(state
            .by_path
            .get(&path.to_string())
            .and_then(|id| state.rows.get(id))
            .cloned())
    }

    async fn list_by_scope(&self, scope: &Scope) -> Result<Vec<SecretMetadata>, RegistryError> {
        let state = self.state.read().await;
        let mut rows: Vec<_> = state
            .rows
            .values()
            .filter(|m| {
                m.organization_id == scope.organization_id()
                    && m.project_id == scope.project_id()
                    && m.environment == scope.environment()
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    async fn list_by_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<SecretMetadata>, RegistryError> {
        let state = self.state.read().await;
        Ok(state
            .rows
            .values()
            .filter(|m| m.organization_id == organization_id)
            .cloned()
            .collect())
    }

    async fn update(&self, metadata: &SecretMetadata) -> Result<SecretMetadata, RegistryError> {
        let mut state = self.state.write().await;
        let row = state
            .rows
            .get_mut(&metadata.id)
            .ok_or(RegistryError::NotFound { entity: "secret" })?;
        row.description.clone_from(&metadata.description);
        row.updated_at = Utc::now();
        row.version = row.version.saturating_add(1);
        Ok(row.clone())
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<bool, RegistryError> {
        let mut state = self.state.write().await;
        let Some(row) = state.rows.remove(&id) else {
            return Ok(false);
        };
        state.by_path.remove(&row.path().to_string());
        Ok(true)
    }

    async fn delete_by_path(&self, path: &SecretPath) -> Result<bool, RegistryError> {
        let mut state = self.state.write().await;
        let Some(id) = state.by_path.remove(&path.to_string()) else {
            return Ok(false);
        };
        state.rows.remove(&id);
        Ok(true)
    }

    async fn count_by_organization(&self, organization_id: Uuid) -> Result<i64, RegistryError> {
        let state = self.state.read().await;
        let count = state
            .rows
            .values()
            .filter(|m| m.organization_id == organization_id)
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }
}

// ── Refresh rotation ─────────────────────────────────────────────────

/// In-memory [`RefreshRotation`] record.
#[derive(Debug, Default)]
pub struct MemoryRefreshRotation {
    consumed: Mutex<HashMap<Uuid, DateTime<Utc>>>,
}

impl MemoryRefreshRotation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded `jti`s.
    pub async fn len(&self) -> usize {
        self.consumed.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.consumed.lock().await.is_empty()
    }
}

#[async_trait::async_trait]
impl RefreshRotation for MemoryRefreshRotation {
    async fn consume(&self, jti: Uuid, expires_at: DateTime<Utc>) -> Result<bool, RegistryError> {
        let mut consumed = self.consumed.lock().await;
        if consumed.contains_key(&jti) {
            return Ok(false);
        }
        consumed.insert(jti, expires_at);
        Ok(true)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RegistryError> {
        let mut consumed = self.consumed.lock().await;
        let before = consumed.len();
        consumed.retain(|_, expires_at| *expires_at >= now);
        Ok(u64::try_from(before - consumed.len()).unwrap_or(0))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn metadata(path: &SecretPath) -> SecretMetadata {
        let now = Utc::now();
        SecretMetadata {
            id: Uuid::new_v4(),
            name: path.name().to_owned(),
            description: "d".to_owned(),
            organization_id: path.organization_id(),
            project_id: path.project_id(),
            environment: path.environment().to_owned(),
            created_by: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    #[tokio::test]
    async fn catalog_enforces_unique_path() {
        let catalog = MemorySecretCatalog::new();
        let path = SecretPath::new(Uuid::new_v4(), Uuid::new_v4(), "dev", "K").unwrap();
        catalog.create(&metadata(&path)).await.unwrap();
        assert!(matches!(
            catalog.create(&metadata(&path)).await,
            Err(RegistryError::Conflict { .. })
        ));
        assert_eq!(catalog.len().await, 1);
    }

    #[tokio::test]
    async fn catalog_update_bumps_version() {
        let catalog = MemorySecretCatalog::new();
        let path = SecretPath::new(Uuid::new_v4(), Uuid::new_v4(), "dev", "K").unwrap();
        let mut row = metadata(&path);
        catalog.create(&row).await.unwrap();

        row.description = "changed".to_owned();
        let stored = catalog.update(&row).await.unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.description, "changed");

        row.id = Uuid::new_v4();
        assert!(matches!(
            catalog.update(&row).await,
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn catalog_delete_by_path_and_id() {
        let catalog = MemorySecretCatalog::new();
        let scope = Scope::new(Uuid::new_v4(), Uuid::new_v4(), "dev").unwrap();
        let a = scope.secret("A").unwrap();
        let b = scope.secret("B").unwrap();
        let row_a = metadata(&a);
        catalog.create(&row_a).await.unwrap();
        catalog.create(&metadata(&b)).await.unwrap();

        let listed = catalog.list_by_scope(&scope).await.unwrap();
        assert_eq!(listed.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(), vec!["A", "B"]);

        assert!(catalog.delete_by_id(row_a.id).await.unwrap());
        assert!(!catalog.delete_by_id(row_a.id).await.unwrap());
        assert!(catalog.delete_by_path(&b).await.unwrap());
        assert!(catalog.get_by_path(&a).await.unwrap().is_none());
        assert_eq!(catalog.count_by_organization(scope.organization_id()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn users_unique_on_email() {
        let users = MemoryUserDirectory::new();
        let new = NewUser {
            email: "a@example.com".to_owned(),
            password_hash: "h".to_owned(),
            first_name: String::new(),
            last_name: String::new(),
        };
        users.create_user(new.clone()).await.unwrap();
        assert!(matches!(
            users.create_user(new).await,
            Err(RegistryError::Conflict { .. })
        ));
        assert!(matches!(
            users.update_password(Uuid::new_v4(), "h").await,
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn added_member_has_role() {
        let orgs = MemoryOrganizationDirectory::new();
        let org = orgs
            .create_organization(NewOrganization {
                name: "Acme".to_owned(),
                description: String::new(),
                owner_id: Uuid::new_v4(),
            })
            .await
            .unwrap();
        let user = Uuid::new_v4();
        assert_eq!(orgs.member_role(org.id, user).await.unwrap(), None);
        orgs.add_member(org.id, user, MemberRole::Member).await.unwrap();
        assert_eq!(orgs.member_role(org.id, user).await.unwrap(), Some(MemberRole::Member));
        assert_eq!(orgs.list_organization_ids().await.unwrap(), vec![org.id]);
    }

    #[tokio::test]
    async fn rotation_purges_only_expired_records() {
        let rotation = MemoryRefreshRotation::new();
        let now = Utc::now();
        assert!(rotation.consume(Uuid::new_v4(), now - Duration::hours(1)).await.unwrap());
        let live = Uuid::new_v4();
        assert!(rotation.consume(live, now + Duration::hours(1)).await.unwrap());
        assert!(!rotation.consume(live, now + Duration::hours(1)).await.unwrap());

        assert_eq!(rotation.purge_expired(now).await.unwrap(), 1);
        assert_eq!(rotation.len().await, 1);
    }
}
