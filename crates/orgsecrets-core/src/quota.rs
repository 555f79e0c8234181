//! Per-organization quota ledger.
//!
//! The ledger tracks two counters per organization, the live secret count
//! and the API call count, and resolves the secret limit from the active
//! subscription. Organizations without an active, unexpired subscription
//! get the free-tier limit.
//!
//! Admission goes through [`QuotaLedger::try_reserve`], which checks the
//! limit and increments the count as one atomic step. The separate
//! [`QuotaLedger::can_create`] and [`QuotaLedger::increment`] calls remain
//! for reporting and repair but must not be combined for admission: two
//! concurrent callers could both pass the check.

use serde::Serialize;
use uuid::Uuid;

use crate::error::RegistryError;
use crate::models::{NewSubscription, Subscription};

/// Secret limit for organizations without an active subscription.
pub const DEFAULT_FREE_TIER_LIMIT: i64 = 5;

/// Outcome of an atomic quota reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// One slot was taken; `count` is the new live count.
    Granted { count: i64 },
    /// The organization is at its limit; nothing changed.
    Denied { count: i64, limit: i64 },
}

/// Usage summary for one organization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageReport {
    pub organization_id: Uuid,
    pub secret_count: i64,
    pub api_calls: i64,
    pub secrets_limit: i64,
    pub usage_percent: f64,
}

impl UsageReport {
    /// Build a report. A limit of zero or less reports 100% usage.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(organization_id: Uuid, secret_count: i64, api_calls: i64, secrets_limit: i64) -> Self {
        let usage_percent = if secrets_limit <= 0 {
            100.0
        } else {
            secret_count as f64 / secrets_limit as f64 * 100.0
        };
        Self {
            organization_id,
            secret_count,
            api_calls,
            secrets_limit,
            usage_percent,
        }
    }
}

/// Counters and plan limits per organization.
///
/// Counter rows are created lazily on first increment; reads of a missing
/// row return zero. Decrements never take a count below zero.
#[async_trait::async_trait]
pub trait QuotaLedger: Send + Sync {
    /// Live secret count; 0 when no row exists.
    async fn get_count(&self, organization_id: Uuid) -> Result<i64, RegistryError>;

    /// The active subscription's limit, or the free-tier default.
    async fn get_limit(&self, organization_id: Uuid) -> Result<i64, RegistryError>;

    /// `count < limit`. Informational only; see [`QuotaLedger::try_reserve`].
    async fn can_create(&self, organization_id: Uuid) -> Result<bool, RegistryError> {
        let count = self.get_count(organization_id).await?;
        let limit = self.get_limit(organization_id).await?;
        Ok(count < limit)
    }

    async fn increment(&self, organization_id: Uuid) -> Result<(), RegistryError>;

    async fn decrement(&self, organization_id: Uuid) -> Result<(), RegistryError>;

    /// Check the limit and take one slot atomically.
    async fn try_reserve(&self, organization_id: Uuid) -> Result<Reservation, RegistryError>;

    /// Overwrite the live count.
    async fn set_count(&self, organization_id: Uuid, count: i64) -> Result<(), RegistryError>;

    /// Set the live count to `count` only if it still equals `expected`.
    ///
    /// Returns `false` without writing when the count moved, e.g. because a
    /// reservation or release landed since `expected` was read. A missing
    /// row counts as `0`.
    async fn correct_count(
        &self,
        organization_id: Uuid,
        expected: i64,
        count: i64,
    ) -> Result<bool, RegistryError>;

    async fn increment_api_call(&self, organization_id: Uuid) -> Result<(), RegistryError>;

    /// API call count; 0 when no row exists.
    async fn api_calls(&self, organization_id: Uuid) -> Result<i64, RegistryError>;

    /// Cancel any active subscription and insert `new` as active, in one
    /// transaction.
    async fn activate_subscription(
        &self,
        new: NewSubscription,
    ) -> Result<Subscription, RegistryError>;

    /// Counters and limit in one report.
    async fn usage(&self, organization_id: Uuid) -> Result<UsageReport, RegistryError> {
        let count = self.get_count(organization_id).await?;
        let api_calls = self.api_calls(organization_id).await?;
        let limit = self.get_limit(organization_id).await?;
        Ok(UsageReport::new(organization_id, count, api_calls, limit))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use super::*;
    use crate::memory::MemoryQuotaLedger;
    use crate::models::{Subscription, SubscriptionStatus};

    fn subscription(org: Uuid, limit: i64, days: i64) -> NewSubscription {
        let now = Utc::now();
        NewSubscription {
            organization_id: org,
            plan_id: "pro".to_owned(),
            secrets_limit: limit,
            start_date: now - Duration::days(1),
            end_date: now + Duration::days(days),
        }
    }

    /// A stored subscription row, bypassing activation's single-active rule.
    fn stored(org: Uuid, status: SubscriptionStatus, limit: i64, ends_in_days: i64) -> Subscription {
        let now = Utc::now();
        Subscription {
            id: Uuid::new_v4(),
            organization_id: org,
            plan_id: format!("plan-{limit}"),
            status,
            secrets_limit: limit,
            start_date: now - Duration::days(30),
            end_date: now + Duration::days(ends_in_days),
            created_at: now - Duration::days(30),
            updated_at: now - Duration::days(30),
        }
    }

    #[test]
    fn zero_limit_reports_full_usage() {
        let report = UsageReport::new(Uuid::nil(), 0, 0, 0);
        assert!((report.usage_percent - 100.0).abs() < f64::EPSILON);
        let report = UsageReport::new(Uuid::nil(), 1, 0, 4);
        assert!((report.usage_percent - 25.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn fresh_organization_uses_free_tier() {
        let ledger = MemoryQuotaLedger::new(DEFAULT_FREE_TIER_LIMIT);
        let org = Uuid::new_v4();
        assert_eq!(ledger.get_count(org).await.unwrap(), 0);
        assert_eq!(ledger.get_limit(org).await.unwrap(), DEFAULT_FREE_TIER_LIMIT);
        assert!(ledger.can_create(org).await.unwrap());
    }

    #[tokio::test]
    async fn decrement_floors_at_zero() {
        let ledger = MemoryQuotaLedger::new(5);
        let org = Uuid::new_v4();
        ledger.decrement(org).await.unwrap();
        assert_eq!(ledger.get_count(org).await.unwrap(), 0);
        ledger.increment(org).await.unwrap();
        ledger.decrement(org).await.unwrap();
        ledger.decrement(org).await.unwrap();
        assert_eq!(ledger.get_count(org).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reserve_stops_at_limit() {
        let ledger = MemoryQuotaLedger::new(2);
        let org = Uuid::new_v4();
        assert_eq!(ledger.try_reserve(org).await.unwrap(), Reservation::Granted { count: 1 });
        assert_eq!(ledger.try_reserve(org).await.unwrap(), Reservation::Granted { count: 2 });
        assert_eq!(
            ledger.try_reserve(org).await.unwrap(),
            Reservation::Denied { count: 2, limit: 2 }
        );
        assert!(!ledger.can_create(org).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_reservations_never_exceed_limit() {
        let ledger = Arc::new(MemoryQuotaLedger::new(3));
        let org = Uuid::new_v4();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move { ledger.try_reserve(org).await }));
        }
        let mut granted = 0;
        for handle in handles {
            if matches!(handle.await.unwrap().unwrap(), Reservation::Granted { .. }) {
                granted += 1;
            }
        }
        assert_eq!(granted, 3);
        assert_eq!(ledger.get_count(org).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn activation_replaces_previous_subscription() {
        let ledger = MemoryQuotaLedger::new(5);
        let org = Uuid::new_v4();

        let first = ledger.activate_subscription(subscription(org, 50, 30)).await.unwrap();
        assert_eq!(ledger.get_limit(org).await.unwrap(), 50);

        let second = ledger.activate_subscription(subscription(org, 10, 30)).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(ledger.get_limit(org).await.unwrap(), 10);
        assert_eq!(ledger.active_subscriptions(org).await, 1);
    }

    #[tokio::test]
    async fn ended_subscription_falls_back_to_free_tier() {
        let ledger = MemoryQuotaLedger::new(5);
        let org = Uuid::new_v4();
        let mut sub = subscription(org, 50, 0);
        sub.end_date = Utc::now() - Duration::hours(1);
        ledger.activate_subscription(sub).await.unwrap();
        assert_eq!(ledger.get_limit(org).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn usage_combines_counters() {
        let ledger = MemoryQuotaLedger::new(4);
        let org = Uuid::new_v4();
        ledger.increment(org).await.unwrap();
        ledger.increment_api_call(org).await.unwrap();
        ledger.increment_api_call(org).await.unwrap();

        let usage = ledger.usage(org).await.unwrap();
        assert_eq!(usage.secret_count, 1);
        assert_eq!(usage.api_calls, 2);
        assert_eq!(usage.secrets_limit, 4);
    }

    #[tokio::test]
    async fn later_ending_active_subscription_sets_the_limit() {
        let ledger = MemoryQuotaLedger::new(DEFAULT_FREE_TIER_LIMIT);
        let org = Uuid::new_v4();
        ledger
            .insert_subscription(stored(org, SubscriptionStatus::Active, 50, 40))
            .await;
        ledger
            .insert_subscription(stored(org, SubscriptionStatus::Active, 20, 10))
            .await;

        assert_eq!(ledger.active_subscriptions(org).await, 2);
        assert_eq!(ledger.get_limit(org).await.unwrap(), 50);
    }

    #[tokio::test]
    async fn no_active_subscription_falls_back_to_free_tier() {
        let ledger = MemoryQuotaLedger::new(DEFAULT_FREE_TIER_LIMIT);
        let org = Uuid::new_v4();
        ledger
            .insert_subscription(stored(org, SubscriptionStatus::Cancelled, 100, 30))
            .await;
        ledger
            .insert_subscription(stored(org, SubscriptionStatus::Active, 100, -1))
            .await;
        ledger
            .insert_subscription(stored(Uuid::new_v4(), SubscriptionStatus::Active, 100, 30))
            .await;

        assert_eq!(ledger.get_limit(org).await.unwrap(), 5);
    }
}
