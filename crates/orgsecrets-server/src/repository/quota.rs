use chrono::{DateTime, Utc};
use orgsecrets_core::error::RegistryError;
use orgsecrets_core::models::{NewSubscription, Subscription, SubscriptionStatus};
use orgsecrets_core::quota::{QuotaLedger, Reservation};
use tracing::debug;
use uuid::Uuid;

use super::{PgRegistry, registry_error};

/// Limit of the active, unexpired subscription with the latest end date,
/// falling back to the free tier bound as `$2`.
const LIMIT_SUBQUERY: &str = r"COALESCE(
    (SELECT secrets_limit FROM subscriptions
      WHERE organization_id = $1 AND status = 'active' AND end_date > now()
      ORDER BY end_date DESC LIMIT 1),
    $2)";

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    organization_id: Uuid,
    plan_id: String,
    status: String,
    secrets_limit: i64,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = RegistryError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<SubscriptionStatus>()
            .map_err(|reason| RegistryError::Unavailable { reason })?;
        Ok(Self {
            id: row.id,
            organization_id: row.organization_id,
            plan_id: row.plan_id,
            status,
            secrets_limit: row.secrets_limit,
            start_date: row.start_date,
            end_date: row.end_date,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait::async_trait]
impl QuotaLedger for PgRegistry {
    async fn get_count(&self, organization_id: Uuid) -> Result<i64, RegistryError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT secret_count FROM usage_statistics WHERE organization_id = $1",
        )
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| registry_error(e, "organization"))?;

        Ok(row.map_or(0, |(count,)| count))
    }

    async fn get_limit(&self, organization_id: Uuid) -> Result<i64, RegistryError> {
        let (limit,): (i64,) = sqlx::query_as(&format!("SELECT {LIMIT_SUBQUERY}"))
            .bind(organization_id)
            .bind(self.free_tier_limit)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| registry_error(e, "organization"))?;

        Ok(limit)
    }

    async fn increment(&self, organization_id: Uuid) -> Result<(), RegistryError> {
        sqlx::query(
            r"INSERT INTO usage_statistics (organization_id, secret_count)
              VALUES ($1, 1)
              ON CONFLICT (organization_id) DO UPDATE
                SET secret_count = usage_statistics.secret_count + 1,
                    last_updated = now()",
        )
        .bind(organization_id)
        .execute(&self.pool)
        .await
        .map_err(|e| registry_error(e, "organization"))?;
        Ok(())
    }

    async fn decrement(&self, organization_id: Uuid) -> Result<(), RegistryError> {
        sqlx::query(
            r"UPDATE usage_statistics
              SET secret_count = GREATEST(secret_count - 1, 0), last_updated = now()
              WHERE organization_id = $1",
        )
        .bind(organization_id)
        .execute(&self.pool)
        .await
        .map_err(|e| registry_error(e, "organization"))?;
        Ok(())
    }

    async fn try_reserve(&self, organization_id: Uuid) -> Result<Reservation, RegistryError> {
        // The conflict branch re-checks the limit against the locked row, so
        // concurrent reservations serialize on the usage row.
        let granted: Option<(i64,)> = sqlx::query_as(&format!(
            r"INSERT INTO usage_statistics (organization_id, secret_count)
              SELECT $1, 1 WHERE {LIMIT_SUBQUERY} > 0
              ON CONFLICT (organization_id) DO UPDATE
                SET secret_count = usage_statistics.secret_count + 1,
                    last_updated = now()
                WHERE usage_statistics.secret_count < {LIMIT_SUBQUERY}
              RETURNING secret_count"
        ))
        .bind(organization_id)
        .bind(self.free_tier_limit)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| registry_error(e, "organization"))?;

        if let Some((count,)) = granted {
            return Ok(Reservation::Granted { count });
        }

        let count = self.get_count(organization_id).await?;
        let limit = self.get_limit(organization_id).await?;
        debug!(organization_id = %organization_id, count, limit, "quota reservation denied");
        Ok(Reservation::Denied { count, limit })
    }

    async fn set_count(&self, organization_id: Uuid, count: i64) -> Result<(), RegistryError> {
        sqlx::query(
            r"INSERT INTO usage_statistics (organization_id, secret_count)
              VALUES ($1, $2)
              ON CONFLICT (organization_id) DO UPDATE
                SET secret_count = EXCLUDED.secret_count, last_updated = now()",
        )
        .bind(organization_id)
        .bind(count.max(0))
        .execute(&self.pool)
        .await
        .map_err(|e| registry_error(e, "organization"))?;
        Ok(())
    }

    async fn correct_count(
        &self,
        organization_id: Uuid,
        expected: i64,
        count: i64,
    ) -> Result<bool, RegistryError> {
        // A missing row reads as 0, so only an expected 0 may create one.
        let sql = if expected == 0 {
            r"INSERT INTO usage_statistics (organization_id, secret_count)
              VALUES ($1, $3)
              ON CONFLICT (organization_id) DO UPDATE
                SET secret_count = EXCLUDED.secret_count, last_updated = now()
                WHERE usage_statistics.secret_count = $2"
        } else {
            r"UPDATE usage_statistics
                 SET secret_count = $3, last_updated = now()
               WHERE organization_id = $1 AND secret_count = $2"
        };
        let result = sqlx::query(sql)
            .bind(organization_id)
            .bind(expected)
            .bind(count.max(0))
            .execute(&self.pool)
            .await
            .map_err(|e| registry_error(e, "organization"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn increment_api_call(&self, organization_id: Uuid) -> Result<(), RegistryError> {
        sqlx::query(
            r"INSERT INTO usage_statistics (organization_id, api_calls)
              VALUES ($1, 1)
              ON CONFLICT (organization_id) DO UPDATE
                SET api_calls = usage_statistics.api_calls + 1,
                    last_updated = now()",
        )
        .bind(organization_id)
        .execute(&self.pool)
        .await
        .map_err(|e| registry_error(e, "organization"))?;
        Ok(())
    }

    async fn api_calls(&self, organization_id: Uuid) -> Result<i64, RegistryError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT api_calls FROM usage_statistics WHERE organization_id = $1")
                .bind(organization_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| registry_error(e, "organization"))?;

        Ok(row.map_or(0, |(calls,)| calls))
    }

    async fn activate_subscription(
        &self,
        new: NewSubscription,
    ) -> Result<Subscription, RegistryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| registry_error(e, "organization"))?;

        sqlx::query(
            r"UPDATE subscriptions SET status = 'cancelled', updated_at = now()
              WHERE organization_id = $1 AND status = 'active'",
        )
        .bind(new.organization_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| registry_error(e, "organization"))?;

        let row = sqlx::query_as::<_, SubscriptionRow>(
            r"INSERT INTO subscriptions
                (id, organization_id, plan_id, status, secrets_limit, start_date, end_date)
              VALUES ($1, $2, $3, 'active', $4, $5, $6)
              RETURNING id, organization_id, plan_id, status, secrets_limit,
                        start_date, end_date, created_at, updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(new.organization_id)
        .bind(&new.plan_id)
        .bind(new.secrets_limit)
        .bind(new.start_date)
        .bind(new.end_date)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| registry_error(e, "organization"))?;

        tx.commit()
            .await
            .map_err(|e| registry_error(e, "organization"))?;

        row.try_into()
    }
}
