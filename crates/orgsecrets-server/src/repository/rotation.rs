use chrono::{DateTime, Utc};
use orgsecrets_core::error::RegistryError;
use orgsecrets_core::token::RefreshRotation;
use uuid::Uuid;

use super::{PgRegistry, registry_error};

#[async_trait::async_trait]
impl RefreshRotation for PgRegistry {
    async fn consume(&self, jti: Uuid, expires_at: DateTime<Utc>) -> Result<bool, RegistryError> {
        // Only the first insert of a jti affects a row.
        let result = sqlx::query(
            r"INSERT INTO consumed_refresh_tokens (jti, expires_at)
              VALUES ($1, $2)
              ON CONFLICT (jti) DO NOTHING",
        )
        .bind(jti)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| registry_error(e, "refresh token"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RegistryError> {
        let result = sqlx::query("DELETE FROM consumed_refresh_tokens WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| registry_error(e, "refresh token"))?;

        Ok(result.rows_affected())
    }
}
