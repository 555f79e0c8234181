//! `PostgreSQL` implementations of the core registry traits.
//!
//! A single [`PgRegistry`] wraps the connection pool and implements
//! [`UserDirectory`](orgsecrets_core::auth::UserDirectory),
//! [`OrganizationDirectory`](orgsecrets_core::accounts::OrganizationDirectory),
//! [`QuotaLedger`](orgsecrets_core::quota::QuotaLedger),
//! [`SecretCatalog`](orgsecrets_core::catalog::SecretCatalog) and
//! [`RefreshRotation`](orgsecrets_core::token::RefreshRotation), one module
//! per concern. Queries are parameterized and every `sqlx::Error` is mapped
//! to a [`RegistryError`] by [`registry_error`].

mod catalog;
mod organizations;
mod quota;
mod rotation;
mod users;

use std::time::Duration;

use orgsecrets_core::error::RegistryError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::state::{Readiness, Registries};

/// PostgreSQL unique violation.
const UNIQUE_VIOLATION: &str = "23505";
/// PostgreSQL foreign key violation.
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Map a sqlx error to a registry error.
///
/// Unique violations become [`RegistryError::Conflict`] naming the
/// constraint. Foreign key violations become [`RegistryError::NotFound`]
/// for `missing`, the entity the statement referenced.
fn registry_error(err: sqlx::Error, missing: &'static str) -> RegistryError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.code().as_deref() {
            Some(UNIQUE_VIOLATION) => {
                return RegistryError::Conflict {
                    constraint: db_err.constraint().unwrap_or("unique").to_owned(),
                };
            }
            Some(FOREIGN_KEY_VIOLATION) => return RegistryError::NotFound { entity: missing },
            _ => {}
        }
    }
    RegistryError::Unavailable {
        reason: err.to_string(),
    }
}

/// Relational registry backed by a `PgPool`.
#[derive(Clone)]
pub struct PgRegistry {
    pool: PgPool,
    free_tier_limit: i64,
}

impl std::fmt::Debug for PgRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgRegistry")
            .field("pool", &"[PgPool]")
            .field("free_tier_limit", &self.free_tier_limit)
            .finish()
    }
}

impl PgRegistry {
    /// Connect to PostgreSQL and apply the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unavailable`] if the connection or a
    /// migration fails.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
        free_tier_limit: i64,
    ) -> Result<Self, RegistryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| RegistryError::Unavailable {
                reason: format!("connect failed: {e}"),
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| RegistryError::Unavailable {
                reason: format!("migration failed: {e}"),
            })?;

        Ok(Self::from_pool(pool, free_tier_limit))
    }

    #[must_use]
    pub fn from_pool(pool: PgPool, free_tier_limit: i64) -> Self {
        Self {
            pool,
            free_tier_limit,
        }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Share this registry as every registry the server needs.
    #[must_use]
    pub fn into_registries(self) -> Registries {
        let registry = std::sync::Arc::new(self);
        Registries {
            users: registry.clone(),
            organizations: registry.clone(),
            ledger: registry.clone(),
            catalog: registry.clone(),
            rotation: registry.clone(),
            readiness: registry,
        }
    }
}

#[async_trait::async_trait]
impl Readiness for PgRegistry {
    async fn ping(&self) -> Result<(), RegistryError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| registry_error(e, "database"))
    }
}
