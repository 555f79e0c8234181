use chrono::{DateTime, Utc};
use orgsecrets_core::catalog::SecretCatalog;
use orgsecrets_core::error::RegistryError;
use orgsecrets_core::models::{Scope, SecretMetadata, SecretPath};
use uuid::Uuid;

use super::{PgRegistry, registry_error};

#[derive(sqlx::FromRow)]
struct MetadataRow {
    id: Uuid,
    name: String,
    description: String,
    organization_id: Uuid,
    project_id: Uuid,
    environment: String,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i32,
}

impl From<MetadataRow> for SecretMetadata {
    fn from(row: MetadataRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            organization_id: row.organization_id,
            project_id: row.project_id,
            environment: row.environment,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        }
    }
}

const METADATA_COLUMNS: &str = "id, name, description, organization_id, project_id, environment, \
     created_by, created_at, updated_at, version";

#[async_trait::async_trait]
impl SecretCatalog for PgRegistry {
    async fn create(&self, metadata: &SecretMetadata) -> Result<(), RegistryError> {
        sqlx::query(
            r"INSERT INTO secret_metadata
                (id, name, description, organization_id, project_id, environment,
                 created_by, created_at, updated_at, version)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(metadata.id)
        .bind(&metadata.name)
        .bind(&metadata.description)
        .bind(metadata.organization_id)
        .bind(metadata.project_id)
        .bind(&metadata.environment)
        .bind(metadata.created_by)
        .bind(metadata.created_at)
        .bind(metadata.updated_at)
        .bind(metadata.version)
        .execute(&self.pool)
        .await
        .map_err(|e| registry_error(e, "organization"))?;
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<SecretMetadata>, RegistryError> {
        let row = sqlx::query_as::<_, MetadataRow>(&format!(
            "SELECT {METADATA_COLUMNS} FROM secret_metadata WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| registry_error(e, "secret"))?;

        Ok(row.map(SecretMetadata::from))
    }

    async fn get_by_path(
        &self,
        path: &SecretPath,
    ) -> Result<Option<SecretMetadata>, RegistryError> {
        let row = sqlx::query_as::<_, MetadataRow>(&format!(
            "SELECT {METADATA_COLUMNS} FROM secret_metadata
             WHERE organization_id = $1 AND project_id = $2 AND environment = $3 AND name = $4"
        ))
        .bind(path.organization_id())
        .bind(path.project_id())
        .bind(path.environment())
        .bind(path.name())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| registry_error(e, "secret"))?;

        Ok(row.map(SecretMetadata::from))
    }

    async fn list_by_scope(&self, scope: &Scope) -> Result<Vec<SecretMetadata>, RegistryError> {
        let rows = sqlx::query_as::<_, MetadataRow>(&format!(
            "SELECT {METADATA_COLUMNS} FROM secret_metadata
             WHERE organization_id = $1 AND project_id = $2 AND environment = $3
             ORDER BY name"
        ))
        .bind(scope.organization_id())
        .bind(scope.project_id())
        .bind(scope.environment())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| registry_error(e, "secret"))?;

        Ok(rows.into_iter().map(SecretMetadata::from).collect())
    }

    async fn list_by_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<SecretMetadata>, RegistryError> {
        let rows = sqlx::query_as::<_, MetadataRow>(&format!(
            "SELECT {METADATA_COLUMNS} FROM secret_metadata WHERE organization_id = $1"
        ))
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| registry_error(e, "secret"))?;

        Ok(rows.into_iter().map(SecretMetadata::from).collect())
    }

    async fn update(&self, metadata: &SecretMetadata) -> Result<SecretMetadata, RegistryError> {
        sqlx::query_as::<_, MetadataRow>(&format!(
            "UPDATE secret_metadata
             SET description = $2, updated_at = now(), version = version + 1
             WHERE id = $1
             RETURNING {METADATA_COLUMNS}"
        ))
        .bind(metadata.id)
        .bind(&metadata.description)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| registry_error(e, "secret"))?
        .map(SecretMetadata::from)
        .ok_or(RegistryError::NotFound { entity: "secret" })
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<bool, RegistryError> {
        let result = sqlx::query("DELETE FROM secret_metadata WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| registry_error(e, "secret"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_path(&self, path: &SecretPath) -> Result<bool, RegistryError> {
        let result = sqlx::query(
            r"DELETE FROM secret_metadata
              WHERE organization_id = $1 AND project_id = $2 AND environment = $3 AND name = $4",
        )
        .bind(path.organization_id())
        .bind(path.project_id())
        .bind(path.environment())
        .bind(path.name())
        .execute(&self.pool)
        .await
        .map_err(|e| registry_error(e, "secret"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_by_organization(&self, organization_id: Uuid) -> Result<i64, RegistryError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM secret_metadata WHERE organization_id = $1")
                .bind(organization_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| registry_error(e, "secret"))?;
        Ok(count)
    }
}
