use chrono::{DateTime, Utc};
use orgsecrets_core::accounts::OrganizationDirectory;
use orgsecrets_core::error::RegistryError;
use orgsecrets_core::models::{MemberRole, NewOrganization, Organization};
use uuid::Uuid;

use super::{PgRegistry, registry_error};

#[derive(sqlx::FromRow)]
struct OrganizationRow {
    id: Uuid,
    name: String,
    description: String,
    owner_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<OrganizationRow> for Organization {
    fn from(row: OrganizationRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            owner_id: row.owner_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait::async_trait]
impl OrganizationDirectory for PgRegistry {
    async fn create_organization(
        &self,
        new: NewOrganization,
    ) -> Result<Organization, RegistryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| registry_error(e, "organization"))?;

        let org = sqlx::query_as::<_, OrganizationRow>(
            r"INSERT INTO organizations (id, name, description, owner_id)
              VALUES ($1, $2, $3, $4)
              RETURNING id, name, description, owner_id, created_at, updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(&new.name)
        .bind(&new.description)
        .bind(new.owner_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| registry_error(e, "user"))?;

        sqlx::query(
            r"INSERT INTO organization_members (organization_id, user_id, role)
              VALUES ($1, $2, $3)",
        )
        .bind(org.id)
        .bind(org.owner_id)
        .bind(MemberRole::Admin.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| registry_error(e, "user"))?;

        tx.commit()
            .await
            .map_err(|e| registry_error(e, "organization"))?;

        Ok(org.into())
    }

    async fn get_organization(&self, id: Uuid) -> Result<Option<Organization>, RegistryError> {
        let row = sqlx::query_as::<_, OrganizationRow>(
            r"SELECT id, name, description, owner_id, created_at, updated_at
              FROM organizations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| registry_error(e, "organization"))?;

        Ok(row.map(Organization::from))
    }

    async fn member_role(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<MemberRole>, RegistryError> {
        let role: Option<(String,)> = sqlx::query_as(
            "SELECT role FROM organization_members WHERE organization_id = $1 AND user_id = $2",
        )
        .bind(organization_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| registry_error(e, "organization"))?;

        role.map(|(role,)| {
            role.parse::<MemberRole>()
                .map_err(|reason| RegistryError::Unavailable { reason })
        })
        .transpose()
    }

    async fn list_organization_ids(&self) -> Result<Vec<Uuid>, RegistryError> {
        let ids: Vec<(Uuid,)> = sqlx::query_as("SELECT id FROM organizations ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| registry_error(e, "organization"))?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }
}
