//! Organizations and membership checks.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::error::{AccountError, RegistryError};
use crate::models::{MemberRole, NewOrganization, Organization};

/// Maximum organization name length in bytes.
pub const MAX_ORGANIZATION_NAME_LEN: usize = 255;

/// Persisted organizations and their members.
#[async_trait::async_trait]
pub trait OrganizationDirectory: Send + Sync {
    /// Insert an organization and add its owner as an `admin` member in one
    /// transaction. Fails with [`RegistryError::Conflict`] if the name is
    /// taken.
    async fn create_organization(&self, new: NewOrganization)
    -> Result<Organization, RegistryError>;

    async fn get_organization(&self, id: Uuid) -> Result<Option<Organization>, RegistryError>;

    /// The user's role in the organization, or `None` if not a member.
    async fn member_role(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<MemberRole>, RegistryError>;

    /// IDs of every organization, for maintenance sweeps.
    async fn list_organization_ids(&self) -> Result<Vec<Uuid>, RegistryError>;
}

/// Organization management with authorization checks.
#[derive(Clone)]
pub struct AccountService {
    organizations: Arc<dyn OrganizationDirectory>,
}

impl AccountService {
    #[must_use]
    pub fn new(organizations: Arc<dyn OrganizationDirectory>) -> Self {
        Self { organizations }
    }

    #[must_use]
    pub fn directory(&self) -> &dyn OrganizationDirectory {
        self.organizations.as_ref()
    }

    /// Create an organization owned by `owner_id`.
    ///
    /// # Errors
    ///
    /// [`AccountError::InvalidName`] for an empty or overlong name,
    /// [`AccountError::NameConflict`] if the name is taken.
    pub async fn create_organization(
        &self,
        owner_id: Uuid,
        name: &str,
        description: &str,
    ) -> Result<Organization, AccountError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AccountError::InvalidName {
                reason: "name must not be empty".to_owned(),
            });
        }
        if name.len() > MAX_ORGANIZATION_NAME_LEN {
            return Err(AccountError::InvalidName {
                reason: format!("name exceeds {MAX_ORGANIZATION_NAME_LEN} bytes"),
            });
        }

        let org = self
            .organizations
            .create_organization(NewOrganization {
                name: name.to_owned(),
                description: description.to_owned(),
                owner_id,
            })
            .await
            .map_err(|e| match e {
                RegistryError::Conflict { .. } => AccountError::NameConflict {
                    name: name.to_owned(),
                },
                other => AccountError::Registry(other),
            })?;

        info!(organization_id = %org.id, owner_id = %owner_id, "organization created");
        Ok(org)
    }

    async fn load(&self, organization_id: Uuid) -> Result<Organization, AccountError> {
        self.organizations
            .get_organization(organization_id)
            .await?
            .ok_or(AccountError::OrganizationNotFound { organization_id })
    }

    /// Load an organization the user belongs to.
    ///
    /// # Errors
    ///
    /// [`AccountError::OrganizationNotFound`] if it does not exist,
    /// [`AccountError::Forbidden`] if the user is not a member.
    pub async fn organization_for_member(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<Organization, AccountError> {
        let org = self.load(organization_id).await?;
        self.require_member(organization_id, user_id).await?;
        Ok(org)
    }

    /// Require that the user is a member of the organization.
    ///
    /// # Errors
    ///
    /// [`AccountError::Forbidden`] if the user is not a member.
    pub async fn require_member(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<MemberRole, AccountError> {
        self.organizations
            .member_role(organization_id, user_id)
            .await?
            .ok_or_else(|| AccountError::Forbidden {
                reason: "not a member of this organization".to_owned(),
            })
    }

    /// Require that the user owns the organization.
    ///
    /// # Errors
    ///
    /// [`AccountError::OrganizationNotFound`] if it does not exist,
    /// [`AccountError::Forbidden`] if the user is not the owner.
    pub async fn require_owner(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<Organization, AccountError> {
        let org = self.load(organization_id).await?;
        if org.owner_id != user_id {
            return Err(AccountError::Forbidden {
                reason: "only the organization owner may do this".to_owned(),
            });
        }
        Ok(org)
    }
}
