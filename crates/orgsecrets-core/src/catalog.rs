//! The secret catalog: relational registry of secret metadata.
//!
//! Metadata is authoritative. A secret exists if and only if it has a row
//! here; the value store only holds payloads for rows that exist.

use uuid::Uuid;

use crate::error::RegistryError;
use crate::models::{Scope, SecretMetadata, SecretPath};

/// Secret metadata rows, unique on path.
///
/// Lookups return `Ok(None)` for absent rows; `Err` is reserved for
/// transport and constraint failures.
#[async_trait::async_trait]
pub trait SecretCatalog: Send + Sync {
    /// Insert a row. Fails with [`RegistryError::Conflict`] if the path is
    /// already taken.
    async fn create(&self, metadata: &SecretMetadata) -> Result<(), RegistryError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<SecretMetadata>, RegistryError>;

    async fn get_by_path(&self, path: &SecretPath)
    -> Result<Option<SecretMetadata>, RegistryError>;

    /// Rows in one environment, ordered by name.
    async fn list_by_scope(&self, scope: &Scope) -> Result<Vec<SecretMetadata>, RegistryError>;

    /// Every row of an organization.
    async fn list_by_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<SecretMetadata>, RegistryError>;

    /// Write `metadata.description`, stamp `updated_at` and bump `version`.
    /// Returns the stored row. Fails with [`RegistryError::NotFound`] if no
    /// row has `metadata.id`.
    async fn update(&self, metadata: &SecretMetadata) -> Result<SecretMetadata, RegistryError>;

    /// Delete by ID. Returns whether a row was removed.
    async fn delete_by_id(&self, id: Uuid) -> Result<bool, RegistryError>;

    /// Delete by path. Returns whether a row was removed.
    async fn delete_by_path(&self, path: &SecretPath) -> Result<bool, RegistryError>;

    async fn count_by_organization(&self, organization_id: Uuid) -> Result<i64, RegistryError>;
}
