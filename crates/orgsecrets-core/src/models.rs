//! Domain models shared by the core services and the registry implementations.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SecretError;

/// Maximum length in bytes of an environment or secret name segment.
pub const MAX_SEGMENT_LEN: usize = 256;

// ── Users ────────────────────────────────────────────────────────────

/// A registered user, including the stored password hash.
#[derive(Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// Public view of a user. Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserDetails {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for UserDetails {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            role: user.role.clone(),
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Input for inserting a user. The password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
}

// ── Organizations ────────────────────────────────────────────────────

/// An organization: the tenant that owns projects, secrets and a quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating an organization.
#[derive(Debug, Clone)]
pub struct NewOrganization {
    pub name: String,
    pub description: String,
    pub owner_id: Uuid,
}

/// A user's role inside an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    Member,
}

impl MemberRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }
}

impl FromStr for MemberRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "member" => Ok(Self::Member),
            other => Err(format!("unknown member role '{other}'")),
        }
    }
}

// ── Subscriptions ────────────────────────────────────────────────────

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    Trial,
}

impl SubscriptionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::Trial => "trial",
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "cancelled" => Ok(Self::Cancelled),
            "trial" => Ok(Self::Trial),
            other => Err(format!("unknown subscription status '{other}'")),
        }
    }
}

/// A plan subscription. At most one per organization is `active`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subscription {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub plan_id: String,
    pub status: SubscriptionStatus,
    pub secrets_limit: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for activating a subscription.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub organization_id: Uuid,
    pub plan_id: String,
    pub secrets_limit: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

// ── Secret paths ─────────────────────────────────────────────────────

fn validate_segment(kind: &str, segment: &str) -> Result<(), SecretError> {
    if segment.is_empty() {
        return Err(SecretError::InvalidPath {
            reason: format!("{kind} must not be empty"),
        });
    }
    if segment.len() > MAX_SEGMENT_LEN {
        return Err(SecretError::InvalidPath {
            reason: format!("{kind} exceeds {MAX_SEGMENT_LEN} bytes"),
        });
    }
    if segment.contains('/') {
        return Err(SecretError::InvalidPath {
            reason: format!("{kind} must not contain '/'"),
        });
    }
    // Dot segments are collapsed by URL normalization in HTTP-backed stores.
    if segment == "." || segment == ".." {
        return Err(SecretError::InvalidPath {
            reason: format!("{kind} must not be '.' or '..'"),
        });
    }
    Ok(())
}

/// An `{organization}/{project}/{environment}` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    organization_id: Uuid,
    project_id: Uuid,
    environment: String,
}

impl Scope {
    /// Build a scope, validating the environment segment.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::InvalidPath`] if `environment` is empty, longer
    /// than [`MAX_SEGMENT_LEN`] bytes, contains `/`, or is a dot segment.
    pub fn new(
        organization_id: Uuid,
        project_id: Uuid,
        environment: impl Into<String>,
    ) -> Result<Self, SecretError> {
        let environment = environment.into();
        validate_segment("environment", &environment)?;
        Ok(Self {
            organization_id,
            project_id,
            environment,
        })
    }

    #[must_use]
    pub fn organization_id(&self) -> Uuid {
        self.organization_id
    }

    #[must_use]
    pub fn project_id(&self) -> Uuid {
        self.project_id
    }

    #[must_use]
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// The path of the secret `name` inside this scope.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::InvalidPath`] if `name` is not a valid segment.
    pub fn secret(&self, name: impl Into<String>) -> Result<SecretPath, SecretError> {
        let name = name.into();
        validate_segment("secret name", &name)?;
        Ok(SecretPath {
            scope: self.clone(),
            name,
        })
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.organization_id, self.project_id, self.environment
        )
    }
}

/// A fully qualified secret path:
/// `{organization}/{project}/{environment}/{name}`.
///
/// The rendered form is both the value-store key and the metadata lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretPath {
    scope: Scope,
    name: String,
}

impl SecretPath {
    /// Build and validate a path.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::InvalidPath`] on an invalid environment or name.
    pub fn new(
        organization_id: Uuid,
        project_id: Uuid,
        environment: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self, SecretError> {
        Scope::new(organization_id, project_id, environment)?.secret(name)
    }

    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    #[must_use]
    pub fn organization_id(&self) -> Uuid {
        self.scope.organization_id
    }

    #[must_use]
    pub fn project_id(&self) -> Uuid {
        self.scope.project_id
    }

    #[must_use]
    pub fn environment(&self) -> &str {
        &self.scope.environment
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for SecretPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.name)
    }
}

// ── Secrets ──────────────────────────────────────────────────────────

/// A metadata row in the secret catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretMetadata {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub organization_id: Uuid,
    pub project_id: Uuid,
    pub environment: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

impl SecretMetadata {
    /// The path this row describes.
    #[must_use]
    pub fn path(&self) -> SecretPath {
        SecretPath {
            scope: Scope {
                organization_id: self.organization_id,
                project_id: self.project_id,
                environment: self.environment.clone(),
            },
            name: self.name.clone(),
        }
    }
}

/// Input for creating a secret.
#[derive(Clone)]
pub struct NewSecret {
    pub path: SecretPath,
    pub value: String,
    pub description: String,
    pub created_by: Uuid,
}

impl fmt::Debug for NewSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewSecret")
            .field("path", &self.path.to_string())
            .field("value", &"[redacted]")
            .field("description", &self.description)
            .field("created_by", &self.created_by)
            .finish()
    }
}

/// Input for replacing a secret's value.
#[derive(Clone)]
pub struct SecretUpdate {
    pub path: SecretPath,
    pub value: String,
    /// `None` keeps the current description.
    pub description: Option<String>,
}

impl fmt::Debug for SecretUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretUpdate")
            .field("path", &self.path.to_string())
            .field("value", &"[redacted]")
            .field("description", &self.description)
            .finish()
    }
}

/// A secret as returned to callers: metadata plus, for single reads, the value.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Secret {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub description: String,
    pub organization_id: Uuid,
    pub project_id: Uuid,
    pub environment: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

impl Secret {
    #[must_use]
    pub fn from_metadata(metadata: SecretMetadata, value: Option<String>) -> Self {
        Self {
            name: metadata.name,
            value,
            description: metadata.description,
            organization_id: metadata.organization_id,
            project_id: metadata.project_id,
            environment: metadata.environment,
            created_by: metadata.created_by,
            created_at: metadata.created_at,
            updated_at: metadata.updated_at,
            version: metadata.version,
        }
    }

    /// Drop the value, keeping only metadata.
    #[must_use]
    pub fn without_value(mut self) -> Self {
        self.value = None;
        self
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("name", &self.name)
            .field("value", &self.value.as_ref().map(|_| "[redacted]"))
            .field("organization_id", &self.organization_id)
            .field("project_id", &self.project_id)
            .field("environment", &self.environment)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}
