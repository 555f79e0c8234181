//! Error types for `orgsecrets-core`.
//!
//! Each subsystem has its own enum and every variant carries enough context
//! to diagnose the problem from a single log line. Secret values, passwords
//! and raw tokens never appear in error messages.

use orgsecrets_storage::StorageError;
use uuid::Uuid;

/// Errors from the relational registry (users, organizations, quota ledger,
/// secret catalog, refresh rotation record).
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The registry could not be reached or the query failed.
    #[error("registry unavailable: {reason}")]
    Unavailable { reason: String },

    /// A uniqueness constraint rejected the write.
    #[error("registry conflict on '{constraint}'")]
    Conflict { constraint: String },

    /// A referenced row does not exist.
    #[error("{entity} not found")]
    NotFound { entity: &'static str },
}

/// Errors from registration, login and token operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Unknown email or wrong password. The two cases are indistinguishable.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// An account with this email already exists.
    #[error("user already exists")]
    UserExists,

    /// The request body is missing a required field.
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    /// Bad signature, malformed claims, wrong token type, or a replayed
    /// refresh token.
    #[error("invalid token")]
    InvalidToken,

    /// The token's `exp` is in the past.
    #[error("token expired")]
    TokenExpired,

    /// The token subject no longer resolves to a user.
    #[error("user not found")]
    UserNotFound,

    /// The user directory or rotation record failed.
    #[error("auth registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Hashing, signing, or a blocking task failed.
    #[error("auth internal error: {reason}")]
    Internal { reason: String },
}

/// Errors from organization management and membership checks.
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    /// The organization does not exist.
    #[error("organization {organization_id} not found")]
    OrganizationNotFound { organization_id: Uuid },

    /// Another organization already uses this name.
    #[error("organization name '{name}' is already taken")]
    NameConflict { name: String },

    /// The organization name is empty or too long.
    #[error("invalid organization name: {reason}")]
    InvalidName { reason: String },

    /// The caller is not allowed to act on this organization.
    #[error("forbidden: {reason}")]
    Forbidden { reason: String },

    /// The registry failed.
    #[error("account registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Errors from the secret lifecycle coordinator and the reconciler.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    /// The organization already holds as many secrets as its plan allows.
    #[error("organization {organization_id} reached its secret limit of {limit}")]
    QuotaExceeded { organization_id: Uuid, limit: i64 },

    /// No metadata row exists at the path.
    #[error("secret not found at '{path}'")]
    SecretNotFound { path: String },

    /// A secret already exists at the path.
    #[error("secret already exists at '{path}'")]
    SecretExists { path: String },

    /// Metadata and value store disagree about the path.
    #[error("inconsistent state at '{path}': {detail}")]
    InconsistentState { path: String, detail: String },

    /// The addressed organization does not exist.
    #[error("organization {organization_id} not found")]
    OrganizationNotFound { organization_id: Uuid },

    /// A path segment is empty, too long, or contains a separator.
    #[error("invalid secret path: {reason}")]
    InvalidPath { reason: String },

    /// The caller's deadline elapsed before the named step finished.
    #[error("deadline exceeded during {operation}")]
    DeadlineExceeded { operation: &'static str },

    /// A backing store failed.
    #[error("{store} unavailable: {reason}")]
    StoreUnavailable { store: &'static str, reason: String },
}

impl From<StorageError> for SecretError {
    fn from(err: StorageError) -> Self {
        Self::StoreUnavailable {
            store: "value store",
            reason: err.to_string(),
        }
    }
}

impl From<RegistryError> for SecretError {
    fn from(err: RegistryError) -> Self {
        Self::StoreUnavailable {
            store: "registry",
            reason: err.to_string(),
        }
    }
}
