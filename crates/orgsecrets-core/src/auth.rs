//! User registration, login and profile management.
//!
//! [`AuthService`] combines the [`UserDirectory`] (the persisted users) with
//! the [`TokenService`]. Passwords are verified with Argon2id; unknown emails
//! and wrong passwords both surface as [`AuthError::InvalidCredentials`] and
//! cost the same amount of hashing work.

use std::sync::Arc;

use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::credentials;
use crate::error::{AuthError, RegistryError};
use crate::models::{NewUser, User, UserDetails};
use crate::token::{TokenPair, TokenService};

/// Persisted user accounts.
#[async_trait::async_trait]
pub trait UserDirectory: Send + Sync {
    /// Insert a user. Fails with [`RegistryError::Conflict`] if the email is
    /// taken.
    async fn create_user(&self, new: NewUser) -> Result<User, RegistryError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RegistryError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RegistryError>;

    /// Replace the stored password hash. Fails with
    /// [`RegistryError::NotFound`] if the user is gone.
    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), RegistryError>;

    /// Replace first and last name. Fails with [`RegistryError::NotFound`]
    /// if the user is gone.
    async fn update_profile(
        &self,
        id: Uuid,
        first_name: &str,
        last_name: &str,
    ) -> Result<User, RegistryError>;
}

/// Email and password as submitted by a client.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"[redacted]")
            .finish()
    }
}

/// A new account request.
#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    #[serde(flatten)]
    pub credentials: Credentials,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn require_credentials(credentials: &Credentials) -> Result<String, AuthError> {
    let email = normalize_email(&credentials.email);
    if email.is_empty() || credentials.password.is_empty() {
        return Err(AuthError::InvalidInput {
            reason: "email and password are required".to_owned(),
        });
    }
    Ok(email)
}

/// Account-level authentication operations.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserDirectory>,
    tokens: Arc<TokenService>,
}

impl AuthService {
    #[must_use]
    pub fn new(users: Arc<dyn UserDirectory>, tokens: Arc<TokenService>) -> Self {
        Self { users, tokens }
    }

    /// The token service used to mint and verify tokens.
    #[must_use]
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Create an account and sign the new user in.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidInput`] on an empty email or password,
    /// [`AuthError::UserExists`] if the email is taken.
    pub async fn register(
        &self,
        registration: Registration,
    ) -> Result<(TokenPair, UserDetails), AuthError> {
        let email = require_credentials(&registration.credentials)?;

        if self.users.find_by_email(&email).await?.is_some() {
            return Err(AuthError::UserExists);
        }

        let password_hash = credentials::hash_password(&registration.credentials.password).await?;
        let user = self
            .users
            .create_user(NewUser {
                email,
                password_hash,
                first_name: registration.first_name,
                last_name: registration.last_name,
            })
            .await
            .map_err(|e| match e {
                // Lost a race with a concurrent registration.
                RegistryError::Conflict { .. } => AuthError::UserExists,
                other => AuthError::Registry(other),
            })?;

        info!(user_id = %user.id, "user registered");
        let pair = self.tokens.issue_pair(user.id)?;
        Ok((pair, UserDetails::from(&user)))
    }

    /// Check credentials and mint a pair.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidCredentials`] for an unknown email or a wrong
    /// password.
    pub async fn login(
        &self,
        credentials: Credentials,
    ) -> Result<(TokenPair, UserDetails), AuthError> {
        let email = require_credentials(&credentials)?;

        let Some(user) = self.users.find_by_email(&email).await? else {
            credentials::verify_dummy(&credentials.password).await;
            return Err(AuthError::InvalidCredentials);
        };

        if !credentials::verify_password(&credentials.password, &user.password_hash).await? {
            return Err(AuthError::InvalidCredentials);
        }

        info!(user_id = %user.id, "user logged in");
        let pair = self.tokens.issue_pair(user.id)?;
        Ok((pair, UserDetails::from(&user)))
    }

    /// Exchange a refresh token for a new pair.
    ///
    /// # Errors
    ///
    /// See [`TokenService::refresh`].
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        self.tokens.refresh(refresh_token, self.users.as_ref()).await
    }

    /// Validate an access token and return its subject.
    ///
    /// # Errors
    ///
    /// See [`TokenService::verify_access`].
    pub fn verify_access(&self, token: &str) -> Result<Uuid, AuthError> {
        self.tokens.verify_access(token)
    }

    /// Load the authenticated user's details.
    ///
    /// # Errors
    ///
    /// [`AuthError::UserNotFound`] if the user no longer exists.
    pub async fn current_user(&self, user_id: Uuid) -> Result<UserDetails, AuthError> {
        self.users
            .find_by_id(user_id)
            .await?
            .map(|u| UserDetails::from(&u))
            .ok_or(AuthError::UserNotFound)
    }

    /// Replace the user's password after checking the current one.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidCredentials`] if `current` is wrong,
    /// [`AuthError::InvalidInput`] if `new` is empty.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current: &str,
        new: &str,
    ) -> Result<(), AuthError> {
        if new.is_empty() {
            return Err(AuthError::InvalidInput {
                reason: "new password is required".to_owned(),
            });
        }
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if !credentials::verify_password(current, &user.password_hash).await? {
            return Err(AuthError::InvalidCredentials);
        }

        let hash = credentials::hash_password(new).await?;
        self.users
            .update_password(user_id, &hash)
            .await
            .map_err(not_found_as_user)?;
        info!(user_id = %user_id, "password changed");
        Ok(())
    }

    /// Replace first and last name.
    ///
    /// # Errors
    ///
    /// [`AuthError::UserNotFound`] if the user no longer exists.
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        first_name: &str,
        last_name: &str,
    ) -> Result<UserDetails, AuthError> {
        let user = self
            .users
            .update_profile(user_id, first_name.trim(), last_name.trim())
            .await
            .map_err(not_found_as_user)?;
        Ok(UserDetails::from(&user))
    }
}

fn not_found_as_user(err: RegistryError) -> AuthError {
    match err {
        RegistryError::NotFound { .. } => AuthError::UserNotFound,
        other => AuthError::Registry(other),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::MemoryUserDirectory;
    use chrono::Duration;

    fn service() -> AuthService {
        let tokens = TokenService::new(
            b"0123456789abcdef0123456789abcdef",
            Duration::minutes(15),
            Duration::days(7),
        );
        AuthService::new(Arc::new(MemoryUserDirectory::new()), Arc::new(tokens))
    }

    fn registration(email: &str, password: &str) -> Registration {
        Registration {
            credentials: Credentials {
                email: email.to_owned(),
                password: password.to_owned(),
            },
            first_name: "Ada".to_owned(),
            last_name: "Lovelace".to_owned(),
        }
    }

    fn creds(email: &str, password: &str) -> Credentials {
        Credentials {
            email: email.to_owned(),
            password: password.to_owned(),
        }
    }

    #[tokio::test]
    async fn register_then_login() {
        let svc = service();
        let (pair, user) = svc.register(registration("ada@example.com", "pw")).await.unwrap();
        assert_eq!(svc.verify_access(&pair.access_token).unwrap(), user.id);

        let (_, again) = svc.login(creds("ADA@example.com ", "pw")).await.unwrap();
        assert_eq!(again.id, user.id);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let svc = service();
        svc.register(registration("ada@example.com", "pw")).await.unwrap();
        assert!(matches!(
            svc.register(registration("ada@example.com", "other")).await,
            Err(AuthError::UserExists)
        ));
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_look_the_same() {
        let svc = service();
        svc.register(registration("ada@example.com", "pw")).await.unwrap();

        let wrong_pw = svc.login(creds("ada@example.com", "nope")).await.unwrap_err();
        let unknown = svc.login(creds("bob@example.com", "pw")).await.unwrap_err();
        assert!(matches!(wrong_pw, AuthError::InvalidCredentials));
        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert_eq!(wrong_pw.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn empty_credentials_are_invalid_input() {
        let svc = service();
        assert!(matches!(
            svc.register(registration("", "pw")).await,
            Err(AuthError::InvalidInput { .. })
        ));
        assert!(matches!(
            svc.login(creds("ada@example.com", "")).await,
            Err(AuthError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn change_password_requires_current() {
        let svc = service();
        let (_, user) = svc.register(registration("ada@example.com", "old")).await.unwrap();

        assert!(matches!(
            svc.change_password(user.id, "wrong", "new").await,
            Err(AuthError::InvalidCredentials)
        ));
        svc.change_password(user.id, "old", "new").await.unwrap();

        assert!(svc.login(creds("ada@example.com", "old")).await.is_err());
        svc.login(creds("ada@example.com", "new")).await.unwrap();
    }

    #[tokio::test]
    async fn update_profile_and_current_user() {
        let svc = service();
        let (_, user) = svc.register(registration("ada@example.com", "pw")).await.unwrap();
        let updated = svc.update_profile(user.id, " Grace ", "Hopper").await.unwrap();
        assert_eq!(updated.first_name, "Grace");
        assert_eq!(svc.current_user(user.id).await.unwrap().last_name, "Hopper");
        assert!(matches!(
            svc.current_user(Uuid::new_v4()).await,
            Err(AuthError::UserNotFound)
        ));
    }
}
