//! Access/refresh token issuance and validation.
//!
//! Tokens are HS256 JWTs carrying a fixed claim set:
//!
//! ```text
//! { "sub": <user uuid>, "type": "access" | "refresh", "iat": <unix>, "exp": <unix>, "jti": <uuid> }
//! ```
//!
//! Claims are parsed into [`Claims`] with unknown fields rejected, so a token
//! minted by anything else sharing the secret does not parse. Expiry is
//! checked with zero leeway.
//!
//! # Refresh rotation
//!
//! Without a [`RefreshRotation`] record, a refresh token can be replayed
//! until it expires. With one, every successful refresh records the token's
//! `jti`, and presenting the same refresh token again fails with
//! [`AuthError::InvalidToken`]. A record is only needed until the token's
//! `exp`; after that the token fails on expiry and the record can be purged.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::UserDirectory;
use crate::error::{AuthError, RegistryError};

/// Which half of a pair a token is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// The full claim set of an issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Claims {
    pub sub: Uuid,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
}

/// A freshly minted access/refresh pair.
#[derive(Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &"[redacted]")
            .field("access_expires_at", &self.access_expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish()
    }
}

/// Record of refresh tokens that have already been exchanged.
#[async_trait::async_trait]
pub trait RefreshRotation: Send + Sync {
    /// Mark `jti` as consumed.
    ///
    /// Returns `true` the first time a `jti` is consumed and `false` on every
    /// later call. Must be atomic under concurrent calls for the same `jti`.
    async fn consume(&self, jti: Uuid, expires_at: DateTime<Utc>) -> Result<bool, RegistryError>;

    /// Drop records whose token expired before `now`. Returns how many were
    /// removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RegistryError>;
}

/// Mints and validates token pairs.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,
    rotation: Option<Arc<dyn RefreshRotation>>,
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("rotation", &self.rotation.is_some())
            .finish_non_exhaustive()
    }
}

fn unix_to_datetime(secs: i64) -> Result<DateTime<Utc>, AuthError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| AuthError::Internal {
            reason: format!("timestamp {secs} out of range"),
        })
}

impl TokenService {
    /// Create a service signing with `secret`.
    #[must_use]
    pub fn new(secret: &[u8], access_ttl: Duration, refresh_ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            access_ttl,
            refresh_ttl,
            rotation: None,
        }
    }

    /// Make refresh tokens single-use, recording consumption in `rotation`.
    #[must_use]
    pub fn with_rotation(mut self, rotation: Arc<dyn RefreshRotation>) -> Self {
        self.rotation = Some(rotation);
        self
    }

    /// Mint a new pair for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Internal`] if signing fails.
    pub fn issue_pair(&self, user_id: Uuid) -> Result<TokenPair, AuthError> {
        self.issue_pair_at(user_id, Utc::now())
    }

    fn issue_pair_at(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<TokenPair, AuthError> {
        let (access_token, access_exp) = self.mint(TokenKind::Access, user_id, now)?;
        let (refresh_token, refresh_exp) = self.mint(TokenKind::Refresh, user_id, now)?;
        Ok(TokenPair {
            access_token,
            refresh_token,
            access_expires_at: unix_to_datetime(access_exp)?,
            refresh_expires_at: unix_to_datetime(refresh_exp)?,
        })
    }

    fn mint(
        &self,
        kind: TokenKind,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(String, i64), AuthError> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let iat = now.timestamp();
        let exp = (now + ttl).timestamp();
        let claims = Claims {
            sub: user_id,
            kind,
            iat,
            exp,
            jti: Uuid::new_v4(),
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal {
                reason: format!("failed to sign token: {e}"),
            })?;
        Ok((token, exp))
    }

    /// Parse and validate a token of any kind.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TokenExpired`] once `exp` has passed, and
    /// [`AuthError::InvalidToken`] for every other signature or claim failure.
    pub fn parse(&self, token: &str) -> Result<Claims, AuthError> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                other => {
                    debug!(reason = ?other, "token rejected");
                    AuthError::InvalidToken
                }
            })
    }

    /// Validate an access token and return its subject.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidToken`] if the token is malformed, badly signed, or
    /// a refresh token; [`AuthError::TokenExpired`] if it has expired.
    pub fn verify_access(&self, token: &str) -> Result<Uuid, AuthError> {
        let claims = self.parse(token)?;
        if claims.kind != TokenKind::Access {
            return Err(AuthError::InvalidToken);
        }
        Ok(claims.sub)
    }

    /// Exchange a refresh token for a new pair.
    ///
    /// The subject is re-resolved through `users` so deleted accounts cannot
    /// refresh.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidToken`] if the token is not a valid refresh token
    /// or was already exchanged, [`AuthError::TokenExpired`] if it expired,
    /// [`AuthError::UserNotFound`] if the subject is gone.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        users: &dyn UserDirectory,
    ) -> Result<TokenPair, AuthError> {
        let claims = self.parse(refresh_token)?;
        if claims.kind != TokenKind::Refresh {
            return Err(AuthError::InvalidToken);
        }

        if users.find_by_id(claims.sub).await?.is_none() {
            return Err(AuthError::UserNotFound);
        }

        if let Some(rotation) = &self.rotation {
            let expires_at = unix_to_datetime(claims.exp)?;
            if !rotation.consume(claims.jti, expires_at).await? {
                warn!(user_id = %claims.sub, jti = %claims.jti, "refresh token replayed");
                return Err(AuthError::InvalidToken);
            }
        }

        self.issue_pair(claims.sub)
    }

    /// Purge spent rotation records. A no-op without a rotation record.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the record cannot be purged.
    pub async fn purge_consumed(&self) -> Result<u64, RegistryError> {
        match &self.rotation {
            Some(rotation) => rotation.purge_expired(Utc::now()).await,
            None => Ok(0),
        }
    }
}
