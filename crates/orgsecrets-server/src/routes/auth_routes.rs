//! Account routes: registration, login, token refresh, and the current
//! user's profile.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};

use orgsecrets_core::auth::{Credentials, Registration};
use orgsecrets_core::models::UserDetails;
use orgsecrets_core::token::TokenPair;

use crate::auth::Identity;
use crate::error::ApiError;
use crate::state::AppState;

/// Token pair plus the signed-in user.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: UserDetails,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

/// Routes that do not require a token.
pub fn public_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/auth/register", post(register))
        .route("/v1/auth/login", post(login))
        .route("/v1/auth/refresh", post(refresh))
}

/// Routes for the authenticated user.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/auth/me", get(me))
        .route("/v1/auth/password", put(change_password))
        .route("/v1/auth/profile", put(update_profile))
}

/// `POST /v1/auth/register`: create an account and sign in.
async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Registration>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let (tokens, user) = state.auth.register(body).await?;
    Ok((StatusCode::CREATED, Json(SessionResponse { tokens, user })))
}

/// `POST /v1/auth/login`
async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Credentials>,
) -> Result<Json<SessionResponse>, ApiError> {
    let (tokens, user) = state.auth.login(body).await?;
    Ok(Json(SessionResponse { tokens, user }))
}

/// `POST /v1/auth/refresh`: exchange a refresh token for a new pair.
async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    Ok(Json(state.auth.refresh(&body.refresh_token).await?))
}

/// `GET /v1/auth/me`
async fn me(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<UserDetails>, ApiError> {
    Ok(Json(state.auth.current_user(identity.user_id).await?))
}

/// `PUT /v1/auth/password`
async fn change_password(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .auth
        .change_password(identity.user_id, &body.current_password, &body.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `PUT /v1/auth/profile`
async fn update_profile(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<UpdateProfileRequest>,
) -> Result<Json<UserDetails>, ApiError> {
    let user = state
        .auth
        .update_profile(identity.user_id, &body.first_name, &body.last_name)
        .await?;
    Ok(Json(user))
}
