//! Secret routes.
//!
//! CRUD on the secrets of one `{org}/{project}/{environment}` scope. Every
//! route requires membership in the organization, and every store call runs
//! under the request deadline from [`AppState::deadline`].

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use orgsecrets_core::coordinator::SecretListing;
use orgsecrets_core::models::{NewSecret, Scope, Secret, SecretPath, SecretUpdate};

use super::authorize_member;
use crate::auth::Identity;
use crate::error::ApiError;
use crate::state::AppState;

/// Request body for creating a secret.
#[derive(Deserialize)]
pub struct CreateSecretRequest {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub description: String,
}

/// Request body for updating a secret. A missing description keeps the
/// current one.
#[derive(Deserialize)]
pub struct UpdateSecretRequest {
    pub value: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Build the secrets router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/v1/orgs/{org_id}/projects/{project_id}/environments/{environment}/secrets",
            get(list_secrets).post(create_secret),
        )
        .route(
            "/v1/orgs/{org_id}/projects/{project_id}/environments/{environment}/secrets/{name}",
            get(read_secret).put(update_secret).delete(delete_secret),
        )
}

/// `GET …/secrets`: metadata of every secret in the scope, no values.
async fn list_secrets(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path((org_id, project_id, environment)): Path<(Uuid, Uuid, String)>,
) -> Result<Json<SecretListing>, ApiError> {
    let deadline = state.deadline();
    authorize_member(&state, org_id, identity.user_id, deadline).await?;
    let scope = Scope::new(org_id, project_id, environment)?;
    Ok(Json(state.secrets.list(&scope, deadline).await?))
}

/// `POST …/secrets`
async fn create_secret(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path((org_id, project_id, environment)): Path<(Uuid, Uuid, String)>,
    Json(body): Json<CreateSecretRequest>,
) -> Result<(StatusCode, Json<Secret>), ApiError> {
    let deadline = state.deadline();
    authorize_member(&state, org_id, identity.user_id, deadline).await?;
    let path = SecretPath::new(org_id, project_id, environment, body.name)?;
    let secret = state
        .secrets
        .create(
            NewSecret {
                path,
                value: body.value,
                description: body.description,
                created_by: identity.user_id,
            },
            deadline,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(secret)))
}

/// `GET …/secrets/{name}`: the secret with its value.
async fn read_secret(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path((org_id, project_id, environment, name)): Path<(Uuid, Uuid, String, String)>,
) -> Result<Json<Secret>, ApiError> {
    let deadline = state.deadline();
    authorize_member(&state, org_id, identity.user_id, deadline).await?;
    let path = SecretPath::new(org_id, project_id, environment, name)?;
    Ok(Json(state.secrets.read(&path, deadline).await?))
}

/// `PUT …/secrets/{name}`: replace the value, bumping the version.
async fn update_secret(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path((org_id, project_id, environment, name)): Path<(Uuid, Uuid, String, String)>,
    Json(body): Json<UpdateSecretRequest>,
) -> Result<Json<Secret>, ApiError> {
    let deadline = state.deadline();
    authorize_member(&state, org_id, identity.user_id, deadline).await?;
    let path = SecretPath::new(org_id, project_id, environment, name)?;
    let secret = state
        .secrets
        .update(
            SecretUpdate {
                path,
                value: body.value,
                description: body.description,
            },
            deadline,
        )
        .await?;
    Ok(Json(secret))
}

/// `DELETE …/secrets/{name}`: idempotent.
async fn delete_secret(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path((org_id, project_id, environment, name)): Path<(Uuid, Uuid, String, String)>,
) -> Result<StatusCode, ApiError> {
    let deadline = state.deadline();
    authorize_member(&state, org_id, identity.user_id, deadline).await?;
    let path = SecretPath::new(org_id, project_id, environment, name)?;
    state.secrets.delete(&path, deadline).await?;
    Ok(StatusCode::NO_CONTENT)
}
