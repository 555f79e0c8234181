//! Organization routes: creation, details, usage, subscriptions, and
//! on-demand reconciliation.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use orgsecrets_core::models::{NewSubscription, Organization, Subscription};
use orgsecrets_core::quota::UsageReport;
use orgsecrets_core::reconcile::ReconcileReport;

use super::{authorize_member, record_api_call, within};
use crate::auth::Identity;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateOrgRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct ActivateSubscriptionRequest {
    pub plan_id: String,
    pub secrets_limit: i64,
    /// Defaults to now.
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReconcileParams {
    #[serde(default)]
    pub repair: bool,
}

/// Build the organizations router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/orgs", post(create_org))
        .route("/v1/orgs/{org_id}", get(get_org))
        .route("/v1/orgs/{org_id}/usage", get(usage))
        .route("/v1/orgs/{org_id}/subscriptions", post(activate_subscription))
        .route("/v1/orgs/{org_id}/reconcile", post(reconcile))
}

/// `POST /v1/orgs`: create an organization owned by the caller.
async fn create_org(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<CreateOrgRequest>,
) -> Result<(StatusCode, Json<Organization>), ApiError> {
    let org = within(
        state.deadline(),
        "organization creation",
        state
            .accounts
            .create_organization(identity.user_id, &body.name, &body.description),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(org)))
}

/// `GET /v1/orgs/{org_id}`
async fn get_org(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(org_id): Path<Uuid>,
) -> Result<Json<Organization>, ApiError> {
    let deadline = state.deadline();
    let org = within(
        deadline,
        "membership check",
        state.accounts.organization_for_member(org_id, identity.user_id),
    )
    .await?;
    record_api_call(&state, org_id, deadline).await;
    Ok(Json(org))
}

/// `GET /v1/orgs/{org_id}/usage`
async fn usage(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(org_id): Path<Uuid>,
) -> Result<Json<UsageReport>, ApiError> {
    let deadline = state.deadline();
    authorize_member(&state, org_id, identity.user_id, deadline).await?;
    Ok(Json(
        within(deadline, "usage report", state.ledger.usage(org_id)).await?,
    ))
}

/// `POST /v1/orgs/{org_id}/subscriptions`: activate a plan, cancelling the
/// current one. Owner only.
async fn activate_subscription(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(org_id): Path<Uuid>,
    Json(body): Json<ActivateSubscriptionRequest>,
) -> Result<(StatusCode, Json<Subscription>), ApiError> {
    let deadline = state.deadline();
    within(
        deadline,
        "ownership check",
        state.accounts.require_owner(org_id, identity.user_id),
    )
    .await?;

    let start_date = body.start_date.unwrap_or_else(Utc::now);
    if body.plan_id.trim().is_empty() {
        return Err(ApiError::InvalidInput("plan_id is required".to_owned()));
    }
    if body.secrets_limit < 0 {
        return Err(ApiError::InvalidInput(
            "secrets_limit must not be negative".to_owned(),
        ));
    }
    if body.end_date <= start_date {
        return Err(ApiError::InvalidInput(
            "end_date must be after start_date".to_owned(),
        ));
    }

    let subscription = within(
        deadline,
        "subscription activation",
        state.ledger.activate_subscription(NewSubscription {
            organization_id: org_id,
            plan_id: body.plan_id.trim().to_owned(),
            secrets_limit: body.secrets_limit,
            start_date,
            end_date: body.end_date,
        }),
    )
    .await?;

    info!(
        organization_id = %org_id,
        plan_id = %subscription.plan_id,
        secrets_limit = subscription.secrets_limit,
        "subscription activated"
    );
    Ok((StatusCode::CREATED, Json(subscription)))
}

/// `POST /v1/orgs/{org_id}/reconcile?repair=bool`: sweep the organization
/// for drift between stores. Owner only.
async fn reconcile(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(org_id): Path<Uuid>,
    Query(params): Query<ReconcileParams>,
) -> Result<Json<ReconcileReport>, ApiError> {
    within(
        state.deadline(),
        "ownership check",
        state.accounts.require_owner(org_id, identity.user_id),
    )
    .await?;
    // The sweep itself is bounded by the compensation budget per repair, not
    // by the request deadline.
    let report = state
        .reconciler
        .sweep_organization(org_id, params.repair)
        .await?;
    Ok(Json(report))
}
