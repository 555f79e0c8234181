//! HTTP route handlers.
//!
//! Everything lives under `/v1`. Registration, login, refresh and health are
//! public; every other route requires a bearer access token. Routes under
//! `/v1/orgs/{org}` additionally require membership and count one API call
//! against the organization.

pub mod auth_routes;
pub mod health;
pub mod orgs;
pub mod secrets;

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderValue, Method, header};
use axum::middleware as axum_mw;
use orgsecrets_core::deadline::Deadline;
use orgsecrets_core::models::MemberRole;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::auth::auth_middleware;
use crate::error::ApiError;
use crate::state::AppState;

/// Run a registry call under the request deadline.
pub(crate) async fn within<T, E>(
    deadline: Deadline,
    operation: &'static str,
    call: impl Future<Output = Result<T, E>>,
) -> Result<T, ApiError>
where
    ApiError: From<E>,
{
    Ok(deadline.run(operation, call).await??)
}

/// Require membership and record one API call for the organization.
///
/// A failure to record the call is logged and does not fail the request.
pub(crate) async fn authorize_member(
    state: &AppState,
    organization_id: Uuid,
    user_id: Uuid,
    deadline: Deadline,
) -> Result<MemberRole, ApiError> {
    let role = within(
        deadline,
        "membership check",
        state.accounts.require_member(organization_id, user_id),
    )
    .await?;
    record_api_call(state, organization_id, deadline).await;
    Ok(role)
}

pub(crate) async fn record_api_call(state: &AppState, organization_id: Uuid, deadline: Deadline) {
    if let Err(e) = within(
        deadline,
        "api call accounting",
        state.ledger.increment_api_call(organization_id),
    )
    .await
    {
        tracing::warn!(organization_id = %organization_id, error = %e, "failed to record api call");
    }
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    // Password hashing is expensive; bound concurrent public auth requests.
    let public_routes = auth_routes::public_router()
        .layer(tower::limit::ConcurrencyLimitLayer::new(10));

    let authenticated_routes = Router::new()
        .merge(auth_routes::router())
        .merge(orgs::router())
        .merge(secrets::router())
        .route_layer(axum_mw::from_fn_with_state(
            Arc::clone(&state),
            auth_middleware,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .merge(public_routes)
        .merge(authenticated_routes)
        .merge(health::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}
