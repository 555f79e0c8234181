//! Bearer authentication.
//!
//! Protected routes expect `Authorization: Bearer <access token>`. The
//! middleware verifies the token through the token service and injects the
//! caller's [`Identity`] into request extensions. Refresh tokens are
//! rejected here; they are only accepted by `POST /v1/auth/refresh`.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// The authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
}

fn unauthorized(message: &str) -> ApiError {
    ApiError::Unauthorized {
        error: "unauthorized",
        message: message.to_owned(),
    }
}

/// Axum middleware that authenticates API requests.
///
/// # Errors
///
/// Returns [`ApiError::Unauthorized`] if the header is missing, does not use
/// the Bearer scheme, or carries an invalid or expired access token.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(header) = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return Err(unauthorized("missing Authorization header"));
    };

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| unauthorized("Authorization header must use Bearer scheme"))?;

    let user_id = state.auth.verify_access(token)?;
    req.extensions_mut().insert(Identity { user_id });

    Ok(next.run(req).await)
}
