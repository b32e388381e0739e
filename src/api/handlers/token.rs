//! Refresh token exchange and sign-out.

use super::{ErrorBody, error_response, missing_payload, ok};
use crate::{
    lifecycle::{Orchestrator, RefreshTokenRequest, SignOutRequest},
    session::Session,
};
use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use std::sync::Arc;
use tracing::instrument;

#[utoipa::path(
    post,
    path = "/token",
    request_body = RefreshTokenRequest,
    responses(
        (status = 200, description = "New access token, same refresh token with extended expiry", body = Session),
        (status = 401, description = "Unknown or expired refresh token, or disabled user", body = ErrorBody)
    ),
    tag = "token"
)]
#[instrument(skip_all)]
pub async fn refresh(
    orchestrator: Extension<Arc<Orchestrator>>,
    payload: Option<Json<RefreshTokenRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match orchestrator.refresh(request).await {
        Ok(session) => (StatusCode::OK, Json(session)).into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/signout",
    request_body = SignOutRequest,
    responses(
        (status = 200, description = "Refresh token revoked (idempotent)"),
        (status = 503, description = "Identity store unavailable", body = ErrorBody)
    ),
    tag = "token"
)]
#[instrument(skip_all)]
pub async fn sign_out(
    orchestrator: Extension<Arc<Orchestrator>>,
    payload: Option<Json<SignOutRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match orchestrator.sign_out(request).await {
        Ok(()) => ok(),
        Err(err) => error_response(&err),
    }
}
