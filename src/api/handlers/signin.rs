//! Sign-in by password, anonymously, or by emailed link.

use super::{ErrorBody, error_response, missing_payload, ok};
use crate::{
    lifecycle::{
        AnonymousSignInRequest, EmailPasswordSignInRequest, Orchestrator,
        PasswordlessEmailRequest,
    },
    session::SignInResponse,
};
use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use std::sync::Arc;
use tracing::instrument;

#[utoipa::path(
    post,
    path = "/signin/email-password",
    request_body = EmailPasswordSignInRequest,
    responses(
        (status = 200, description = "Session, or an MFA ticket when a second factor is active", body = SignInResponse),
        (status = 401, description = "Bad credentials, disabled or unverified user", body = ErrorBody)
    ),
    tag = "signin"
)]
#[instrument(skip_all)]
pub async fn sign_in_email_password(
    orchestrator: Extension<Arc<Orchestrator>>,
    payload: Option<Json<EmailPasswordSignInRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match orchestrator.sign_in_email_password(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/signin/anonymous",
    request_body = AnonymousSignInRequest,
    responses(
        (status = 200, description = "Session for a new anonymous user", body = SignInResponse),
        (status = 409, description = "Anonymous users are disabled", body = ErrorBody)
    ),
    tag = "signin"
)]
#[instrument(skip_all)]
pub async fn sign_in_anonymous(
    orchestrator: Extension<Arc<Orchestrator>>,
    payload: Option<Json<AnonymousSignInRequest>>,
) -> impl IntoResponse {
    // Every field is optional, so an empty request is fine.
    let request = payload.map(|Json(request)| request).unwrap_or_default();

    match orchestrator.sign_in_anonymous(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/signin/passwordless/email",
    request_body = PasswordlessEmailRequest,
    responses(
        (status = 200, description = "Sign-in link sent"),
        (status = 400, description = "Invalid request or redirect", body = ErrorBody),
        (status = 409, description = "Passwordless sign-in is disabled", body = ErrorBody)
    ),
    tag = "signin"
)]
#[instrument(skip_all)]
pub async fn sign_in_passwordless_email(
    orchestrator: Extension<Arc<Orchestrator>>,
    payload: Option<Json<PasswordlessEmailRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match orchestrator.sign_in_passwordless_email(request).await {
        Ok(()) => ok(),
        Err(err) => error_response(&err),
    }
}
