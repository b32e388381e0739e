//! Account maintenance: password reset and change, email change, resending
//! the verification email and deanonymization.

use super::{ErrorBody, error_response, missing_payload, ok, principal::require_user};
use crate::lifecycle::{
    ChangePasswordRequest, DeanonymizeRequest, EmailChangeRequest, Orchestrator,
    PasswordResetRequest, SendVerificationEmailRequest,
};
use axum::{Json, extract::Extension, http::HeaderMap, response::IntoResponse};
use std::sync::Arc;
use tracing::instrument;

#[utoipa::path(
    post,
    path = "/user/password/reset",
    request_body = PasswordResetRequest,
    responses(
        (status = 200, description = "Password reset link sent"),
        (status = 400, description = "Invalid request or redirect", body = ErrorBody),
        (status = 404, description = "Unknown or disabled user", body = ErrorBody)
    ),
    tag = "user"
)]
#[instrument(skip_all)]
pub async fn request_password_reset(
    orchestrator: Extension<Arc<Orchestrator>>,
    payload: Option<Json<PasswordResetRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match orchestrator.request_password_reset(request).await {
        Ok(()) => ok(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/user/password",
    request_body = ChangePasswordRequest,
    params(
        ("Authorization" = String, Header, description = "Bearer access token")
    ),
    responses(
        (status = 200, description = "Password changed"),
        (status = 400, description = "Password too short", body = ErrorBody),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody)
    ),
    tag = "user"
)]
#[instrument(skip_all)]
pub async fn change_password(
    headers: HeaderMap,
    orchestrator: Extension<Arc<Orchestrator>>,
    payload: Option<Json<ChangePasswordRequest>>,
) -> impl IntoResponse {
    let claims = match require_user(&headers, &orchestrator) {
        Ok(claims) => claims,
        Err(err) => return error_response(&err),
    };
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match orchestrator.change_password(claims.user_id, request).await {
        Ok(()) => ok(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/user/email/change",
    request_body = EmailChangeRequest,
    params(
        ("Authorization" = String, Header, description = "Bearer access token")
    ),
    responses(
        (status = 200, description = "Confirmation link sent to the new address"),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody),
        (status = 403, description = "Anonymous users cannot change email", body = ErrorBody),
        (status = 409, description = "Email already in use", body = ErrorBody)
    ),
    tag = "user"
)]
#[instrument(skip_all)]
pub async fn request_email_change(
    headers: HeaderMap,
    orchestrator: Extension<Arc<Orchestrator>>,
    payload: Option<Json<EmailChangeRequest>>,
) -> impl IntoResponse {
    let claims = match require_user(&headers, &orchestrator) {
        Ok(claims) => claims,
        Err(err) => return error_response(&err),
    };
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match orchestrator
        .request_email_change(claims.user_id, request)
        .await
    {
        Ok(()) => ok(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/user/email/send-verification-email",
    request_body = SendVerificationEmailRequest,
    responses(
        (status = 200, description = "Verification link sent"),
        (status = 400, description = "Email already verified", body = ErrorBody),
        (status = 404, description = "Unknown user", body = ErrorBody)
    ),
    tag = "user"
)]
#[instrument(skip_all)]
pub async fn send_verification_email(
    orchestrator: Extension<Arc<Orchestrator>>,
    payload: Option<Json<SendVerificationEmailRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match orchestrator.resend_verification_email(request).await {
        Ok(()) => ok(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/user/deanonymize",
    request_body = DeanonymizeRequest,
    params(
        ("Authorization" = String, Header, description = "Bearer access token")
    ),
    responses(
        (status = 200, description = "Account converted; sign in again once verified"),
        (status = 400, description = "Not anonymous or invalid request", body = ErrorBody),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody),
        (status = 409, description = "Email already in use", body = ErrorBody)
    ),
    tag = "user"
)]
#[instrument(skip_all)]
pub async fn deanonymize(
    headers: HeaderMap,
    orchestrator: Extension<Arc<Orchestrator>>,
    payload: Option<Json<DeanonymizeRequest>>,
) -> impl IntoResponse {
    let claims = match require_user(&headers, &orchestrator) {
        Ok(claims) => claims,
        Err(err) => return error_response(&err),
    };
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match orchestrator.deanonymize(claims.user_id, request).await {
        Ok(()) => ok(),
        Err(err) => error_response(&err),
    }
}
