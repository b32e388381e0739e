//! Account creation by email and password.

use super::{ErrorBody, error_response, missing_payload};
use crate::{
    lifecycle::{EmailPasswordSignUpRequest, Orchestrator},
    session::SignInResponse,
};
use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use std::sync::Arc;
use tracing::instrument;

#[utoipa::path(
    post,
    path = "/signup/email-password",
    request_body = EmailPasswordSignUpRequest,
    responses(
        (status = 200, description = "Account created; session present when sign-in is allowed right away", body = SignInResponse),
        (status = 400, description = "Invalid request or redirect", body = ErrorBody),
        (status = 409, description = "Email already in use", body = ErrorBody)
    ),
    tag = "signup"
)]
#[instrument(skip_all)]
pub async fn sign_up_email_password(
    orchestrator: Extension<Arc<Orchestrator>>,
    payload: Option<Json<EmailPasswordSignUpRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match orchestrator.sign_up_email_password(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => error_response(&err),
    }
}
