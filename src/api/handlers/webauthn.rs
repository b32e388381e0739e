//! Passkey sign-up and adding authenticators to signed-in accounts.
//!
//! Raw credential payloads are never logged.

use super::{ErrorBody, error_response, missing_payload, principal::require_user};
use crate::{
    lifecycle::{
        AddAuthenticatorVerifyRequest, Orchestrator, RegisteredAuthenticator,
        WebauthnSignUpRequest, WebauthnSignUpVerifyRequest,
    },
    session::SignInResponse,
};
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

/// `PublicKeyCredentialCreationOptions` to hand to `navigator.credentials.create`.
#[derive(ToSchema, Serialize, Debug)]
#[schema(value_type = Object)]
pub struct CredentialCreationOptions(pub Value);

#[utoipa::path(
    post,
    path = "/signup/webauthn",
    request_body = WebauthnSignUpRequest,
    responses(
        (status = 200, description = "Credential creation options", body = CredentialCreationOptions),
        (status = 409, description = "Email already in use, or WebAuthn disabled", body = ErrorBody)
    ),
    tag = "webauthn"
)]
#[instrument(skip_all)]
pub async fn sign_up_webauthn(
    orchestrator: Extension<Arc<Orchestrator>>,
    payload: Option<Json<WebauthnSignUpRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match orchestrator.sign_up_webauthn_begin(request).await {
        Ok(options) => (StatusCode::OK, Json(CredentialCreationOptions(options))).into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/signup/webauthn/verify",
    request_body = WebauthnSignUpVerifyRequest,
    responses(
        (status = 200, description = "Passkey registered; session present when sign-in is allowed right away", body = SignInResponse),
        (status = 401, description = "Expired challenge, rejected credential or disabled user", body = ErrorBody),
        (status = 404, description = "Unknown challenge", body = ErrorBody),
        (status = 409, description = "Email already in use", body = ErrorBody)
    ),
    tag = "webauthn"
)]
#[instrument(skip_all)]
pub async fn sign_up_webauthn_verify(
    orchestrator: Extension<Arc<Orchestrator>>,
    payload: Option<Json<WebauthnSignUpVerifyRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match orchestrator.sign_up_webauthn_verify(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/user/webauthn/add",
    params(
        ("Authorization" = String, Header, description = "Bearer access token")
    ),
    responses(
        (status = 200, description = "Credential creation options", body = CredentialCreationOptions),
        (status = 401, description = "Missing token or unverified user", body = ErrorBody),
        (status = 409, description = "WebAuthn disabled", body = ErrorBody)
    ),
    tag = "webauthn"
)]
#[instrument(skip_all)]
pub async fn add_authenticator(
    headers: HeaderMap,
    orchestrator: Extension<Arc<Orchestrator>>,
) -> impl IntoResponse {
    let claims = match require_user(&headers, &orchestrator) {
        Ok(claims) => claims,
        Err(err) => return error_response(&err),
    };

    match orchestrator.add_authenticator_begin(claims.user_id).await {
        Ok(options) => (StatusCode::OK, Json(CredentialCreationOptions(options))).into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/user/webauthn/verify",
    request_body = AddAuthenticatorVerifyRequest,
    params(
        ("Authorization" = String, Header, description = "Bearer access token")
    ),
    responses(
        (status = 200, description = "Authenticator stored", body = RegisteredAuthenticator),
        (status = 401, description = "Missing token, unverified user or rejected credential", body = ErrorBody),
        (status = 409, description = "Credential already registered, or WebAuthn disabled", body = ErrorBody)
    ),
    tag = "webauthn"
)]
#[instrument(skip_all)]
pub async fn add_authenticator_verify(
    headers: HeaderMap,
    orchestrator: Extension<Arc<Orchestrator>>,
    payload: Option<Json<AddAuthenticatorVerifyRequest>>,
) -> impl IntoResponse {
    let claims = match require_user(&headers, &orchestrator) {
        Ok(claims) => claims,
        Err(err) => return error_response(&err),
    };
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match orchestrator
        .add_authenticator_verify(claims.user_id, request)
        .await
    {
        Ok(authenticator) => (StatusCode::OK, Json(authenticator)).into_response(),
        Err(err) => error_response(&err),
    }
}
