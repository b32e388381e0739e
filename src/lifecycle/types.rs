//! Typed request bodies, one per flow.

use crate::store::Authenticator;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// Profile settings applied when an account is created or deanonymized.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignUpOptions {
    pub redirect_to: Option<String>,
    pub locale: Option<String>,
    pub default_role: Option<String>,
    /// Must be a subset of the configured default allowed roles.
    pub allowed_roles: Option<Vec<String>>,
    pub display_name: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RedirectOptions {
    pub redirect_to: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EmailPasswordSignUpRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub options: SignUpOptions,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EmailPasswordSignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct AnonymousSignInRequest {
    pub display_name: Option<String>,
    pub locale: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PasswordlessEmailRequest {
    pub email: String,
    #[serde(default)]
    pub options: SignUpOptions,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SignOutRequest {
    pub refresh_token: String,
    /// Revoke every refresh token of the owner instead of just this one.
    #[serde(default)]
    pub all: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PasswordResetRequest {
    pub email: String,
    #[serde(default)]
    pub options: RedirectOptions,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub new_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EmailChangeRequest {
    pub new_email: String,
    #[serde(default)]
    pub options: RedirectOptions,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SendVerificationEmailRequest {
    pub email: String,
    #[serde(default)]
    pub options: RedirectOptions,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DeanonymizeMethod {
    EmailPassword,
    Passwordless,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeanonymizeRequest {
    pub sign_in_method: DeanonymizeMethod,
    pub email: String,
    /// Required for `email-password`.
    pub password: Option<String>,
    #[serde(default)]
    pub options: SignUpOptions,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WebauthnSignUpRequest {
    pub email: String,
    #[serde(default)]
    pub options: SignUpOptions,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct WebauthnVerifyOptions {
    pub redirect_to: Option<String>,
    pub nickname: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WebauthnSignUpVerifyRequest {
    /// `RegistrationResponseJSON` from the browser.
    #[schema(value_type = Object)]
    pub credential: Value,
    #[serde(default)]
    pub options: WebauthnVerifyOptions,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AddAuthenticatorVerifyRequest {
    #[schema(value_type = Object)]
    pub credential: Value,
    pub nickname: Option<String>,
}

/// Query of `GET /verify`. Every field is optional so that a mangled link
/// still ends in a redirect instead of a rejected request.
#[derive(IntoParams, Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct VerifyQuery {
    pub ticket: Option<String>,
    #[serde(rename = "type")]
    #[param(rename = "type")]
    pub kind: Option<String>,
    pub redirect_to: Option<String>,
}

/// Outcome of a redemption: always a redirect target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyRedirect {
    pub location: String,
    pub error: Option<&'static str>,
}

/// A stored authenticator as reported to its owner.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredAuthenticator {
    pub id: Uuid,
    pub credential_id: String,
    pub nickname: Option<String>,
}

impl From<Authenticator> for RegisteredAuthenticator {
    fn from(authenticator: Authenticator) -> Self {
        Self {
            id: authenticator.id,
            credential_id: authenticator.credential_id,
            nickname: authenticator.nickname,
        }
    }
}
