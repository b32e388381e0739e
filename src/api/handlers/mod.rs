//! Route handlers.
//!
//! Each handler maps one request onto one [`crate::lifecycle::Orchestrator`]
//! flow. Failures become the JSON body built by [`error_response`]; only
//! `/verify` answers with a redirect instead.

mod error;
pub mod health;
pub mod principal;
pub mod signin;
pub mod signup;
pub mod token;
pub mod user;
pub mod verify;
pub mod webauthn;

pub use error::{ErrorBody, error_response, missing_payload, status_for};

use axum::{http::StatusCode, response::IntoResponse};

/// Plain acknowledgement for flows whose only effect is an email.
pub(crate) fn ok() -> axum::response::Response {
    (StatusCode::OK, "OK").into_response()
}
