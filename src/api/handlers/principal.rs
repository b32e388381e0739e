//! Bearer token authentication for the `/user/*` routes.

use crate::{claims::AccessClaims, error::AuthError, lifecycle::Orchestrator};
use axum::http::{HeaderMap, header::AUTHORIZATION};

/// Token of an `Authorization: Bearer <token>` header, scheme case-insensitive.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Resolve the caller's access token into claims.
///
/// # Errors
/// `Unauthenticated` when the header is missing or the token does not verify.
pub fn require_user(
    headers: &HeaderMap,
    orchestrator: &Orchestrator,
) -> Result<AccessClaims, AuthError> {
    let token = bearer_token(headers).ok_or(AuthError::Unauthenticated)?;
    orchestrator.authenticate(token)
}
