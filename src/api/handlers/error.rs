use crate::error::{AuthError, ConflictReason};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use utoipa::ToSchema;

/// Error payload returned by every JSON endpoint.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub status: u16,
    /// Stable kebab-case code, e.g. `email-already-in-use`.
    pub error: String,
    pub message: String,
}

#[must_use]
pub fn status_for(err: &AuthError) -> StatusCode {
    match err {
        AuthError::NotFound(_) => StatusCode::NOT_FOUND,
        AuthError::Expired(_)
        | AuthError::Disabled
        | AuthError::Unverified
        | AuthError::InvalidCredential(_)
        | AuthError::InvalidRefreshToken
        | AuthError::Unauthenticated => StatusCode::UNAUTHORIZED,
        AuthError::Conflict(ConflictReason::ForbiddenAnonymous) => StatusCode::FORBIDDEN,
        AuthError::Conflict(ConflictReason::NotAnonymous | ConflictReason::EmailAlreadyVerified)
        | AuthError::RedirectNotAllowed(_)
        | AuthError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        AuthError::Conflict(_) | AuthError::DisabledEndpoint => StatusCode::CONFLICT,
        AuthError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        AuthError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Render an engine error. Server-side details stay in the logs.
#[must_use]
pub fn error_response(err: &AuthError) -> Response {
    let status = status_for(err);
    match err {
        AuthError::Transient(_) => error!(code = err.code(), "transient failure: {err}"),
        AuthError::Configuration(_) => error!(code = err.code(), "internal failure: {err}"),
        _ => debug!(code = err.code(), "request rejected: {err}"),
    }
    let message = err.public_message();

    (
        status,
        Json(ErrorBody {
            status: status.as_u16(),
            error: err.code().to_string(),
            message,
        }),
    )
        .into_response()
}

#[must_use]
pub fn missing_payload() -> Response {
    error_response(&AuthError::InvalidRequest("missing payload".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Resource;
    use anyhow::Result;

    async fn body_of(response: Response) -> Result<ErrorBody> {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    #[tokio::test]
    async fn conflict_renders_code_and_message() -> Result<()> {
        let response = error_response(&AuthError::Conflict(ConflictReason::EmailAlreadyInUse));
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_of(response).await?;
        assert_eq!(
            body,
            ErrorBody {
                status: 409,
                error: "email-already-in-use".to_string(),
                message: "email already in use".to_string(),
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn internal_details_are_not_echoed() -> Result<()> {
        let response = error_response(&AuthError::Transient("pool exhausted".to_string()));
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_of(response).await?;
        assert_eq!(body.error, "service-unavailable");
        assert!(!body.message.contains("pool"));

        let body = body_of(error_response(&AuthError::Configuration(
            "secret too short".to_string(),
        )))
        .await?;
        assert_eq!(body.status, 500);
        assert!(!body.message.contains("secret"));
        Ok(())
    }

    #[test]
    fn statuses() {
        assert_eq!(
            status_for(&AuthError::NotFound(Resource::User)),
            StatusCode::NOT_FOUND
        );
        assert_eq!(status_for(&AuthError::Unverified), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_for(&AuthError::Conflict(ConflictReason::ForbiddenAnonymous)),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&AuthError::Conflict(ConflictReason::NotAnonymous)),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_for(&AuthError::DisabledEndpoint), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn missing_payload_is_a_bad_request() -> Result<()> {
        let response = missing_payload();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_of(response).await?.error, "invalid-request");
        Ok(())
    }
}
