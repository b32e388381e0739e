//! Engine error taxonomy.
//!
//! Every lifecycle operation returns [`AuthError`]. Each variant carries a
//! stable kebab-case [`AuthError::code`] that is echoed to clients, either in
//! a JSON error body or as the `error` query parameter of a `/verify` redirect.

use crate::store::StoreError;
use thiserror::Error;

/// What a `NotFound` or `Expired` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    User,
    Ticket,
    Challenge,
}

impl Resource {
    const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Ticket => "ticket",
            Self::Challenge => "challenge",
        }
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    EmailAlreadyInUse,
    NotAnonymous,
    ForbiddenAnonymous,
    EmailAlreadyVerified,
    CredentialAlreadyRegistered,
}

impl ConflictReason {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::EmailAlreadyInUse => "email-already-in-use",
            Self::NotAnonymous => "user-not-anonymous",
            Self::ForbiddenAnonymous => "forbidden-anonymous",
            Self::EmailAlreadyVerified => "email-already-verified",
            Self::CredentialAlreadyRegistered => "credential-already-registered",
        }
    }

    const fn message(self) -> &'static str {
        match self {
            Self::EmailAlreadyInUse => "email already in use",
            Self::NotAnonymous => "user is not anonymous",
            Self::ForbiddenAnonymous => "anonymous users cannot perform this action",
            Self::EmailAlreadyVerified => "email is already verified",
            Self::CredentialAlreadyRegistered => "credential is already registered",
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0} not found")]
    NotFound(Resource),
    #[error("{0} expired")]
    Expired(Resource),
    #[error("{}", .0.message())]
    Conflict(ConflictReason),
    #[error("user is disabled")]
    Disabled,
    #[error("email is not verified")]
    Unverified,
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
    #[error("invalid or expired refresh token")]
    InvalidRefreshToken,
    #[error("missing or invalid access token")]
    Unauthenticated,
    #[error("redirectTo is not allowed: {0}")]
    RedirectNotAllowed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("endpoint is disabled")]
    DisabledEndpoint,
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl AuthError {
    /// Stable identifier surfaced to clients.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound(Resource::User) => "user-not-found",
            Self::NotFound(Resource::Ticket) => "invalid-ticket",
            Self::NotFound(Resource::Challenge) => "invalid-challenge",
            Self::Expired(Resource::Ticket) => "expired-ticket",
            Self::Expired(_) => "expired-challenge",
            Self::Conflict(reason) => reason.code(),
            Self::Disabled => "disabled-user",
            Self::Unverified => "unverified-user",
            Self::InvalidCredential(_) => "invalid-credential",
            Self::InvalidRefreshToken => "invalid-refresh-token",
            Self::Unauthenticated => "unauthenticated-user",
            Self::RedirectNotAllowed(_) => "redirect-not-allowed",
            Self::InvalidRequest(_) => "invalid-request",
            Self::DisabledEndpoint => "disabled-endpoint",
            Self::Transient(_) => "service-unavailable",
            Self::Configuration(_) => "internal-error",
        }
    }

    /// Message safe to show a client. Server-side failures get a generic
    /// text so driver and backend details stay in the logs.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Transient(_) => "service unavailable, retry later".to_string(),
            Self::Configuration(_) => "internal error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Transient failures may be retried by the caller; nothing else should be.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(constraint) if constraint.contains("email") => {
                Self::Conflict(ConflictReason::EmailAlreadyInUse)
            }
            StoreError::UniqueViolation(constraint) if constraint.contains("credential") => {
                Self::Conflict(ConflictReason::CredentialAlreadyRegistered)
            }
            StoreError::UniqueViolation(constraint) => {
                Self::Transient(format!("unique constraint violated: {constraint}"))
            }
            StoreError::Timeout => Self::Transient("identity store timed out".to_string()),
            StoreError::Unavailable(message) | StoreError::Backend(message) => {
                Self::Transient(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(AuthError::NotFound(Resource::Ticket).code(), "invalid-ticket");
        assert_eq!(AuthError::Expired(Resource::Ticket).code(), "expired-ticket");
        assert_eq!(
            AuthError::Conflict(ConflictReason::NotAnonymous).code(),
            "user-not-anonymous"
        );
        assert_eq!(AuthError::Disabled.code(), "disabled-user");
    }

    #[test]
    fn public_message_hides_backend_details() {
        let err = AuthError::Transient("connection refused (10.0.0.5:5432)".to_string());
        assert_eq!(err.public_message(), "service unavailable, retry later");
        let err = AuthError::Configuration("signing key rejected".to_string());
        assert_eq!(err.public_message(), "internal error");
        assert_eq!(AuthError::Disabled.public_message(), "user is disabled");
    }

    #[test]
    fn unique_email_violation_maps_to_conflict() {
        let err = AuthError::from(StoreError::UniqueViolation("users_email_key".to_string()));
        assert!(matches!(
            err,
            AuthError::Conflict(ConflictReason::EmailAlreadyInUse)
        ));
    }

    #[test]
    fn store_timeouts_are_transient() {
        let err = AuthError::from(StoreError::Timeout);
        assert!(err.is_transient());
        assert_eq!(err.code(), "service-unavailable");
    }

    #[test]
    fn conflict_messages_are_human_readable() {
        let err = AuthError::Conflict(ConflictReason::EmailAlreadyInUse);
        assert_eq!(err.to_string(), "email already in use");
    }
}
