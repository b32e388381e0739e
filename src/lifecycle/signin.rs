use super::{
    AnonymousSignInRequest, EmailPasswordSignInRequest, Orchestrator, RefreshTokenRequest,
    SignOutRequest, normalize_email,
};
use crate::{
    error::AuthError,
    session::{Session, SignInResponse},
    store::NewUser,
};
use tracing::{debug, info, instrument};

const ANONYMOUS_ROLE: &str = "anonymous";
const ANONYMOUS_DISPLAY_NAME: &str = "Anonymous User";
const BAD_CREDENTIALS: &str = "incorrect email or password";

impl Orchestrator {
    /// Password sign-in, gated on MFA.
    ///
    /// # Errors
    /// `InvalidCredential` for an unknown email or wrong password (same
    /// message for both), `Disabled`, `Unverified` when verification is
    /// required.
    #[instrument(skip_all)]
    pub async fn sign_in_email_password(
        &self,
        request: EmailPasswordSignInRequest,
    ) -> Result<SignInResponse, AuthError> {
        let bad_credentials = || AuthError::InvalidCredential(BAD_CREDENTIALS.to_string());
        let email = normalize_email(&request.email).map_err(|_| bad_credentials())?;

        // Unknown emails and password-less accounts still pay for a hash check.
        let user = self.store.get_user_by_email(&email).await?;
        let stored_hash = user.as_ref().and_then(|user| user.password_hash.clone());
        let matches = self.verify_password(&request.password, stored_hash).await;
        let user = match user {
            Some(user) if matches => user,
            Some(user) => {
                debug!(user_id = %user.id, "password mismatch");
                return Err(bad_credentials());
            }
            None => return Err(bad_credentials()),
        };

        if user.disabled {
            return Err(AuthError::Disabled);
        }
        if self.config.email_verification_required() && !user.email_verified {
            return Err(AuthError::Unverified);
        }

        self.sessions.resolve_mfa_gate(&user).await
    }

    /// Create an anonymous placeholder account and sign it in.
    ///
    /// # Errors
    /// `DisabledEndpoint` when anonymous users are off.
    #[instrument(skip_all)]
    pub async fn sign_in_anonymous(
        &self,
        request: AnonymousSignInRequest,
    ) -> Result<SignInResponse, AuthError> {
        if !self.config.anonymous_users_enabled() {
            return Err(AuthError::DisabledEndpoint);
        }
        let locale = self.resolve_locale(request.locale.as_deref())?;

        let user = self
            .store
            .insert_user(NewUser {
                is_anonymous: true,
                display_name: request
                    .display_name
                    .unwrap_or_else(|| ANONYMOUS_DISPLAY_NAME.to_string()),
                locale,
                default_role: ANONYMOUS_ROLE.to_string(),
                roles: vec![ANONYMOUS_ROLE.to_string()],
                ..NewUser::default()
            })
            .await?;
        info!(user_id = %user.id, "anonymous user created");

        let session = self.sessions.issue_session(&user, None).await?;
        Ok(SignInResponse::with_session(session))
    }

    /// # Errors
    /// `InvalidRefreshToken` or `Disabled`.
    #[instrument(skip_all)]
    pub async fn refresh(&self, request: RefreshTokenRequest) -> Result<Session, AuthError> {
        self.sessions.refresh(&request.refresh_token).await
    }

    /// Revoke one refresh token, or every token of its owner. Unknown tokens
    /// are not an error.
    ///
    /// # Errors
    /// `Transient` on store failure.
    #[instrument(skip_all, fields(all = request.all))]
    pub async fn sign_out(&self, request: SignOutRequest) -> Result<(), AuthError> {
        if request.all {
            match self.sessions.owner_of(&request.refresh_token).await {
                Ok(user_id) => {
                    self.sessions.revoke_all(user_id).await?;
                    return Ok(());
                }
                Err(AuthError::InvalidRefreshToken) => {}
                Err(err) => return Err(err),
            }
        }
        self.sessions.revoke(&request.refresh_token).await
    }
}
