use super::{
    AddAuthenticatorVerifyRequest, Orchestrator, RegisteredAuthenticator, WebauthnSignUpRequest,
    WebauthnSignUpVerifyRequest, normalize_email,
};
use crate::{
    error::{AuthError, ConflictReason, Resource},
    session::SignInResponse,
    store::{NewUser, User, UserPatch},
    webauthn::client_data,
};
use serde_json::Value;
use tracing::{info, instrument};
use uuid::Uuid;

impl Orchestrator {
    /// Start a passkey sign-up for `email`.
    ///
    /// The account stays anonymous with the address parked in `newEmail`
    /// until the ceremony completes. An anonymous placeholder that already
    /// owns the address is reused.
    ///
    /// # Errors
    /// `DisabledEndpoint` without a relying party,
    /// `Conflict(EmailAlreadyInUse)` when a named account owns the address.
    #[instrument(skip_all)]
    pub async fn sign_up_webauthn_begin(
        &self,
        request: WebauthnSignUpRequest,
    ) -> Result<Value, AuthError> {
        let challenges = self.challenges()?;
        let email = normalize_email(&request.email)?;
        self.redirect_target(request.options.redirect_to.as_deref())?;
        let (default_role, roles) = self.resolve_roles(&request.options)?;
        let locale = self.resolve_locale(request.options.locale.as_deref())?;
        let display_name = request
            .options
            .display_name
            .unwrap_or_else(|| email.clone());

        let user = match self.store.get_user_by_email(&email).await? {
            Some(existing) if !existing.is_anonymous => {
                return Err(AuthError::Conflict(ConflictReason::EmailAlreadyInUse));
            }
            Some(placeholder) => {
                let patch = UserPatch {
                    email: Some(None),
                    new_email: Some(Some(email)),
                    display_name: Some(display_name),
                    locale: Some(locale),
                    default_role: Some(default_role),
                    ..UserPatch::default()
                };
                if !self
                    .store
                    .update_user_if_anonymous(placeholder.id, &patch)
                    .await?
                {
                    return Err(AuthError::Conflict(ConflictReason::EmailAlreadyInUse));
                }
                self.store.delete_user_roles(placeholder.id).await?;
                self.store.insert_user_roles(placeholder.id, &roles).await?;
                self.user_by_id(placeholder.id).await?
            }
            None => {
                let user = self
                    .store
                    .insert_user(NewUser {
                        new_email: Some(email),
                        is_anonymous: true,
                        disabled: self.config.disable_new_users(),
                        display_name,
                        locale,
                        default_role,
                        roles,
                        ..NewUser::default()
                    })
                    .await?;
                info!(user_id = %user.id, "passkey sign-up started");
                user
            }
        };

        challenges.begin_registration(&user).await
    }

    /// Finish a passkey sign-up.
    ///
    /// The pending address moves to `email` and the account stops being
    /// anonymous in the same write that clears the challenge.
    ///
    /// # Errors
    /// `NotFound(Challenge)` when no sign-up holds the challenge,
    /// `Expired(Challenge)`, `InvalidCredential`,
    /// `Conflict(EmailAlreadyInUse)`, `Disabled`.
    #[instrument(skip_all)]
    pub async fn sign_up_webauthn_verify(
        &self,
        request: WebauthnSignUpVerifyRequest,
    ) -> Result<SignInResponse, AuthError> {
        let challenges = self.challenges()?;
        let redirect_to = self.redirect_target(request.options.redirect_to.as_deref())?;
        let challenge = client_data(&request.credential)?.challenge;
        let user = challenges.owner_of(&challenge).await?;
        let new_email = user
            .new_email
            .clone()
            .ok_or(AuthError::NotFound(Resource::Challenge))?;

        if self
            .store
            .get_user_by_email(&new_email)
            .await?
            .is_some_and(|owner| owner.id != user.id)
        {
            return Err(AuthError::Conflict(ConflictReason::EmailAlreadyInUse));
        }

        let promote = UserPatch {
            email: Some(Some(new_email)),
            new_email: Some(None),
            is_anonymous: Some(false),
            ..UserPatch::default()
        };
        challenges
            .complete_registration(&user, &request.credential, request.options.nickname, promote)
            .await?;

        let user = self.user_by_id(user.id).await?;
        if user.disabled {
            return Err(AuthError::Disabled);
        }
        if self.config.email_verification_required() && !user.email_verified {
            self.send_verification_email(&user, &redirect_to, false)
                .await?;
            return Ok(SignInResponse::empty());
        }

        let session = self.sessions.issue_session(&user, None).await?;
        Ok(SignInResponse::with_session(session))
    }

    /// Start registering another authenticator for a signed-in user.
    ///
    /// # Errors
    /// `DisabledEndpoint`, `NotFound(User)`, `Unverified`.
    #[instrument(skip(self))]
    pub async fn add_authenticator_begin(&self, user_id: Uuid) -> Result<Value, AuthError> {
        let challenges = self.challenges()?;
        let user = self.verified_user(user_id).await?;
        challenges.begin_registration(&user).await
    }

    /// # Errors
    /// `DisabledEndpoint`, `NotFound(User)`, `Unverified`, plus the
    /// ceremony errors of [`crate::webauthn::ChallengeManager`].
    #[instrument(skip(self, request))]
    pub async fn add_authenticator_verify(
        &self,
        user_id: Uuid,
        request: AddAuthenticatorVerifyRequest,
    ) -> Result<RegisteredAuthenticator, AuthError> {
        let challenges = self.challenges()?;
        let user = self.verified_user(user_id).await?;
        let authenticator = challenges
            .complete_registration(
                &user,
                &request.credential,
                request.nickname,
                UserPatch::default(),
            )
            .await?;
        Ok(authenticator.into())
    }

    async fn verified_user(&self, user_id: Uuid) -> Result<User, AuthError> {
        let user = self.user_by_id(user_id).await?;
        if self.config.email_verification_required() && !user.email_verified {
            return Err(AuthError::Unverified);
        }
        Ok(user)
    }
}
