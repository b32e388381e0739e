use super::{
    EmailPasswordSignUpRequest, Orchestrator, PasswordlessEmailRequest, normalize_email,
};
use crate::{
    error::{AuthError, ConflictReason},
    session::SignInResponse,
    store::NewUser,
    ticket::TicketPurpose,
};
use tracing::{info, instrument};

impl Orchestrator {
    /// Create a password account and send the verification email.
    ///
    /// The response carries a session only when the new account may sign in
    /// right away: enabled, and verified or verification not required.
    ///
    /// # Errors
    /// `InvalidRequest` for a malformed email, weak password or disallowed
    /// role, `RedirectNotAllowed`, `Conflict(EmailAlreadyInUse)`.
    #[instrument(skip_all)]
    pub async fn sign_up_email_password(
        &self,
        request: EmailPasswordSignUpRequest,
    ) -> Result<SignInResponse, AuthError> {
        let email = normalize_email(&request.email)?;
        self.check_password(&request.password)?;
        let redirect_to = self.redirect_target(request.options.redirect_to.as_deref())?;
        let (default_role, roles) = self.resolve_roles(&request.options)?;
        let locale = self.resolve_locale(request.options.locale.as_deref())?;

        if self.store.get_user_by_email(&email).await?.is_some() {
            return Err(AuthError::Conflict(ConflictReason::EmailAlreadyInUse));
        }

        let password_hash = self.hash_password(&request.password).await?;
        let user = self
            .store
            .insert_user(NewUser {
                display_name: request.options.display_name.unwrap_or_else(|| email.clone()),
                email: Some(email),
                disabled: self.config.disable_new_users(),
                locale,
                default_role,
                roles,
                password_hash: Some(password_hash),
                ..NewUser::default()
            })
            .await?;
        info!(user_id = %user.id, "user signed up");

        self.send_verification_email(&user, &redirect_to, false)
            .await?;

        if user.disabled || (self.config.email_verification_required() && !user.email_verified) {
            return Ok(SignInResponse::empty());
        }
        self.sessions.resolve_mfa_gate(&user).await
    }

    /// Email a `signinPasswordless` link, creating the account on first use.
    ///
    /// # Errors
    /// `DisabledEndpoint` when passwordless sign-in is off, `Disabled` for a
    /// disabled account, plus the validation errors of sign-up.
    #[instrument(skip_all)]
    pub async fn sign_in_passwordless_email(
        &self,
        request: PasswordlessEmailRequest,
    ) -> Result<(), AuthError> {
        if !self.config.passwordless_enabled() {
            return Err(AuthError::DisabledEndpoint);
        }
        let email = normalize_email(&request.email)?;
        let redirect_to = self.redirect_target(request.options.redirect_to.as_deref())?;

        let user = match self.store.get_user_by_email(&email).await? {
            Some(user) => user,
            None => {
                let (default_role, roles) = self.resolve_roles(&request.options)?;
                let locale = self.resolve_locale(request.options.locale.as_deref())?;
                let user = self
                    .store
                    .insert_user(NewUser {
                        display_name: request
                            .options
                            .display_name
                            .unwrap_or_else(|| email.clone()),
                        email: Some(email.clone()),
                        disabled: self.config.disable_new_users(),
                        locale,
                        default_role,
                        roles,
                        ..NewUser::default()
                    })
                    .await?;
                info!(user_id = %user.id, "passwordless user created");
                user
            }
        };

        if user.disabled {
            return Err(AuthError::Disabled);
        }

        let issued = self
            .tickets
            .issue(
                user.id,
                TicketPurpose::SigninPasswordless,
                self.config.ticket_ttl_seconds(),
            )
            .await?;
        self.send_ticket_email(&user, &issued, &email, &redirect_to)
            .await;
        Ok(())
    }
}
