use super::{
    ChangePasswordRequest, DeanonymizeMethod, DeanonymizeRequest, EmailChangeRequest,
    Orchestrator, PasswordResetRequest, SendVerificationEmailRequest, normalize_email,
};
use crate::{
    error::{AuthError, ConflictReason, Resource},
    store::UserPatch,
    ticket::TicketPurpose,
};
use tracing::{info, instrument};
use uuid::Uuid;

impl Orchestrator {
    /// Email a `passwordReset` link.
    ///
    /// # Errors
    /// `NotFound(User)` for unknown or disabled accounts.
    #[instrument(skip_all)]
    pub async fn request_password_reset(
        &self,
        request: PasswordResetRequest,
    ) -> Result<(), AuthError> {
        let email = normalize_email(&request.email)?;
        let redirect_to = self.redirect_target(request.options.redirect_to.as_deref())?;

        let user = self
            .store
            .get_user_by_email(&email)
            .await?
            .filter(|user| !user.disabled)
            .ok_or(AuthError::NotFound(Resource::User))?;

        let issued = self
            .tickets
            .issue(
                user.id,
                TicketPurpose::PasswordReset,
                self.config.ticket_ttl_seconds(),
            )
            .await?;
        self.send_ticket_email(&user, &issued, &email, &redirect_to)
            .await;
        Ok(())
    }

    /// # Errors
    /// `InvalidRequest` for a short password, `NotFound(User)`.
    #[instrument(skip(self, request))]
    pub async fn change_password(
        &self,
        user_id: Uuid,
        request: ChangePasswordRequest,
    ) -> Result<(), AuthError> {
        self.check_password(&request.new_password)?;
        let password_hash = self.hash_password(&request.new_password).await?;
        self.store
            .update_user(
                user_id,
                &UserPatch {
                    password_hash: Some(Some(password_hash)),
                    ..UserPatch::default()
                },
            )
            .await?
            .ok_or(AuthError::NotFound(Resource::User))?;
        info!("password changed");
        Ok(())
    }

    /// Park `newEmail` on the account and mail the confirmation link to it.
    /// The address only moves to `email` when the link is redeemed.
    ///
    /// # Errors
    /// `Conflict(EmailAlreadyInUse)`, `Conflict(ForbiddenAnonymous)`,
    /// `NotFound(User)`.
    #[instrument(skip(self, request))]
    pub async fn request_email_change(
        &self,
        user_id: Uuid,
        request: EmailChangeRequest,
    ) -> Result<(), AuthError> {
        let new_email = normalize_email(&request.new_email)?;
        let redirect_to = self.redirect_target(request.options.redirect_to.as_deref())?;

        if self.store.get_user_by_email(&new_email).await?.is_some() {
            return Err(AuthError::Conflict(ConflictReason::EmailAlreadyInUse));
        }
        let user = self.user_by_id(user_id).await?;
        if user.is_anonymous {
            return Err(AuthError::Conflict(ConflictReason::ForbiddenAnonymous));
        }

        let issued = self
            .tickets
            .issue_with(
                user.id,
                TicketPurpose::EmailConfirmChange,
                self.config.ticket_ttl_seconds(),
                UserPatch {
                    new_email: Some(Some(new_email.clone())),
                    ..UserPatch::default()
                },
            )
            .await?;
        let user = self.user_by_id(user_id).await?;
        self.send_ticket_email(&user, &issued, &new_email, &redirect_to)
            .await;
        Ok(())
    }

    /// Resend the verification link to an unverified address.
    ///
    /// # Errors
    /// `NotFound(User)`, `Conflict(EmailAlreadyVerified)`.
    #[instrument(skip_all)]
    pub async fn resend_verification_email(
        &self,
        request: SendVerificationEmailRequest,
    ) -> Result<(), AuthError> {
        let email = normalize_email(&request.email)?;
        let redirect_to = self.redirect_target(request.options.redirect_to.as_deref())?;

        let user = self
            .store
            .get_user_by_email(&email)
            .await?
            .ok_or(AuthError::NotFound(Resource::User))?;
        if user.email_verified {
            return Err(AuthError::Conflict(ConflictReason::EmailAlreadyVerified));
        }
        self.send_verification_email(&user, &redirect_to, true)
            .await
    }

    /// Turn an anonymous account into a named one.
    ///
    /// Profile, email and password land in one conditional update guarded on
    /// `is_anonymous`, so a concurrent deanonymization of the same account
    /// applies at most once. Roles are then replaced and every refresh token
    /// of the anonymous session is dropped.
    ///
    /// # Errors
    /// `Conflict(NotAnonymous)`, `Conflict(EmailAlreadyInUse)` (no mutation
    /// in either case), `InvalidRequest` for a missing or short password.
    #[instrument(skip(self, request), fields(method = ?request.sign_in_method))]
    pub async fn deanonymize(
        &self,
        user_id: Uuid,
        request: DeanonymizeRequest,
    ) -> Result<(), AuthError> {
        let email = normalize_email(&request.email)?;
        let redirect_to = self.redirect_target(request.options.redirect_to.as_deref())?;
        let (default_role, roles) = self.resolve_roles(&request.options)?;
        let locale = self.resolve_locale(request.options.locale.as_deref())?;
        let password_hash = match request.sign_in_method {
            DeanonymizeMethod::EmailPassword => {
                let password = request.password.as_deref().ok_or_else(|| {
                    AuthError::InvalidRequest("password is required".to_string())
                })?;
                self.check_password(password)?;
                Some(self.hash_password(password).await?)
            }
            DeanonymizeMethod::Passwordless => None,
        };

        let user = self.user_by_id(user_id).await?;
        if !user.is_anonymous {
            return Err(AuthError::Conflict(ConflictReason::NotAnonymous));
        }
        if self.store.get_user_by_email(&email).await?.is_some() {
            return Err(AuthError::Conflict(ConflictReason::EmailAlreadyInUse));
        }

        let patch = UserPatch {
            email: Some(Some(email.clone())),
            email_verified: Some(false),
            disabled: Some(self.config.disable_new_users()),
            is_anonymous: Some(false),
            display_name: Some(request.options.display_name.unwrap_or_else(|| email.clone())),
            locale: Some(locale),
            default_role: Some(default_role),
            password_hash: password_hash.map(Some),
            ..UserPatch::default()
        };
        if !self.store.update_user_if_anonymous(user_id, &patch).await? {
            return Err(AuthError::Conflict(ConflictReason::NotAnonymous));
        }

        self.store.delete_user_roles(user_id).await?;
        self.store.insert_user_roles(user_id, &roles).await?;
        self.sessions.revoke_all(user_id).await?;
        info!("user deanonymized");

        let user = self.user_by_id(user_id).await?;
        self.send_verification_email(&user, &redirect_to, false)
            .await
    }
}
