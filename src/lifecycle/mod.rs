//! Lifecycle orchestrator.
//!
//! Every flow is a short sequence: check preconditions against the identity
//! store, mutate ticket or challenge state with a single write, then send an
//! email or return a session. Flows are grouped by surface:
//!
//! - `signup`: account creation by password and passwordless request.
//! - `signin`: password, anonymous, refresh and sign-out.
//! - `account`: password reset and change, email change, resend, deanonymize.
//! - `verify`: ticket redemption, the convergence point of email links.
//! - `webauthn`: passkey sign-up and adding authenticators.

mod account;
mod signin;
mod signup;
pub mod types;
mod verify;
mod webauthn;

pub use types::*;

use crate::{
    claims::{AccessClaims, ClaimsSigner},
    config::AuthConfig,
    email::{EmailDispatcher, EmailLocals, EmailMessage, build_verify_link},
    error::{AuthError, Resource},
    password::PasswordHasher,
    redirect::RedirectValidator,
    session::SessionManager,
    store::{IdentityStore, User},
    ticket::{IssuedTicket, TicketPurpose, TicketStore},
    webauthn::{ChallengeManager, CredentialVerifier},
};
use regex::Regex;
use std::sync::Arc;
use tokio::{task::spawn_blocking, time::timeout};
use tracing::{debug, error, info};
use uuid::Uuid;

#[derive(Clone)]
pub struct Orchestrator {
    config: AuthConfig,
    store: Arc<dyn IdentityStore>,
    tickets: TicketStore,
    sessions: SessionManager,
    challenges: Option<ChallengeManager>,
    redirects: RedirectValidator,
    email: Arc<dyn EmailDispatcher>,
    passwords: Arc<dyn PasswordHasher>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        store: Arc<dyn IdentityStore>,
        signer: Arc<dyn ClaimsSigner>,
        email: Arc<dyn EmailDispatcher>,
        passwords: Arc<dyn PasswordHasher>,
    ) -> Self {
        let sessions = SessionManager::new(
            store.clone(),
            signer,
            config.access_token_ttl_seconds(),
            config.refresh_token_ttl_seconds(),
            config.mfa_ticket_ttl_seconds(),
        );
        let redirects =
            RedirectValidator::new(config.client_url(), config.allowed_redirect_urls());
        Self {
            tickets: TicketStore::new(store.clone()),
            sessions,
            challenges: None,
            redirects,
            store,
            email,
            passwords,
            config,
        }
    }

    /// Enable the `WebAuthn` flows.
    #[must_use]
    pub fn with_credential_verifier(
        mut self,
        verifier: Arc<dyn CredentialVerifier>,
        challenge_ttl_seconds: i64,
    ) -> Self {
        self.challenges = Some(ChallengeManager::new(
            self.store.clone(),
            verifier,
            challenge_ttl_seconds,
        ));
        self
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn IdentityStore> {
        &self.store
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Verify a bearer access token.
    ///
    /// # Errors
    /// `Unauthenticated` for anything but a live token signed by this service.
    pub fn authenticate(&self, access_token: &str) -> Result<AccessClaims, AuthError> {
        self.sessions.signer().verify(access_token)
    }

    fn challenges(&self) -> Result<&ChallengeManager, AuthError> {
        self.challenges.as_ref().ok_or(AuthError::DisabledEndpoint)
    }

    /// Hash on the blocking pool; Argon2 would stall the async worker.
    async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let passwords = self.passwords.clone();
        let password = password.to_string();
        spawn_blocking(move || passwords.hash(&password))
            .await
            .map_err(|err| {
                AuthError::Configuration(format!("password hashing task failed: {err}"))
            })?
    }

    /// Check `password` against `stored_hash`, or against the decoy hash when
    /// there is none, so both cases take the same time.
    async fn verify_password(&self, password: &str, stored_hash: Option<String>) -> bool {
        let passwords = self.passwords.clone();
        let password = password.to_string();
        let outcome = spawn_blocking(move || match stored_hash {
            Some(hash) => passwords.verify(&password, &hash),
            None => {
                passwords.verify_decoy(&password);
                false
            }
        })
        .await;
        match outcome {
            Ok(matches) => matches,
            Err(err) => {
                error!("password verification task failed: {err}");
                false
            }
        }
    }

    async fn user_by_id(&self, user_id: Uuid) -> Result<User, AuthError> {
        self.store
            .get_user_by_id(user_id)
            .await?
            .ok_or(AuthError::NotFound(Resource::User))
    }

    /// Where to send the browser after a flow: the requested URL if the
    /// allow-list accepts it, otherwise the client URL, otherwise the server.
    fn redirect_target(&self, requested: Option<&str>) -> Result<String, AuthError> {
        match requested.map(str::trim).filter(|url| !url.is_empty()) {
            Some(url) if self.redirects.validate(url) => Ok(url.to_string()),
            Some(url) => Err(AuthError::RedirectNotAllowed(url.to_string())),
            None => Ok(self.default_redirect()),
        }
    }

    fn default_redirect(&self) -> String {
        self.config
            .client_url()
            .unwrap_or_else(|| self.config.server_url())
            .to_string()
    }

    /// `(default_role, roles)` for a new or deanonymized account.
    fn resolve_roles(&self, options: &SignUpOptions) -> Result<(String, Vec<String>), AuthError> {
        let allowed = self.config.default_allowed_roles();
        let roles = options
            .allowed_roles
            .clone()
            .unwrap_or_else(|| allowed.to_vec());
        if let Some(role) = roles.iter().find(|role| !allowed.contains(role)) {
            return Err(AuthError::InvalidRequest(format!("role {role} is not allowed")));
        }

        let default_role = options
            .default_role
            .clone()
            .unwrap_or_else(|| self.config.default_role().to_string());
        if !roles.contains(&default_role) {
            return Err(AuthError::InvalidRequest(format!(
                "default role {default_role} is not in the allowed roles"
            )));
        }
        Ok((default_role, roles))
    }

    fn resolve_locale(&self, requested: Option<&str>) -> Result<String, AuthError> {
        match requested {
            None => Ok(self.config.default_locale().to_string()),
            Some(locale) if locale.len() == 2 && locale.chars().all(|c| c.is_ascii_alphabetic()) => {
                Ok(locale.to_ascii_lowercase())
            }
            Some(locale) => Err(AuthError::InvalidRequest(format!(
                "locale must be a two letter code, got {locale}"
            ))),
        }
    }

    fn check_password(&self, password: &str) -> Result<(), AuthError> {
        let min = self.config.password_min_length();
        if password.chars().count() < min {
            return Err(AuthError::InvalidRequest(format!(
                "password must be at least {min} characters"
            )));
        }
        Ok(())
    }

    /// Mint an `emailVerify` ticket and mail it when `force` is set, or when
    /// new users are enabled, verification is required and `user` is not yet
    /// verified.
    ///
    /// # Errors
    /// `Transient` when the ticket cannot be stored. Mail failures are only
    /// logged.
    pub async fn send_verification_email(
        &self,
        user: &User,
        redirect_to: &str,
        force: bool,
    ) -> Result<(), AuthError> {
        let required = !self.config.disable_new_users()
            && self.config.email_verification_required()
            && !user.email_verified;
        if !force && !required {
            return Ok(());
        }

        let Some(to) = user.new_email.as_deref().or(user.email.as_deref()) else {
            debug!(user_id = %user.id, "no address to verify");
            return Ok(());
        };

        let issued = self
            .tickets
            .issue(
                user.id,
                TicketPurpose::EmailVerify,
                self.config.ticket_ttl_seconds(),
            )
            .await?;
        self.send_ticket_email(user, &issued, to, redirect_to).await;
        Ok(())
    }

    /// Build the `/verify` link for `issued` and hand it to the dispatcher.
    async fn send_ticket_email(
        &self,
        user: &User,
        issued: &IssuedTicket,
        to: &str,
        redirect_to: &str,
    ) {
        let purpose = issued.ticket.purpose();
        let Some(template) = purpose.template() else {
            return;
        };
        let ticket = issued.ticket.to_string();
        let link =
            match build_verify_link(self.config.server_url(), &ticket, purpose, redirect_to) {
                Ok(link) => link,
                Err(err) => {
                    error!(user_id = %user.id, "failed to build verification link: {err:#}");
                    return;
                }
            };

        let locale = if user.locale.is_empty() {
            self.config.default_locale().to_string()
        } else {
            user.locale.clone()
        };
        let display_name = if user.display_name.is_empty() {
            to.to_string()
        } else {
            user.display_name.clone()
        };

        let message = EmailMessage {
            template: template.to_string(),
            to: to.to_string(),
            locale: locale.clone(),
            locals: EmailLocals {
                link,
                email: user.email.clone(),
                new_email: user.new_email.clone(),
                display_name,
                ticket,
                redirect_to: redirect_to.to_string(),
                locale,
                server_url: self.config.server_url().to_string(),
                client_url: self.config.client_url().map(ToString::to_string),
            },
        };
        self.dispatch(&message).await;
    }

    async fn dispatch(&self, message: &EmailMessage) {
        match timeout(self.config.email_timeout(), self.email.send(message)).await {
            Ok(Ok(())) => info!(template = %message.template, "email dispatched"),
            Ok(Err(err)) => error!(template = %message.template, "email dispatch failed: {err:#}"),
            Err(_) => error!(
                template = %message.template,
                timeout = ?self.config.email_timeout(),
                "email dispatch timed out"
            ),
        }
    }
}

/// Trimmed, lower-cased address.
///
/// # Errors
/// `InvalidRequest` if it does not look like an email address.
pub fn normalize_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    if valid_email(&email) {
        Ok(email)
    } else {
        Err(AuthError::InvalidRequest("invalid email address".to_string()))
    }
}

#[must_use]
pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}
