//! Access/refresh token pairs.
//!
//! Refresh tokens are opaque 256-bit random strings stored server-side keyed by
//! their own value. Presenting a still-live token extends it in place instead of
//! minting a new secret, so an existing client keeps the value it holds.

use crate::{
    claims::ClaimsSigner,
    error::AuthError,
    store::{IdentityStore, MfaType, RefreshToken, User},
    ticket::{TicketPurpose, TicketStore},
};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub display_name: String,
    pub locale: String,
    pub email: Option<String>,
    pub is_anonymous: bool,
    pub default_role: String,
    pub roles: Vec<String>,
    pub email_verified: bool,
}

impl From<&User> for SessionUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            created_at: user.created_at,
            display_name: user.display_name.clone(),
            locale: user.locale.clone(),
            email: user.email.clone(),
            is_anonymous: user.is_anonymous,
            default_role: user.default_role.clone(),
            roles: user.roles.clone(),
            email_verified: user.email_verified,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    pub access_token_expires_in: i64,
    pub refresh_token: String,
    pub user: SessionUser,
}

/// Returned instead of a session while a second factor is outstanding.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MfaChallenge {
    pub ticket: String,
}

/// Sign-in outcome: a session, a pending MFA ticket, or neither (email
/// verification outstanding).
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SignInResponse {
    pub session: Option<Session>,
    pub mfa: Option<MfaChallenge>,
}

impl SignInResponse {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_session(session: Session) -> Self {
        Self {
            session: Some(session),
            mfa: None,
        }
    }
}

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn IdentityStore>,
    signer: Arc<dyn ClaimsSigner>,
    tickets: TicketStore,
    access_token_ttl_seconds: i64,
    refresh_token_ttl_seconds: i64,
    mfa_ticket_ttl_seconds: i64,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        store: Arc<dyn IdentityStore>,
        signer: Arc<dyn ClaimsSigner>,
        access_token_ttl_seconds: i64,
        refresh_token_ttl_seconds: i64,
        mfa_ticket_ttl_seconds: i64,
    ) -> Self {
        Self {
            tickets: TicketStore::new(store.clone()),
            store,
            signer,
            access_token_ttl_seconds,
            refresh_token_ttl_seconds,
            mfa_ticket_ttl_seconds,
        }
    }

    #[must_use]
    pub fn signer(&self) -> &dyn ClaimsSigner {
        self.signer.as_ref()
    }

    /// Sign an access token and attach a refresh token.
    ///
    /// The caller has already checked the user is enabled and verified when
    /// required.
    ///
    /// # Errors
    /// `Configuration` if signing fails, `Transient` on store failure.
    pub async fn issue_session(
        &self,
        user: &User,
        current_refresh_token: Option<&str>,
    ) -> Result<Session, AuthError> {
        let mut allowed_roles = user.roles.clone();
        if !allowed_roles.contains(&user.default_role) {
            allowed_roles.push(user.default_role.clone());
        }

        let access_token = self.signer.sign(
            user.id,
            &allowed_roles,
            &user.default_role,
            self.access_token_ttl_seconds,
        )?;
        let refresh_token = self
            .rotate_or_create(user.id, current_refresh_token)
            .await?;

        Ok(Session {
            access_token,
            access_token_expires_in: self.access_token_ttl_seconds,
            refresh_token,
            user: SessionUser::from(user),
        })
    }

    /// Extend `current` when it is live and belongs to `user_id`, otherwise mint.
    ///
    /// # Errors
    /// `Transient` on store failure.
    pub async fn rotate_or_create(
        &self,
        user_id: Uuid,
        current: Option<&str>,
    ) -> Result<String, AuthError> {
        self.rotate_or_create_at(user_id, current, Utc::now()).await
    }

    pub(crate) async fn rotate_or_create_at(
        &self,
        user_id: Uuid,
        current: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        if let Some(token) = current {
            let owned = self
                .store
                .get_refresh_token(token)
                .await?
                .is_some_and(|stored| stored.user_id == user_id && stored.expires_at > now);
            let expires_at = now + Duration::seconds(self.refresh_token_ttl_seconds);
            if owned
                && self
                    .store
                    .extend_refresh_token(token, now, expires_at)
                    .await?
            {
                debug!(%user_id, "refresh token extended");
                return Ok(token.to_string());
            }
        }
        self.create_refresh_token_at(user_id, now).await
    }

    /// Mint and store a new refresh token.
    ///
    /// # Errors
    /// `Configuration` if the OS RNG fails, `Transient` on store failure.
    pub async fn create_refresh_token(&self, user_id: Uuid) -> Result<String, AuthError> {
        self.create_refresh_token_at(user_id, Utc::now()).await
    }

    async fn create_refresh_token_at(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let token = generate_refresh_token()?;
        self.store
            .insert_refresh_token(&RefreshToken {
                token: token.clone(),
                user_id,
                expires_at: now + Duration::seconds(self.refresh_token_ttl_seconds),
            })
            .await?;
        debug!(%user_id, "refresh token created");
        Ok(token)
    }

    /// Issue a session, or an `mfaTotp` ticket when TOTP is active.
    ///
    /// # Errors
    /// `Configuration` if signing fails, `Transient` on store failure.
    pub async fn resolve_mfa_gate(&self, user: &User) -> Result<SignInResponse, AuthError> {
        if user.active_mfa_type == MfaType::Totp {
            let issued = self
                .tickets
                .issue(user.id, TicketPurpose::MfaTotp, self.mfa_ticket_ttl_seconds)
                .await?;
            info!(user_id = %user.id, "second factor required");
            return Ok(SignInResponse {
                session: None,
                mfa: Some(MfaChallenge {
                    ticket: issued.ticket.to_string(),
                }),
            });
        }
        let session = self.issue_session(user, None).await?;
        Ok(SignInResponse::with_session(session))
    }

    /// Exchange a refresh token for a new access token, extending the refresh
    /// token in place.
    ///
    /// # Errors
    /// `InvalidRefreshToken` for unknown or expired tokens, `Disabled` for
    /// disabled users.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let now = Utc::now();
        let stored = self
            .store
            .get_refresh_token(refresh_token)
            .await?
            .filter(|stored| stored.expires_at > now)
            .ok_or(AuthError::InvalidRefreshToken)?;
        let user = self
            .store
            .get_user_by_id(stored.user_id)
            .await?
            .ok_or(AuthError::InvalidRefreshToken)?;
        if user.disabled {
            return Err(AuthError::Disabled);
        }
        self.issue_session(&user, Some(refresh_token)).await
    }

    /// Delete one refresh token; unknown tokens are not an error.
    ///
    /// # Errors
    /// `Transient` on store failure.
    pub async fn revoke(&self, refresh_token: &str) -> Result<(), AuthError> {
        self.store.delete_refresh_token(refresh_token).await?;
        Ok(())
    }

    /// Delete every refresh token the user holds.
    ///
    /// # Errors
    /// `Transient` on store failure.
    pub async fn revoke_all(&self, user_id: Uuid) -> Result<u64, AuthError> {
        let deleted = self.store.delete_user_refresh_tokens(user_id).await?;
        info!(%user_id, deleted, "refresh tokens revoked");
        Ok(deleted)
    }

    /// Owner of a live refresh token.
    ///
    /// # Errors
    /// `InvalidRefreshToken` for unknown or expired tokens.
    pub async fn owner_of(&self, refresh_token: &str) -> Result<Uuid, AuthError> {
        let now = Utc::now();
        self.store
            .get_refresh_token(refresh_token)
            .await?
            .filter(|stored| stored.expires_at > now)
            .map(|stored| stored.user_id)
            .ok_or(AuthError::InvalidRefreshToken)
    }
}

fn generate_refresh_token() -> Result<String, AuthError> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| AuthError::Configuration(format!("failed to generate refresh token: {err}")))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}
