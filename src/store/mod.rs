//! Identity store seam.
//!
//! The engine never holds shared state in memory: users, tickets, challenges,
//! roles, refresh tokens and authenticators all live behind [`IdentityStore`].
//! Each state transition the engine needs to be race-free is expressed as a
//! single conditional write (`consume_ticket`, `update_user_if_anonymous`,
//! `update_user_if_challenge`, `extend_refresh_token`,
//! `update_authenticator_counter`) that reports whether it applied.

mod memory;
mod postgres;
mod timeout;

pub use memory::MemoryIdentityStore;
pub use postgres::PgIdentityStore;
pub use timeout::TimeoutStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Carries the violated constraint name.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("identity store call timed out")]
    Timeout,
    #[error("identity store unavailable: {0}")]
    Unavailable(String),
    #[error("identity store error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MfaType {
    #[default]
    None,
    Totp,
}

impl MfaType {
    #[must_use]
    pub const fn as_str(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Totp => Some("totp"),
        }
    }

    #[must_use]
    pub fn from_column(value: Option<&str>) -> Self {
        match value {
            Some("totp") => Self::Totp,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: Option<String>,
    pub new_email: Option<String>,
    pub email_verified: bool,
    pub disabled: bool,
    pub is_anonymous: bool,
    pub display_name: String,
    pub locale: String,
    pub default_role: String,
    pub roles: Vec<String>,
    pub active_mfa_type: MfaType,
    pub current_challenge: Option<String>,
    /// Serialized ceremony state paired with `current_challenge`.
    pub challenge_state: Option<String>,
    pub challenge_expires_at: Option<DateTime<Utc>>,
    pub ticket: Option<String>,
    pub ticket_expires_at: Option<DateTime<Utc>>,
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Partial update. `None` leaves a column untouched; `Some(None)` writes NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserPatch {
    pub email: Option<Option<String>>,
    pub new_email: Option<Option<String>>,
    pub email_verified: Option<bool>,
    pub disabled: Option<bool>,
    pub is_anonymous: Option<bool>,
    pub display_name: Option<String>,
    pub locale: Option<String>,
    pub default_role: Option<String>,
    pub current_challenge: Option<Option<String>>,
    pub challenge_state: Option<Option<String>>,
    pub challenge_expires_at: Option<Option<DateTime<Utc>>>,
    pub ticket: Option<Option<String>>,
    pub ticket_expires_at: Option<Option<DateTime<Utc>>>,
    pub password_hash: Option<Option<String>>,
}

impl UserPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Null both ticket columns on top of whatever else the patch sets.
    #[must_use]
    pub fn clearing_ticket(mut self) -> Self {
        self.ticket = Some(None);
        self.ticket_expires_at = Some(None);
        self
    }

    /// Null the challenge columns on top of whatever else the patch sets.
    #[must_use]
    pub fn clearing_challenge(mut self) -> Self {
        self.current_challenge = Some(None);
        self.challenge_state = Some(None);
        self.challenge_expires_at = Some(None);
        self
    }

    /// Apply to an in-memory record.
    pub fn apply(&self, user: &mut User) {
        if let Some(email) = &self.email {
            user.email.clone_from(email);
        }
        if let Some(new_email) = &self.new_email {
            user.new_email.clone_from(new_email);
        }
        if let Some(email_verified) = self.email_verified {
            user.email_verified = email_verified;
        }
        if let Some(disabled) = self.disabled {
            user.disabled = disabled;
        }
        if let Some(is_anonymous) = self.is_anonymous {
            user.is_anonymous = is_anonymous;
        }
        if let Some(display_name) = &self.display_name {
            user.display_name.clone_from(display_name);
        }
        if let Some(locale) = &self.locale {
            user.locale.clone_from(locale);
        }
        if let Some(default_role) = &self.default_role {
            user.default_role.clone_from(default_role);
        }
        if let Some(challenge) = &self.current_challenge {
            user.current_challenge.clone_from(challenge);
        }
        if let Some(state) = &self.challenge_state {
            user.challenge_state.clone_from(state);
        }
        if let Some(expires_at) = self.challenge_expires_at {
            user.challenge_expires_at = expires_at;
        }
        if let Some(ticket) = &self.ticket {
            user.ticket.clone_from(ticket);
        }
        if let Some(expires_at) = self.ticket_expires_at {
            user.ticket_expires_at = expires_at;
        }
        if let Some(password_hash) = &self.password_hash {
            user.password_hash.clone_from(password_hash);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub email: Option<String>,
    pub new_email: Option<String>,
    pub email_verified: bool,
    pub disabled: bool,
    pub is_anonymous: bool,
    pub display_name: String,
    pub locale: String,
    pub default_role: String,
    pub roles: Vec<String>,
    pub password_hash: Option<String>,
    pub current_challenge: Option<String>,
    pub challenge_state: Option<String>,
    pub challenge_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshToken {
    pub token: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticator {
    pub id: Uuid,
    pub user_id: Uuid,
    /// base64url without padding.
    pub credential_id: String,
    pub public_key: String,
    pub counter: u32,
    pub nickname: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewAuthenticator {
    pub user_id: Uuid,
    pub credential_id: String,
    pub public_key: String,
    pub counter: u32,
    pub nickname: Option<String>,
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Cheap liveness probe for `/health`.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn get_user_by_ticket(&self, ticket: &str) -> Result<Option<User>, StoreError>;

    async fn get_user_by_challenge(&self, challenge: &str) -> Result<Option<User>, StoreError>;

    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError>;

    /// Returns the updated user, or `None` when no row has that id.
    async fn update_user(&self, id: Uuid, patch: &UserPatch) -> Result<Option<User>, StoreError>;

    /// `UPDATE .. SET ticket = NULL, <patch> WHERE id = $1 AND ticket = $2`.
    async fn consume_ticket(
        &self,
        id: Uuid,
        ticket: &str,
        patch: &UserPatch,
    ) -> Result<bool, StoreError>;

    /// `UPDATE .. SET <patch> WHERE id = $1 AND is_anonymous`.
    async fn update_user_if_anonymous(
        &self,
        id: Uuid,
        patch: &UserPatch,
    ) -> Result<bool, StoreError>;

    /// `UPDATE .. SET <patch> WHERE id = $1 AND current_challenge = $2`.
    async fn update_user_if_challenge(
        &self,
        id: Uuid,
        challenge: &str,
        patch: &UserPatch,
    ) -> Result<bool, StoreError>;

    async fn delete_user_roles(&self, user_id: Uuid) -> Result<(), StoreError>;

    async fn insert_user_roles(&self, user_id: Uuid, roles: &[String]) -> Result<(), StoreError>;

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), StoreError>;

    async fn get_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>, StoreError>;

    /// Move the expiry of a token that is still live at `now`.
    async fn extend_refresh_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn delete_refresh_token(&self, token: &str) -> Result<(), StoreError>;

    async fn delete_user_refresh_tokens(&self, user_id: Uuid) -> Result<u64, StoreError>;

    async fn insert_user_authenticator(
        &self,
        authenticator: &NewAuthenticator,
    ) -> Result<Authenticator, StoreError>;

    async fn list_user_authenticators(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Authenticator>, StoreError>;

    /// Store a new signature counter only if it does not go backwards.
    async fn update_authenticator_counter(
        &self,
        credential_id: &str,
        counter: u32,
    ) -> Result<bool, StoreError>;
}
