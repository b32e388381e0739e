//! In-process identity store.
//!
//! Used for local development when no DSN is configured and by the test
//! suite. It enforces the same unique constraints and conditional-update
//! semantics as the Postgres schema, under a single async mutex.

use super::{
    Authenticator, IdentityStore, MfaType, NewAuthenticator, NewUser, RefreshToken, StoreError,
    User, UserPatch,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};
use tokio::sync::Mutex;
use uuid::Uuid;

const EMAIL_CONSTRAINT: &str = "users_email_key";
const REFRESH_TOKEN_CONSTRAINT: &str = "refresh_tokens_pkey";
const CREDENTIAL_CONSTRAINT: &str = "user_authenticators_credential_id_key";

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    refresh_tokens: HashMap<String, RefreshToken>,
    authenticators: Vec<Authenticator>,
}

impl State {
    fn email_taken(&self, email: Option<&str>, except: Option<Uuid>) -> bool {
        let Some(email) = email else {
            return false;
        };
        self.users
            .values()
            .any(|user| Some(user.id) != except && user.email.as_deref() == Some(email))
    }

    /// Apply `patch` to `id` when `guard` holds, enforcing email uniqueness.
    fn patch_where(
        &mut self,
        id: Uuid,
        patch: &UserPatch,
        guard: impl Fn(&User) -> bool,
    ) -> Result<Option<User>, StoreError> {
        let Some(current) = self.users.get(&id) else {
            return Ok(None);
        };
        if !guard(current) {
            return Ok(None);
        }
        if let Some(Some(email)) = &patch.email
            && self.email_taken(Some(email), Some(id))
        {
            return Err(StoreError::UniqueViolation(EMAIL_CONSTRAINT.to_string()));
        }
        let user = self
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::Backend(format!("user {id} vanished during update")))?;
        patch.apply(user);
        Ok(Some(user.clone()))
    }
}

#[derive(Default)]
pub struct MemoryIdentityStore {
    state: Mutex<State>,
    offline: AtomicBool,
}

impl MemoryIdentityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of refresh tokens held for a user, expired ones included.
    pub async fn refresh_token_count(&self, user_id: Uuid) -> usize {
        let state = self.state.lock().await;
        state
            .refresh_tokens
            .values()
            .filter(|token| token.user_id == user_id)
            .count()
    }

    /// Turn on TOTP for a user; enrolment itself happens elsewhere.
    pub async fn set_active_mfa_type(&self, user_id: Uuid, mfa: MfaType) -> bool {
        let mut state = self.state.lock().await;
        state
            .users
            .get_mut(&user_id)
            .map(|user| user.active_mfa_type = mfa)
            .is_some()
    }

    /// Make `ping` report the store as unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn ping(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }

    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.users.get(&id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|user| user.email.as_deref() == Some(email))
            .cloned())
    }

    async fn get_user_by_ticket(&self, ticket: &str) -> Result<Option<User>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|user| user.ticket.as_deref() == Some(ticket))
            .cloned())
    }

    async fn get_user_by_challenge(&self, challenge: &str) -> Result<Option<User>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|user| user.current_challenge.as_deref() == Some(challenge))
            .cloned())
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut state = self.state.lock().await;
        if state.email_taken(user.email.as_deref(), None) {
            return Err(StoreError::UniqueViolation(EMAIL_CONSTRAINT.to_string()));
        }
        let record = User {
            id: Uuid::new_v4(),
            email: user.email,
            new_email: user.new_email,
            email_verified: user.email_verified,
            disabled: user.disabled,
            is_anonymous: user.is_anonymous,
            display_name: user.display_name,
            locale: user.locale,
            default_role: user.default_role,
            roles: user.roles,
            active_mfa_type: MfaType::None,
            current_challenge: user.current_challenge,
            challenge_state: user.challenge_state,
            challenge_expires_at: user.challenge_expires_at,
            ticket: None,
            ticket_expires_at: None,
            password_hash: user.password_hash,
            created_at: Utc::now(),
        };
        state.users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_user(&self, id: Uuid, patch: &UserPatch) -> Result<Option<User>, StoreError> {
        let mut state = self.state.lock().await;
        state.patch_where(id, patch, |_| true)
    }

    async fn consume_ticket(
        &self,
        id: Uuid,
        ticket: &str,
        patch: &UserPatch,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let patch = patch.clone().clearing_ticket();
        let updated = state.patch_where(id, &patch, |user| {
            user.ticket.as_deref() == Some(ticket)
        })?;
        Ok(updated.is_some())
    }

    async fn update_user_if_anonymous(
        &self,
        id: Uuid,
        patch: &UserPatch,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let updated = state.patch_where(id, patch, |user| user.is_anonymous)?;
        Ok(updated.is_some())
    }

    async fn update_user_if_challenge(
        &self,
        id: Uuid,
        challenge: &str,
        patch: &UserPatch,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let updated = state.patch_where(id, patch, |user| {
            user.current_challenge.as_deref() == Some(challenge)
        })?;
        Ok(updated.is_some())
    }

    async fn delete_user_roles(&self, user_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(user) = state.users.get_mut(&user_id) {
            user.roles.clear();
        }
        Ok(())
    }

    async fn insert_user_roles(&self, user_id: Uuid, roles: &[String]) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::Backend(format!("no user {user_id} for roles")))?;
        for role in roles {
            if !user.roles.contains(role) {
                user.roles.push(role.clone());
            }
        }
        Ok(())
    }

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.refresh_tokens.contains_key(&token.token) {
            return Err(StoreError::UniqueViolation(
                REFRESH_TOKEN_CONSTRAINT.to_string(),
            ));
        }
        state
            .refresh_tokens
            .insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn get_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.refresh_tokens.get(token).cloned())
    }

    async fn extend_refresh_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.refresh_tokens.get_mut(token) {
            Some(record) if record.expires_at > now => {
                record.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_refresh_token(&self, token: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.refresh_tokens.remove(token);
        Ok(())
    }

    async fn delete_user_refresh_tokens(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.refresh_tokens.len();
        state
            .refresh_tokens
            .retain(|_, token| token.user_id != user_id);
        Ok(u64::try_from(before - state.refresh_tokens.len()).unwrap_or(u64::MAX))
    }

    async fn insert_user_authenticator(
        &self,
        authenticator: &NewAuthenticator,
    ) -> Result<Authenticator, StoreError> {
        let mut state = self.state.lock().await;
        if state
            .authenticators
            .iter()
            .any(|existing| existing.credential_id == authenticator.credential_id)
        {
            return Err(StoreError::UniqueViolation(CREDENTIAL_CONSTRAINT.to_string()));
        }
        let record = Authenticator {
            id: Uuid::new_v4(),
            user_id: authenticator.user_id,
            credential_id: authenticator.credential_id.clone(),
            public_key: authenticator.public_key.clone(),
            counter: authenticator.counter,
            nickname: authenticator.nickname.clone(),
        };
        state.authenticators.push(record.clone());
        Ok(record)
    }

    async fn list_user_authenticators(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Authenticator>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .authenticators
            .iter()
            .filter(|authenticator| authenticator.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn update_authenticator_counter(
        &self,
        credential_id: &str,
        counter: u32,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state
            .authenticators
            .iter_mut()
            .find(|authenticator| authenticator.credential_id == credential_id)
        {
            Some(authenticator) if authenticator.counter <= counter => {
                authenticator.counter = counter;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
