//! Bounds every identity store call with a fixed deadline.

use super::{
    Authenticator, IdentityStore, NewAuthenticator, NewUser, RefreshToken, StoreError, User,
    UserPatch,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{future::Future, time::Duration};
use tracing::warn;
use uuid::Uuid;

pub struct TimeoutStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S: IdentityStore> TimeoutStore<S> {
    #[must_use]
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, StoreError>> + Send,
    ) -> Result<T, StoreError> {
        if let Ok(result) = tokio::time::timeout(self.timeout, call).await {
            result
        } else {
            warn!(operation, timeout = ?self.timeout, "identity store call timed out");
            Err(StoreError::Timeout)
        }
    }
}

#[async_trait]
impl<S: IdentityStore> IdentityStore for TimeoutStore<S> {
    async fn ping(&self) -> Result<(), StoreError> {
        self.bounded("ping", self.inner.ping()).await
    }

    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        self.bounded("get_user_by_id", self.inner.get_user_by_id(id))
            .await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.bounded("get_user_by_email", self.inner.get_user_by_email(email))
            .await
    }

    async fn get_user_by_ticket(&self, ticket: &str) -> Result<Option<User>, StoreError> {
        self.bounded("get_user_by_ticket", self.inner.get_user_by_ticket(ticket))
            .await
    }

    async fn get_user_by_challenge(&self, challenge: &str) -> Result<Option<User>, StoreError> {
        self.bounded(
            "get_user_by_challenge",
            self.inner.get_user_by_challenge(challenge),
        )
        .await
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        self.bounded("insert_user", self.inner.insert_user(user))
            .await
    }

    async fn update_user(&self, id: Uuid, patch: &UserPatch) -> Result<Option<User>, StoreError> {
        self.bounded("update_user", self.inner.update_user(id, patch))
            .await
    }

    async fn consume_ticket(
        &self,
        id: Uuid,
        ticket: &str,
        patch: &UserPatch,
    ) -> Result<bool, StoreError> {
        self.bounded(
            "consume_ticket",
            self.inner.consume_ticket(id, ticket, patch),
        )
        .await
    }

    async fn update_user_if_anonymous(
        &self,
        id: Uuid,
        patch: &UserPatch,
    ) -> Result<bool, StoreError> {
        self.bounded(
            "update_user_if_anonymous",
            self.inner.update_user_if_anonymous(id, patch),
        )
        .await
    }

    async fn update_user_if_challenge(
        &self,
        id: Uuid,
        challenge: &str,
        patch: &UserPatch,
    ) -> Result<bool, StoreError> {
        self.bounded(
            "update_user_if_challenge",
            self.inner.update_user_if_challenge(id, challenge, patch),
        )
        .await
    }

    async fn delete_user_roles(&self, user_id: Uuid) -> Result<(), StoreError> {
        self.bounded("delete_user_roles", self.inner.delete_user_roles(user_id))
            .await
    }

    async fn insert_user_roles(&self, user_id: Uuid, roles: &[String]) -> Result<(), StoreError> {
        self.bounded(
            "insert_user_roles",
            self.inner.insert_user_roles(user_id, roles),
        )
        .await
    }

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), StoreError> {
        self.bounded("insert_refresh_token", self.inner.insert_refresh_token(token))
            .await
    }

    async fn get_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>, StoreError> {
        self.bounded("get_refresh_token", self.inner.get_refresh_token(token))
            .await
    }

    async fn extend_refresh_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.bounded(
            "extend_refresh_token",
            self.inner.extend_refresh_token(token, now, expires_at),
        )
        .await
    }

    async fn delete_refresh_token(&self, token: &str) -> Result<(), StoreError> {
        self.bounded("delete_refresh_token", self.inner.delete_refresh_token(token))
            .await
    }

    async fn delete_user_refresh_tokens(&self, user_id: Uuid) -> Result<u64, StoreError> {
        self.bounded(
            "delete_user_refresh_tokens",
            self.inner.delete_user_refresh_tokens(user_id),
        )
        .await
    }

    async fn insert_user_authenticator(
        &self,
        authenticator: &NewAuthenticator,
    ) -> Result<Authenticator, StoreError> {
        self.bounded(
            "insert_user_authenticator",
            self.inner.insert_user_authenticator(authenticator),
        )
        .await
    }

    async fn list_user_authenticators(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Authenticator>, StoreError> {
        self.bounded(
            "list_user_authenticators",
            self.inner.list_user_authenticators(user_id),
        )
        .await
    }

    async fn update_authenticator_counter(
        &self,
        credential_id: &str,
        counter: u32,
    ) -> Result<bool, StoreError> {
        self.bounded(
            "update_authenticator_counter",
            self.inner.update_authenticator_counter(credential_id, counter),
        )
        .await
    }
}
