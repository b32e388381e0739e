//! Postgres-backed identity store (schema in `sql/schema.sql`).

use super::{
    Authenticator, IdentityStore, MfaType, NewAuthenticator, NewUser, RefreshToken, StoreError,
    User, UserPatch,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    Connection, PgPool, Postgres, QueryBuilder, Row,
    postgres::{PgPoolOptions, PgRow},
};
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

const USER_COLUMNS: &str = r"
    u.id, u.email, u.new_email, u.email_verified, u.disabled, u.is_anonymous,
    u.display_name, u.locale, u.default_role, u.active_mfa_type,
    u.current_challenge, u.challenge_state, u.challenge_expires_at,
    u.ticket, u.ticket_expires_at, u.password_hash, u.created_at,
    ARRAY(SELECT r.role FROM user_roles r WHERE r.user_id = u.id ORDER BY r.role) AS roles";

const AUTHENTICATOR_COLUMNS: &str = "id, user_id, credential_id, public_key, counter, nickname";

#[derive(Clone, Debug)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    /// Connect a small pool to the identity database.
    ///
    /// # Errors
    /// Returns an error if the database is unreachable.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_user(&self, filter: &str, value: &str) -> Result<Option<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users u WHERE {filter} = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(db_error("failed to fetch user"))?;
        row.as_ref().map(user_from_row).transpose()
    }

    /// Run `UPDATE users SET <patch> WHERE id = $id <guard>` and return the new row.
    async fn patch_user(
        &self,
        id: Uuid,
        patch: &UserPatch,
        guard: Guard<'_>,
    ) -> Result<Option<User>, StoreError> {
        let mut builder = QueryBuilder::<Postgres>::new("UPDATE users AS u SET ");
        push_assignments(&mut builder, patch);
        builder.push(" WHERE u.id = ").push_bind(id);
        match guard {
            Guard::None => {}
            Guard::Ticket(ticket) => {
                builder.push(" AND u.ticket = ").push_bind(ticket.to_string());
            }
            Guard::Anonymous => {
                builder.push(" AND u.is_anonymous");
            }
            Guard::Challenge(challenge) => {
                builder
                    .push(" AND u.current_challenge = ")
                    .push_bind(challenge.to_string());
            }
        }
        builder.push(" RETURNING ").push(USER_COLUMNS);

        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = builder.sql()
        );
        let row = builder
            .build()
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(db_error("failed to update user"))?;
        row.as_ref().map(user_from_row).transpose()
    }
}

enum Guard<'a> {
    None,
    Ticket(&'a str),
    Anonymous,
    Challenge(&'a str),
}

fn push_assignments(builder: &mut QueryBuilder<'_, Postgres>, patch: &UserPatch) {
    let mut set = builder.separated(", ");
    // Keeps the statement valid for an empty patch.
    set.push("id = u.id");
    if let Some(email) = &patch.email {
        set.push("email = ").push_bind_unseparated(email.clone());
    }
    if let Some(new_email) = &patch.new_email {
        set.push("new_email = ").push_bind_unseparated(new_email.clone());
    }
    if let Some(email_verified) = patch.email_verified {
        set.push("email_verified = ")
            .push_bind_unseparated(email_verified);
    }
    if let Some(disabled) = patch.disabled {
        set.push("disabled = ").push_bind_unseparated(disabled);
    }
    if let Some(is_anonymous) = patch.is_anonymous {
        set.push("is_anonymous = ").push_bind_unseparated(is_anonymous);
    }
    if let Some(display_name) = &patch.display_name {
        set.push("display_name = ")
            .push_bind_unseparated(display_name.clone());
    }
    if let Some(locale) = &patch.locale {
        set.push("locale = ").push_bind_unseparated(locale.clone());
    }
    if let Some(default_role) = &patch.default_role {
        set.push("default_role = ")
            .push_bind_unseparated(default_role.clone());
    }
    if let Some(challenge) = &patch.current_challenge {
        set.push("current_challenge = ")
            .push_bind_unseparated(challenge.clone());
    }
    if let Some(state) = &patch.challenge_state {
        set.push("challenge_state = ")
            .push_bind_unseparated(state.clone());
    }
    if let Some(expires_at) = patch.challenge_expires_at {
        set.push("challenge_expires_at = ")
            .push_bind_unseparated(expires_at);
    }
    if let Some(ticket) = &patch.ticket {
        set.push("ticket = ").push_bind_unseparated(ticket.clone());
    }
    if let Some(expires_at) = patch.ticket_expires_at {
        set.push("ticket_expires_at = ")
            .push_bind_unseparated(expires_at);
    }
    if let Some(password_hash) = &patch.password_hash {
        set.push("password_hash = ")
            .push_bind_unseparated(password_hash.clone());
    }
}

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    let decode = |err: sqlx::Error| StoreError::Backend(format!("failed to decode user: {err}"));
    let mfa: Option<String> = row.try_get("active_mfa_type").map_err(decode)?;
    Ok(User {
        id: row.try_get("id").map_err(decode)?,
        email: row.try_get("email").map_err(decode)?,
        new_email: row.try_get("new_email").map_err(decode)?,
        email_verified: row.try_get("email_verified").map_err(decode)?,
        disabled: row.try_get("disabled").map_err(decode)?,
        is_anonymous: row.try_get("is_anonymous").map_err(decode)?,
        display_name: row.try_get("display_name").map_err(decode)?,
        locale: row.try_get("locale").map_err(decode)?,
        default_role: row.try_get("default_role").map_err(decode)?,
        roles: row.try_get("roles").map_err(decode)?,
        active_mfa_type: MfaType::from_column(mfa.as_deref()),
        current_challenge: row.try_get("current_challenge").map_err(decode)?,
        challenge_state: row.try_get("challenge_state").map_err(decode)?,
        challenge_expires_at: row.try_get("challenge_expires_at").map_err(decode)?,
        ticket: row.try_get("ticket").map_err(decode)?,
        ticket_expires_at: row.try_get("ticket_expires_at").map_err(decode)?,
        password_hash: row.try_get("password_hash").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}

fn authenticator_from_row(row: &PgRow) -> Result<Authenticator, StoreError> {
    let decode =
        |err: sqlx::Error| StoreError::Backend(format!("failed to decode authenticator: {err}"));
    let counter: i64 = row.try_get("counter").map_err(decode)?;
    Ok(Authenticator {
        id: row.try_get("id").map_err(decode)?,
        user_id: row.try_get("user_id").map_err(decode)?,
        credential_id: row.try_get("credential_id").map_err(decode)?,
        public_key: row.try_get("public_key").map_err(decode)?,
        counter: u32::try_from(counter)
            .map_err(|_| StoreError::Backend(format!("counter out of range: {counter}")))?,
        nickname: row.try_get("nickname").map_err(decode)?,
    })
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn db_error(context: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |err| {
        if is_unique_violation(&err) {
            let constraint = match &err {
                sqlx::Error::Database(db_err) => db_err.constraint().unwrap_or("unknown"),
                _ => "unknown",
            };
            return StoreError::UniqueViolation(constraint.to_string());
        }
        match err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => StoreError::Unavailable(format!("{context}: {err}")),
            other => StoreError::Backend(format!("{context}: {other}")),
        }
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let acquire_span = tracing::info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self
            .pool
            .acquire()
            .instrument(acquire_span)
            .await
            .map_err(db_error("failed to acquire connection"))?;
        let ping_span =
            tracing::info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping()
            .instrument(ping_span)
            .await
            .map_err(db_error("failed to ping database"))
    }

    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(db_error("failed to fetch user by id"))?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.fetch_user("u.email", email).await
    }

    async fn get_user_by_ticket(&self, ticket: &str) -> Result<Option<User>, StoreError> {
        self.fetch_user("u.ticket", ticket).await
    }

    async fn get_user_by_challenge(&self, challenge: &str) -> Result<Option<User>, StoreError> {
        self.fetch_user("u.current_challenge", challenge).await
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        // User row and its roles land together or not at all.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("begin insert user transaction"))?;

        let query = r"
            INSERT INTO users
                (email, new_email, email_verified, disabled, is_anonymous, display_name,
                 locale, default_role, password_hash, current_challenge, challenge_state,
                 challenge_expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(&user.email)
            .bind(&user.new_email)
            .bind(user.email_verified)
            .bind(user.disabled)
            .bind(user.is_anonymous)
            .bind(&user.display_name)
            .bind(&user.locale)
            .bind(&user.default_role)
            .bind(&user.password_hash)
            .bind(&user.current_challenge)
            .bind(&user.challenge_state)
            .bind(user.challenge_expires_at)
            .fetch_one(&mut *tx)
            .instrument(span)
            .await
            .map_err(db_error("failed to insert user"))?;
        let id: Uuid = row.get("id");

        let query = r"
            INSERT INTO user_roles (user_id, role)
            SELECT $1, role FROM UNNEST($2::text[]) AS role
            ON CONFLICT DO NOTHING
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(&user.roles)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .map_err(db_error("failed to insert user roles"))?;

        tx.commit()
            .await
            .map_err(db_error("commit insert user transaction"))?;

        self.get_user_by_id(id)
            .await?
            .ok_or_else(|| StoreError::Backend(format!("inserted user {id} not found")))
    }

    async fn update_user(&self, id: Uuid, patch: &UserPatch) -> Result<Option<User>, StoreError> {
        self.patch_user(id, patch, Guard::None).await
    }

    async fn consume_ticket(
        &self,
        id: Uuid,
        ticket: &str,
        patch: &UserPatch,
    ) -> Result<bool, StoreError> {
        let patch = patch.clone().clearing_ticket();
        let updated = self.patch_user(id, &patch, Guard::Ticket(ticket)).await?;
        Ok(updated.is_some())
    }

    async fn update_user_if_anonymous(
        &self,
        id: Uuid,
        patch: &UserPatch,
    ) -> Result<bool, StoreError> {
        let updated = self.patch_user(id, patch, Guard::Anonymous).await?;
        Ok(updated.is_some())
    }

    async fn update_user_if_challenge(
        &self,
        id: Uuid,
        challenge: &str,
        patch: &UserPatch,
    ) -> Result<bool, StoreError> {
        let updated = self
            .patch_user(id, patch, Guard::Challenge(challenge))
            .await?;
        Ok(updated.is_some())
    }

    async fn delete_user_roles(&self, user_id: Uuid) -> Result<(), StoreError> {
        let query = "DELETE FROM user_roles WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(db_error("failed to delete user roles"))?;
        Ok(())
    }

    async fn insert_user_roles(&self, user_id: Uuid, roles: &[String]) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO user_roles (user_id, role)
            SELECT $1, role FROM UNNEST($2::text[]) AS role
            ON CONFLICT DO NOTHING
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(roles)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(db_error("failed to insert user roles"))?;
        Ok(())
    }

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), StoreError> {
        let query = "INSERT INTO refresh_tokens (token, user_id, expires_at) VALUES ($1, $2, $3)";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(&token.token)
            .bind(token.user_id)
            .bind(token.expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(db_error("failed to insert refresh token"))?;
        Ok(())
    }

    async fn get_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>, StoreError> {
        let query = "SELECT token, user_id, expires_at FROM refresh_tokens WHERE token = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(token)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(db_error("failed to fetch refresh token"))?;

        Ok(row.map(|row| RefreshToken {
            token: row.get("token"),
            user_id: row.get("user_id"),
            expires_at: row.get("expires_at"),
        }))
    }

    async fn extend_refresh_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let query = r"
            UPDATE refresh_tokens
            SET expires_at = $3
            WHERE token = $1 AND expires_at > $2
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(token)
            .bind(now)
            .bind(expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(db_error("failed to extend refresh token"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_refresh_token(&self, token: &str) -> Result<(), StoreError> {
        let query = "DELETE FROM refresh_tokens WHERE token = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(token)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(db_error("failed to delete refresh token"))?;
        Ok(())
    }

    async fn delete_user_refresh_tokens(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let query = "DELETE FROM refresh_tokens WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(db_error("failed to delete user refresh tokens"))?;
        Ok(result.rows_affected())
    }

    async fn insert_user_authenticator(
        &self,
        authenticator: &NewAuthenticator,
    ) -> Result<Authenticator, StoreError> {
        let query = format!(
            r"
            INSERT INTO user_authenticators
                (user_id, credential_id, public_key, counter, nickname)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {AUTHENTICATOR_COLUMNS}
        "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(authenticator.user_id)
            .bind(&authenticator.credential_id)
            .bind(&authenticator.public_key)
            .bind(i64::from(authenticator.counter))
            .bind(&authenticator.nickname)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .map_err(db_error("failed to insert authenticator"))?;
        authenticator_from_row(&row)
    }

    async fn list_user_authenticators(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Authenticator>, StoreError> {
        let query = format!(
            "SELECT {AUTHENTICATOR_COLUMNS} FROM user_authenticators WHERE user_id = $1 ORDER BY created_at"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .map_err(db_error("failed to list authenticators"))?;
        rows.iter().map(authenticator_from_row).collect()
    }

    async fn update_authenticator_counter(
        &self,
        credential_id: &str,
        counter: u32,
    ) -> Result<bool, StoreError> {
        let query = r"
            UPDATE user_authenticators
            SET counter = $2
            WHERE credential_id = $1 AND counter <= $2
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(credential_id)
            .bind(i64::from(counter))
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(db_error("failed to update authenticator counter"))?;
        Ok(result.rows_affected() == 1)
    }
}
