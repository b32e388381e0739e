//! Single-use tickets attached to a user row.
//!
//! A ticket is `<purpose>:<uuid-v4>` stored in `users.ticket` together with
//! `users.ticket_expires_at`. Issuing overwrites whatever ticket the user had,
//! so at most one is ever live. Redemption is split in two: [`TicketStore::redeem`]
//! only reads and checks, and the caller consumes the ticket with
//! [`TicketStore::consume`] in the same conditional update that applies the
//! flow's state change.

use crate::{
    error::{AuthError, Resource},
    store::{IdentityStore, User, UserPatch},
};
use chrono::{DateTime, Duration, Utc};
use std::{fmt, str::FromStr, sync::Arc};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TicketPurpose {
    EmailVerify,
    EmailConfirmChange,
    SigninPasswordless,
    PasswordReset,
    MfaTotp,
}

impl TicketPurpose {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmailVerify => "emailVerify",
            Self::EmailConfirmChange => "emailConfirmChange",
            Self::SigninPasswordless => "signinPasswordless",
            Self::PasswordReset => "passwordReset",
            Self::MfaTotp => "mfaTotp",
        }
    }

    /// Email template for link-based purposes; `mfaTotp` is never emailed.
    #[must_use]
    pub const fn template(self) -> Option<&'static str> {
        match self {
            Self::EmailVerify => Some("email-verify"),
            Self::EmailConfirmChange => Some("email-confirm-change"),
            Self::SigninPasswordless => Some("signin-passwordless"),
            Self::PasswordReset => Some("password-reset"),
            Self::MfaTotp => None,
        }
    }
}

impl fmt::Display for TicketPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketPurpose {
    type Err = AuthError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "emailVerify" => Ok(Self::EmailVerify),
            "emailConfirmChange" => Ok(Self::EmailConfirmChange),
            "signinPasswordless" => Ok(Self::SigninPasswordless),
            "passwordReset" => Ok(Self::PasswordReset),
            "mfaTotp" => Ok(Self::MfaTotp),
            _ => Err(AuthError::NotFound(Resource::Ticket)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    purpose: TicketPurpose,
    nonce: Uuid,
}

impl Ticket {
    #[must_use]
    pub fn new(purpose: TicketPurpose) -> Self {
        Self {
            purpose,
            nonce: Uuid::new_v4(),
        }
    }

    #[must_use]
    pub const fn purpose(&self) -> TicketPurpose {
        self.purpose
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.purpose, self.nonce)
    }
}

impl FromStr for Ticket {
    type Err = AuthError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (purpose, nonce) = value
            .split_once(':')
            .ok_or(AuthError::NotFound(Resource::Ticket))?;
        let nonce = Uuid::parse_str(nonce).map_err(|_| AuthError::NotFound(Resource::Ticket))?;
        Ok(Self {
            purpose: purpose.parse()?,
            nonce,
        })
    }
}

/// A freshly minted ticket and the instant it stops being redeemable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedTicket {
    pub ticket: Ticket,
    pub expires_at: DateTime<Utc>,
}

impl IssuedTicket {
    #[must_use]
    pub fn mint(purpose: TicketPurpose, ttl_seconds: i64, now: DateTime<Utc>) -> Self {
        Self {
            ticket: Ticket::new(purpose),
            expires_at: now + Duration::seconds(ttl_seconds),
        }
    }

    /// Columns that attach this ticket to a user row.
    #[must_use]
    pub fn patch(&self) -> UserPatch {
        UserPatch {
            ticket: Some(Some(self.ticket.to_string())),
            ticket_expires_at: Some(Some(self.expires_at)),
            ..UserPatch::default()
        }
    }
}

#[derive(Clone)]
pub struct TicketStore {
    store: Arc<dyn IdentityStore>,
}

impl TicketStore {
    #[must_use]
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    /// Attach a new ticket to the user, invalidating any previous one.
    ///
    /// # Errors
    /// `NotFound(User)` if the user does not exist, `Transient` on store failure.
    pub async fn issue(
        &self,
        user_id: Uuid,
        purpose: TicketPurpose,
        ttl_seconds: i64,
    ) -> Result<IssuedTicket, AuthError> {
        self.issue_with(user_id, purpose, ttl_seconds, UserPatch::default())
            .await
    }

    /// Like [`Self::issue`], also writing `extra` in the same update.
    ///
    /// # Errors
    /// `NotFound(User)` if the user does not exist, `Conflict` on a unique
    /// violation in `extra`, `Transient` on store failure.
    pub async fn issue_with(
        &self,
        user_id: Uuid,
        purpose: TicketPurpose,
        ttl_seconds: i64,
        extra: UserPatch,
    ) -> Result<IssuedTicket, AuthError> {
        let issued = IssuedTicket::mint(purpose, ttl_seconds, Utc::now());
        let issued_patch = issued.patch();
        let patch = UserPatch {
            ticket: issued_patch.ticket,
            ticket_expires_at: issued_patch.ticket_expires_at,
            ..extra
        };
        self.store
            .update_user(user_id, &patch)
            .await?
            .ok_or(AuthError::NotFound(Resource::User))?;
        debug!(%user_id, purpose = %purpose, "ticket issued");
        Ok(issued)
    }

    /// Find the user holding `value`, checking purpose and expiry.
    ///
    /// Does not clear the ticket.
    ///
    /// # Errors
    /// `NotFound(Ticket)` for unknown, malformed or wrong-purpose tickets,
    /// `Expired(Ticket)` once `now` is past `ticket_expires_at`.
    pub async fn redeem(&self, value: &str, expected: TicketPurpose) -> Result<User, AuthError> {
        self.redeem_at(value, expected, Utc::now()).await
    }

    pub(crate) async fn redeem_at(
        &self,
        value: &str,
        expected: TicketPurpose,
        now: DateTime<Utc>,
    ) -> Result<User, AuthError> {
        let ticket: Ticket = value.parse()?;
        if ticket.purpose() != expected {
            return Err(AuthError::NotFound(Resource::Ticket));
        }

        let user = self
            .store
            .get_user_by_ticket(value)
            .await?
            .ok_or(AuthError::NotFound(Resource::Ticket))?;

        // The stored value is authoritative, not the prefix the caller sent.
        let stored: Ticket = user
            .ticket
            .as_deref()
            .ok_or(AuthError::NotFound(Resource::Ticket))?
            .parse()?;
        if stored.purpose() != expected {
            return Err(AuthError::NotFound(Resource::Ticket));
        }

        match user.ticket_expires_at {
            Some(expires_at) if expires_at >= now => Ok(user),
            _ => Err(AuthError::Expired(Resource::Ticket)),
        }
    }

    /// Clear `ticket` and apply `patch` in one conditional update.
    ///
    /// # Errors
    /// `NotFound(Ticket)` if the ticket was consumed or replaced concurrently.
    pub async fn consume(
        &self,
        user_id: Uuid,
        ticket: &str,
        patch: &UserPatch,
    ) -> Result<(), AuthError> {
        if self.store.consume_ticket(user_id, ticket, patch).await? {
            Ok(())
        } else {
            Err(AuthError::NotFound(Resource::Ticket))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryIdentityStore, NewUser};
    use anyhow::Result;

    async fn setup() -> Result<(TicketStore, User)> {
        let store = Arc::new(MemoryIdentityStore::new());
        let user = store
            .insert_user(NewUser {
                email: Some("a@x.com".to_string()),
                locale: "en".to_string(),
                default_role: "user".to_string(),
                ..NewUser::default()
            })
            .await?;
        Ok((TicketStore::new(store), user))
    }

    #[test]
    fn ticket_wire_form_round_trips() -> Result<()> {
        let ticket = Ticket::new(TicketPurpose::PasswordReset);
        let wire = ticket.to_string();
        assert!(wire.starts_with("passwordReset:"));
        assert_eq!(wire.parse::<Ticket>()?, ticket);
        Ok(())
    }

    #[test]
    fn malformed_tickets_are_not_found() {
        for value in ["", "emailVerify", "emailVerify:not-a-uuid", "bogus:00000000-0000-4000-8000-000000000000"] {
            assert!(matches!(
                value.parse::<Ticket>(),
                Err(AuthError::NotFound(Resource::Ticket))
            ));
        }
    }

    #[test]
    fn templates_follow_purpose() {
        assert_eq!(TicketPurpose::EmailVerify.template(), Some("email-verify"));
        assert_eq!(
            TicketPurpose::EmailConfirmChange.template(),
            Some("email-confirm-change")
        );
        assert_eq!(TicketPurpose::MfaTotp.template(), None);
    }

    #[tokio::test]
    async fn redeemable_until_expiry_and_not_after() -> Result<()> {
        let (tickets, user) = setup().await?;
        let issued = tickets
            .issue(user.id, TicketPurpose::EmailVerify, 60)
            .await?;
        let value = issued.ticket.to_string();

        let at_expiry = tickets
            .redeem_at(&value, TicketPurpose::EmailVerify, issued.expires_at)
            .await?;
        assert_eq!(at_expiry.id, user.id);

        let after = tickets
            .redeem_at(
                &value,
                TicketPurpose::EmailVerify,
                issued.expires_at + Duration::milliseconds(1),
            )
            .await;
        assert!(matches!(after, Err(AuthError::Expired(Resource::Ticket))));
        Ok(())
    }

    #[tokio::test]
    async fn reissue_invalidates_previous_ticket() -> Result<()> {
        let (tickets, user) = setup().await?;
        let first = tickets
            .issue(user.id, TicketPurpose::PasswordReset, 3600)
            .await?;
        let second = tickets
            .issue(user.id, TicketPurpose::PasswordReset, 3600)
            .await?;

        let stale = tickets
            .redeem(&first.ticket.to_string(), TicketPurpose::PasswordReset)
            .await;
        assert!(matches!(stale, Err(AuthError::NotFound(Resource::Ticket))));
        assert!(
            tickets
                .redeem(&second.ticket.to_string(), TicketPurpose::PasswordReset)
                .await
                .is_ok()
        );
        Ok(())
    }

    #[tokio::test]
    async fn purpose_mismatch_is_not_found() -> Result<()> {
        let (tickets, user) = setup().await?;
        let issued = tickets
            .issue(user.id, TicketPurpose::EmailVerify, 3600)
            .await?;
        let result = tickets
            .redeem(&issued.ticket.to_string(), TicketPurpose::PasswordReset)
            .await;
        assert!(matches!(result, Err(AuthError::NotFound(Resource::Ticket))));
        Ok(())
    }

    #[tokio::test]
    async fn consume_succeeds_once() -> Result<()> {
        let (tickets, user) = setup().await?;
        let issued = tickets
            .issue(user.id, TicketPurpose::EmailVerify, 3600)
            .await?;
        let value = issued.ticket.to_string();
        let patch = UserPatch {
            email_verified: Some(true),
            ..UserPatch::default()
        };

        let redeemed = tickets.redeem(&value, TicketPurpose::EmailVerify).await?;
        tickets.consume(redeemed.id, &value, &patch).await?;

        let replay = tickets.consume(redeemed.id, &value, &patch).await;
        assert!(matches!(replay, Err(AuthError::NotFound(Resource::Ticket))));
        let again = tickets.redeem(&value, TicketPurpose::EmailVerify).await;
        assert!(matches!(again, Err(AuthError::NotFound(Resource::Ticket))));
        Ok(())
    }

    #[tokio::test]
    async fn issuing_for_unknown_user_fails() -> Result<()> {
        let (tickets, _) = setup().await?;
        let result = tickets
            .issue(Uuid::new_v4(), TicketPurpose::EmailVerify, 3600)
            .await;
        assert!(matches!(result, Err(AuthError::NotFound(Resource::User))));
        Ok(())
    }
}
