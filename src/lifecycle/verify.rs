use super::{Orchestrator, VerifyQuery, VerifyRedirect};
use crate::{
    error::{AuthError, ConflictReason, Resource},
    store::{User, UserPatch},
    ticket::TicketPurpose,
};
use tracing::{info, instrument, warn};
use url::Url;

impl Orchestrator {
    /// Redeem an email ticket and say where to send the browser.
    ///
    /// Never fails: every outcome is a redirect. On success the target
    /// carries `refreshToken` and `type`; on failure `error` and
    /// `errorDescription`. A `redirectTo` outside the allow-list is replaced
    /// by the default target and reported as `redirect-not-allowed`.
    #[instrument(skip_all, fields(kind = query.kind.as_deref()))]
    pub async fn verify(&self, query: VerifyQuery) -> VerifyRedirect {
        let target = match self.redirect_target(query.redirect_to.as_deref()) {
            Ok(target) => target,
            Err(err) => {
                warn!("verify with disallowed redirect: {err}");
                return failure(&self.default_redirect(), &err);
            }
        };

        match self.redeem(&query).await {
            Ok((purpose, refresh_token)) => VerifyRedirect {
                location: with_query(
                    &target,
                    &[
                        ("refreshToken", refresh_token.as_str()),
                        ("type", purpose.as_str()),
                    ],
                ),
                error: None,
            },
            Err(err) => {
                warn!(code = err.code(), "ticket redemption failed: {err}");
                failure(&target, &err)
            }
        }
    }

    async fn redeem(&self, query: &VerifyQuery) -> Result<(TicketPurpose, String), AuthError> {
        let purpose: TicketPurpose = query
            .kind
            .as_deref()
            .ok_or(AuthError::NotFound(Resource::Ticket))?
            .parse()?;
        if purpose.template().is_none() {
            return Err(AuthError::NotFound(Resource::Ticket));
        }
        let ticket = query
            .ticket
            .as_deref()
            .ok_or(AuthError::NotFound(Resource::Ticket))?;

        let user = self.tickets.redeem(ticket, purpose).await?;
        if user.disabled {
            return Err(AuthError::Disabled);
        }

        let patch = self.redemption_patch(&user, purpose).await?;
        self.tickets.consume(user.id, ticket, &patch).await?;
        let refresh_token = self.sessions.create_refresh_token(user.id).await?;
        info!(user_id = %user.id, %purpose, "ticket redeemed");
        Ok((purpose, refresh_token))
    }

    /// Field changes applied together with clearing the ticket.
    async fn redemption_patch(
        &self,
        user: &User,
        purpose: TicketPurpose,
    ) -> Result<UserPatch, AuthError> {
        match purpose {
            TicketPurpose::EmailVerify | TicketPurpose::SigninPasswordless => Ok(UserPatch {
                email_verified: Some(true),
                ..UserPatch::default()
            }),
            TicketPurpose::EmailConfirmChange => {
                let new_email = user
                    .new_email
                    .clone()
                    .ok_or(AuthError::NotFound(Resource::Ticket))?;
                if self
                    .store
                    .get_user_by_email(&new_email)
                    .await?
                    .is_some_and(|owner| owner.id != user.id)
                {
                    return Err(AuthError::Conflict(ConflictReason::EmailAlreadyInUse));
                }
                Ok(UserPatch {
                    email: Some(Some(new_email)),
                    new_email: Some(None),
                    ..UserPatch::default()
                })
            }
            TicketPurpose::PasswordReset | TicketPurpose::MfaTotp => Ok(UserPatch::default()),
        }
    }
}

fn failure(target: &str, err: &AuthError) -> VerifyRedirect {
    VerifyRedirect {
        location: with_query(
            target,
            &[
                ("error", err.code()),
                ("errorDescription", err.public_message().as_str()),
            ],
        ),
        error: Some(err.code()),
    }
}

fn with_query(target: &str, pairs: &[(&str, &str)]) -> String {
    match Url::parse(target) {
        Ok(mut url) => {
            url.query_pairs_mut().extend_pairs(pairs);
            url.to_string()
        }
        Err(_) => target.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        error::AuthError,
        lifecycle::{
            EmailChangeRequest, EmailPasswordSignUpRequest, PasswordlessEmailRequest,
            RedirectOptions, SignUpOptions, VerifyQuery,
        },
        store::{IdentityStore, NewUser, UserPatch},
        test_support::{Harness, harness, test_config},
        ticket::{IssuedTicket, TicketPurpose},
    };
    use anyhow::{Result, anyhow};
    use chrono::{Duration, Utc};
    use std::collections::HashMap;
    use url::Url;

    fn params(location: &str) -> Result<HashMap<String, String>> {
        Ok(Url::parse(location)?
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect())
    }

    fn query(ticket: &str, kind: &str) -> VerifyQuery {
        VerifyQuery {
            ticket: Some(ticket.to_string()),
            kind: Some(kind.to_string()),
            redirect_to: Some("https://app.example.com/welcome".to_string()),
        }
    }

    async fn signed_up(h: &Harness) -> Result<String> {
        h.orchestrator
            .sign_up_email_password(EmailPasswordSignUpRequest {
                email: "a@x.com".to_string(),
                password: "correct horse".to_string(),
                options: SignUpOptions::default(),
            })
            .await?;
        Ok(h.emails.last()?.locals.ticket)
    }

    #[test]
    fn backend_failures_redirect_without_details() -> Result<()> {
        let err = AuthError::Transient(
            "failed to fetch user: error communicating with database: connection refused (10.0.0.5:5432)"
                .to_string(),
        );
        let redirect = super::failure("https://app.example.com/", &err);
        assert_eq!(redirect.error, Some("service-unavailable"));
        assert!(!redirect.location.contains("10.0.0.5"));
        assert!(!redirect.location.contains("database"));
        let p = params(&redirect.location)?;
        assert_eq!(
            p.get("errorDescription").map(String::as_str),
            Some("service unavailable, retry later")
        );

        let redirect = super::failure(
            "https://app.example.com/",
            &AuthError::Configuration("jwt key rejected".to_string()),
        );
        assert!(!redirect.location.contains("jwt"));
        Ok(())
    }

    #[tokio::test]
    async fn verify_marks_email_verified_once() -> Result<()> {
        let h = harness(test_config())?;
        let ticket = signed_up(&h).await?;

        let first = h.orchestrator.verify(query(&ticket, "emailVerify")).await;
        assert_eq!(first.error, None);
        assert!(first.location.starts_with("https://app.example.com/welcome?"));
        let p = params(&first.location)?;
        assert_eq!(p.get("type").map(String::as_str), Some("emailVerify"));
        let refresh_token = p.get("refreshToken").ok_or_else(|| anyhow!("no token"))?;

        let user = h
            .store
            .get_user_by_email("a@x.com")
            .await?
            .ok_or_else(|| anyhow!("user missing"))?;
        assert!(user.email_verified);
        assert_eq!(user.ticket, None);
        assert_eq!(user.ticket_expires_at, None);
        assert_eq!(h.orchestrator.sessions().owner_of(refresh_token).await?, user.id);

        let second = h.orchestrator.verify(query(&ticket, "emailVerify")).await;
        assert_eq!(second.error, Some("invalid-ticket"));
        let p = params(&second.location)?;
        assert_eq!(p.get("error").map(String::as_str), Some("invalid-ticket"));
        assert!(p.contains_key("errorDescription"));
        Ok(())
    }

    #[tokio::test]
    async fn wrong_type_is_invalid_ticket() -> Result<()> {
        let h = harness(test_config())?;
        let ticket = signed_up(&h).await?;
        let outcome = h.orchestrator.verify(query(&ticket, "passwordReset")).await;
        assert_eq!(outcome.error, Some("invalid-ticket"));

        for kind in ["mfaTotp", "nonsense"] {
            let outcome = h.orchestrator.verify(query(&ticket, kind)).await;
            assert_eq!(outcome.error, Some("invalid-ticket"));
        }
        // Still redeemable with the right type.
        let outcome = h.orchestrator.verify(query(&ticket, "emailVerify")).await;
        assert_eq!(outcome.error, None);
        Ok(())
    }

    #[tokio::test]
    async fn expired_ticket_redirects_with_error() -> Result<()> {
        let h = harness(test_config())?;
        let user = h
            .store
            .insert_user(NewUser {
                email: Some("a@x.com".to_string()),
                locale: "en".to_string(),
                default_role: "user".to_string(),
                ..NewUser::default()
            })
            .await?;
        let stale = IssuedTicket::mint(
            TicketPurpose::EmailVerify,
            60,
            Utc::now() - Duration::seconds(120),
        );
        h.store.update_user(user.id, &stale.patch()).await?;

        let outcome = h
            .orchestrator
            .verify(query(&stale.ticket.to_string(), "emailVerify"))
            .await;
        assert_eq!(outcome.error, Some("expired-ticket"));
        Ok(())
    }

    #[tokio::test]
    async fn disallowed_redirect_goes_to_client_url() -> Result<()> {
        let h = harness(test_config())?;
        let ticket = signed_up(&h).await?;
        let outcome = h
            .orchestrator
            .verify(VerifyQuery {
                redirect_to: Some("https://evil.com/phish".to_string()),
                ..query(&ticket, "emailVerify")
            })
            .await;
        assert_eq!(outcome.error, Some("redirect-not-allowed"));
        assert!(outcome.location.starts_with("https://app.example.com/?"));

        // The ticket was not touched.
        let user = h
            .store
            .get_user_by_email("a@x.com")
            .await?
            .ok_or_else(|| anyhow!("user missing"))?;
        assert_eq!(user.ticket.as_deref(), Some(ticket.as_str()));
        Ok(())
    }

    #[tokio::test]
    async fn missing_parameters_still_redirect() -> Result<()> {
        let h = harness(test_config())?;
        let outcome = h.orchestrator.verify(VerifyQuery::default()).await;
        assert_eq!(outcome.error, Some("invalid-ticket"));
        assert!(outcome.location.starts_with("https://app.example.com"));
        Ok(())
    }

    #[tokio::test]
    async fn email_change_swaps_address() -> Result<()> {
        let h = harness(test_config())?;
        let user = h
            .store
            .insert_user(NewUser {
                email: Some("a@x.com".to_string()),
                email_verified: true,
                locale: "en".to_string(),
                default_role: "user".to_string(),
                ..NewUser::default()
            })
            .await?;
        h.orchestrator
            .request_email_change(
                user.id,
                EmailChangeRequest {
                    new_email: "b@x.com".to_string(),
                    options: RedirectOptions::default(),
                },
            )
            .await?;
        let ticket = h.emails.last()?.locals.ticket;

        let outcome = h
            .orchestrator
            .verify(query(&ticket, "emailConfirmChange"))
            .await;
        assert_eq!(outcome.error, None);
        let user = h
            .store
            .get_user_by_id(user.id)
            .await?
            .ok_or_else(|| anyhow!("user missing"))?;
        assert_eq!(user.email.as_deref(), Some("b@x.com"));
        assert_eq!(user.new_email, None);
        Ok(())
    }

    #[tokio::test]
    async fn email_change_to_claimed_address_fails() -> Result<()> {
        let h = harness(test_config())?;
        let user = h
            .store
            .insert_user(NewUser {
                email: Some("a@x.com".to_string()),
                email_verified: true,
                locale: "en".to_string(),
                default_role: "user".to_string(),
                ..NewUser::default()
            })
            .await?;
        h.orchestrator
            .request_email_change(
                user.id,
                EmailChangeRequest {
                    new_email: "b@x.com".to_string(),
                    options: RedirectOptions::default(),
                },
            )
            .await?;
        let ticket = h.emails.last()?.locals.ticket;

        // Someone else takes the address before the link is clicked.
        h.store
            .insert_user(NewUser {
                email: Some("b@x.com".to_string()),
                locale: "en".to_string(),
                default_role: "user".to_string(),
                ..NewUser::default()
            })
            .await?;

        let outcome = h
            .orchestrator
            .verify(query(&ticket, "emailConfirmChange"))
            .await;
        assert_eq!(outcome.error, Some("email-already-in-use"));
        let user = h
            .store
            .get_user_by_id(user.id)
            .await?
            .ok_or_else(|| anyhow!("user missing"))?;
        assert_eq!(user.email.as_deref(), Some("a@x.com"));
        Ok(())
    }

    #[tokio::test]
    async fn passwordless_link_verifies_email() -> Result<()> {
        let h = harness(test_config().with_passwordless_enabled(true))?;
        h.orchestrator
            .sign_in_passwordless_email(PasswordlessEmailRequest {
                email: "a@x.com".to_string(),
                options: SignUpOptions::default(),
            })
            .await?;
        let ticket = h.emails.last()?.locals.ticket;
        let outcome = h
            .orchestrator
            .verify(query(&ticket, "signinPasswordless"))
            .await;
        assert_eq!(outcome.error, None);
        let user = h
            .store
            .get_user_by_email("a@x.com")
            .await?
            .ok_or_else(|| anyhow!("user missing"))?;
        assert!(user.email_verified);
        Ok(())
    }

    #[tokio::test]
    async fn disabled_user_cannot_redeem() -> Result<()> {
        let h = harness(test_config())?;
        let ticket = signed_up(&h).await?;
        let user = h
            .store
            .get_user_by_email("a@x.com")
            .await?
            .ok_or_else(|| anyhow!("user missing"))?;
        h.store
            .update_user(
                user.id,
                &UserPatch {
                    disabled: Some(true),
                    ..UserPatch::default()
                },
            )
            .await?;
        let outcome = h.orchestrator.verify(query(&ticket, "emailVerify")).await;
        assert_eq!(outcome.error, Some(AuthError::Disabled.code()));
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_redemptions_apply_once() -> Result<()> {
        let h = harness(test_config())?;
        let ticket = signed_up(&h).await?;
        let (a, b) = tokio::join!(
            h.orchestrator.verify(query(&ticket, "emailVerify")),
            h.orchestrator.verify(query(&ticket, "emailVerify")),
        );
        let successes = [a.error, b.error].iter().filter(|e| e.is_none()).count();
        assert_eq!(successes, 1);
        Ok(())
    }
}
