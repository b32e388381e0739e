use super::{CredentialVerifier, client_data};
use crate::{
    error::{AuthError, Resource},
    store::{Authenticator, IdentityStore, NewAuthenticator, User, UserPatch},
};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct ChallengeManager {
    store: Arc<dyn IdentityStore>,
    verifier: Arc<dyn CredentialVerifier>,
    challenge_ttl_seconds: i64,
}

impl ChallengeManager {
    #[must_use]
    pub fn new(
        store: Arc<dyn IdentityStore>,
        verifier: Arc<dyn CredentialVerifier>,
        challenge_ttl_seconds: i64,
    ) -> Self {
        Self {
            store,
            verifier,
            challenge_ttl_seconds,
        }
    }

    /// Issue a fresh challenge for `user`, replacing any outstanding one.
    ///
    /// Credentials the user already holds are excluded from the prompt.
    ///
    /// # Errors
    /// `NotFound(User)` if the row vanished, `Configuration` if the relying
    /// party cannot produce options, `Transient` on store failure.
    pub async fn begin_registration(&self, user: &User) -> Result<Value, AuthError> {
        let exclude: Vec<String> = self
            .store
            .list_user_authenticators(user.id)
            .await?
            .into_iter()
            .map(|authenticator| authenticator.credential_id)
            .collect();

        let user_name = user
            .new_email
            .as_deref()
            .or(user.email.as_deref())
            .unwrap_or(user.display_name.as_str());
        let display_name = if user.display_name.is_empty() {
            user_name
        } else {
            user.display_name.as_str()
        };

        let start = self
            .verifier
            .start_registration(user.id, user_name, display_name, &exclude)?;
        let patch = UserPatch {
            current_challenge: Some(Some(start.challenge)),
            challenge_state: Some(Some(start.state)),
            challenge_expires_at: Some(Some(
                Utc::now() + Duration::seconds(self.challenge_ttl_seconds),
            )),
            ..UserPatch::default()
        };
        self.store
            .update_user(user.id, &patch)
            .await?
            .ok_or(AuthError::NotFound(Resource::User))?;

        debug!(user_id = %user.id, excluded = exclude.len(), "webauthn challenge issued");
        Ok(start.options)
    }

    /// The user a pending challenge belongs to.
    ///
    /// # Errors
    /// `NotFound(Challenge)` if no user holds it.
    pub async fn owner_of(&self, challenge: &str) -> Result<User, AuthError> {
        self.store
            .get_user_by_challenge(challenge)
            .await?
            .ok_or(AuthError::NotFound(Resource::Challenge))
    }

    /// Verify `credential` against the challenge stored on `user`, then clear
    /// the challenge together with `extra` and store the authenticator.
    ///
    /// A failed verification leaves the challenge in place so the client can
    /// retry until it expires.
    ///
    /// # Errors
    /// `NotFound(Challenge)` if there is no matching challenge or it was
    /// consumed concurrently, `Expired(Challenge)` past its TTL,
    /// `InvalidCredential` when attestation fails, `Conflict` when `extra`
    /// claims an email in use or the credential is already registered.
    pub async fn complete_registration(
        &self,
        user: &User,
        credential: &Value,
        nickname: Option<String>,
        extra: UserPatch,
    ) -> Result<Authenticator, AuthError> {
        self.complete_registration_at(user, credential, nickname, extra, Utc::now())
            .await
    }

    pub(crate) async fn complete_registration_at(
        &self,
        user: &User,
        credential: &Value,
        nickname: Option<String>,
        extra: UserPatch,
        now: DateTime<Utc>,
    ) -> Result<Authenticator, AuthError> {
        let (Some(challenge), Some(state)) = (
            user.current_challenge.as_deref(),
            user.challenge_state.as_deref(),
        ) else {
            return Err(AuthError::NotFound(Resource::Challenge));
        };
        if user
            .challenge_expires_at
            .is_some_and(|expires_at| expires_at < now)
        {
            return Err(AuthError::Expired(Resource::Challenge));
        }
        if client_data(credential)?.challenge != challenge {
            return Err(AuthError::NotFound(Resource::Challenge));
        }

        let verified = self
            .verifier
            .finish_registration(credential, state)
            .inspect_err(|err| warn!(user_id = %user.id, "webauthn verification failed: {err}"))?;

        if !self
            .store
            .update_user_if_challenge(user.id, challenge, &extra.clearing_challenge())
            .await?
        {
            return Err(AuthError::NotFound(Resource::Challenge));
        }

        let authenticator = self
            .store
            .insert_user_authenticator(&NewAuthenticator {
                user_id: user.id,
                credential_id: verified.credential_id,
                public_key: verified.public_key,
                counter: verified.counter,
                nickname,
            })
            .await?;

        info!(user_id = %user.id, "authenticator registered");
        Ok(authenticator)
    }

    /// Store the signature counter reported by a successful assertion.
    ///
    /// # Errors
    /// `InvalidCredential` if the counter moved backwards or the credential is
    /// unknown.
    pub async fn record_authentication(
        &self,
        credential_id: &str,
        counter: u32,
    ) -> Result<(), AuthError> {
        if self
            .store
            .update_authenticator_counter(credential_id, counter)
            .await?
        {
            Ok(())
        } else {
            warn!(credential_id, counter, "rejected signature counter");
            Err(AuthError::InvalidCredential(
                "signature counter did not increase".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::ConflictReason,
        store::{MemoryIdentityStore, NewUser},
        test_support::{FakeVerifier, fake_credential},
    };
    use anyhow::{Result, anyhow};

    struct Fixture {
        store: Arc<MemoryIdentityStore>,
        challenges: ChallengeManager,
        user: User,
    }

    async fn fixture() -> Result<Fixture> {
        let store = Arc::new(MemoryIdentityStore::new());
        let challenges = ChallengeManager::new(store.clone(), Arc::new(FakeVerifier), 300);
        let user = store
            .insert_user(NewUser {
                email: Some("a@x.com".to_string()),
                email_verified: true,
                locale: "en".to_string(),
                default_role: "user".to_string(),
                ..NewUser::default()
            })
            .await?;
        Ok(Fixture {
            store,
            challenges,
            user,
        })
    }

    async fn reload(f: &Fixture) -> Result<User> {
        f.store
            .get_user_by_id(f.user.id)
            .await?
            .ok_or_else(|| anyhow!("user missing"))
    }

    fn challenge_of(options: &Value) -> Result<String> {
        options
            .pointer("/publicKey/challenge")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| anyhow!("challenge missing"))
    }

    #[tokio::test]
    async fn successful_ceremony_clears_challenge() -> Result<()> {
        let f = fixture().await?;
        let options = f.challenges.begin_registration(&f.user).await?;
        let challenge = challenge_of(&options)?;
        let user = reload(&f).await?;
        assert_eq!(user.current_challenge.as_deref(), Some(challenge.as_str()));

        let authenticator = f
            .challenges
            .complete_registration(
                &user,
                &fake_credential(&challenge, "cred-1"),
                Some("laptop".to_string()),
                UserPatch::default(),
            )
            .await?;
        assert_eq!(authenticator.credential_id, "cred-1");
        assert_eq!(authenticator.counter, 0);

        let user = reload(&f).await?;
        assert!(user.current_challenge.is_none());
        assert!(user.challenge_state.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn failed_verification_keeps_challenge() -> Result<()> {
        let f = fixture().await?;
        let challenge = challenge_of(&f.challenges.begin_registration(&f.user).await?)?;
        let user = reload(&f).await?;

        let result = f
            .challenges
            .complete_registration(
                &user,
                &fake_credential(&challenge, FakeVerifier::REJECTED_ID),
                None,
                UserPatch::default(),
            )
            .await;
        assert!(matches!(result, Err(AuthError::InvalidCredential(_))));
        assert_eq!(
            reload(&f).await?.current_challenge.as_deref(),
            Some(challenge.as_str())
        );
        Ok(())
    }

    #[tokio::test]
    async fn stale_challenge_is_expired() -> Result<()> {
        let f = fixture().await?;
        let challenge = challenge_of(&f.challenges.begin_registration(&f.user).await?)?;
        let user = reload(&f).await?;
        let later = Utc::now() + Duration::seconds(301);

        let result = f
            .challenges
            .complete_registration_at(
                &user,
                &fake_credential(&challenge, "cred-1"),
                None,
                UserPatch::default(),
                later,
            )
            .await;
        assert!(matches!(result, Err(AuthError::Expired(Resource::Challenge))));
        Ok(())
    }

    #[tokio::test]
    async fn mismatched_challenge_is_rejected() -> Result<()> {
        let f = fixture().await?;
        f.challenges.begin_registration(&f.user).await?;
        let user = reload(&f).await?;

        let result = f
            .challenges
            .complete_registration(
                &user,
                &fake_credential("someone-elses-challenge", "cred-1"),
                None,
                UserPatch::default(),
            )
            .await;
        assert!(matches!(
            result,
            Err(AuthError::NotFound(Resource::Challenge))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn second_completion_with_same_challenge_fails() -> Result<()> {
        let f = fixture().await?;
        let challenge = challenge_of(&f.challenges.begin_registration(&f.user).await?)?;
        let user = reload(&f).await?;
        f.challenges
            .complete_registration(
                &user,
                &fake_credential(&challenge, "cred-1"),
                None,
                UserPatch::default(),
            )
            .await?;

        // Replays the stale snapshot that still carries the challenge.
        let replay = f
            .challenges
            .complete_registration(
                &user,
                &fake_credential(&challenge, "cred-2"),
                None,
                UserPatch::default(),
            )
            .await;
        assert!(matches!(
            replay,
            Err(AuthError::NotFound(Resource::Challenge))
        ));
        assert_eq!(f.store.list_user_authenticators(f.user.id).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn registered_credentials_are_excluded() -> Result<()> {
        let f = fixture().await?;
        let challenge = challenge_of(&f.challenges.begin_registration(&f.user).await?)?;
        let user = reload(&f).await?;
        f.challenges
            .complete_registration(
                &user,
                &fake_credential(&challenge, "cred-1"),
                None,
                UserPatch::default(),
            )
            .await?;

        let options = f.challenges.begin_registration(&user).await?;
        let excluded: Vec<&str> = options
            .pointer("/publicKey/excludeCredentials")
            .and_then(Value::as_array)
            .map(|list| list.iter().filter_map(|c| c["id"].as_str()).collect())
            .unwrap_or_default();
        assert_eq!(excluded, vec!["cred-1"]);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_credential_is_a_conflict() -> Result<()> {
        let f = fixture().await?;
        let challenge = challenge_of(&f.challenges.begin_registration(&f.user).await?)?;
        let user = reload(&f).await?;
        f.challenges
            .complete_registration(
                &user,
                &fake_credential(&challenge, "cred-1"),
                None,
                UserPatch::default(),
            )
            .await?;

        let challenge = challenge_of(&f.challenges.begin_registration(&user).await?)?;
        let user = reload(&f).await?;
        let result = f
            .challenges
            .complete_registration(
                &user,
                &fake_credential(&challenge, "cred-1"),
                None,
                UserPatch::default(),
            )
            .await;
        assert!(matches!(
            result,
            Err(AuthError::Conflict(
                ConflictReason::CredentialAlreadyRegistered
            ))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn counter_must_not_decrease() -> Result<()> {
        let f = fixture().await?;
        let challenge = challenge_of(&f.challenges.begin_registration(&f.user).await?)?;
        let user = reload(&f).await?;
        f.challenges
            .complete_registration(
                &user,
                &fake_credential(&challenge, "cred-1"),
                None,
                UserPatch::default(),
            )
            .await?;

        f.challenges.record_authentication("cred-1", 5).await?;
        f.challenges.record_authentication("cred-1", 5).await?;
        assert!(matches!(
            f.challenges.record_authentication("cred-1", 4).await,
            Err(AuthError::InvalidCredential(_))
        ));
        Ok(())
    }
}
