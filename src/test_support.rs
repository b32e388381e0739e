//! Shared fakes for unit tests.

use crate::{
    claims::{DEFAULT_CLAIMS_NAMESPACE, JwtClaimsSigner},
    config::AuthConfig,
    email::{EmailDispatcher, EmailMessage},
    error::AuthError,
    lifecycle::Orchestrator,
    password::PasswordHasher,
    store::MemoryIdentityStore,
    webauthn::{CredentialVerifier, RegistrationStart, VerifiedCredential, client_data},
};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use base64::Engine;
use secrecy::SecretString;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const TEST_SECRET: &str = "0123456789abcdef0123456789abcdef";
pub const TEST_ORIGIN: &str = "https://app.example.com";

/// Accepts any credential whose `clientDataJSON` echoes the issued challenge.
#[derive(Debug, Default, Clone, Copy)]
pub struct FakeVerifier;

impl FakeVerifier {
    /// Credential id that always fails attestation.
    pub const REJECTED_ID: &'static str = "rejected-credential";
}

impl CredentialVerifier for FakeVerifier {
    fn start_registration(
        &self,
        user_id: Uuid,
        user_name: &str,
        display_name: &str,
        exclude_credentials: &[String],
    ) -> Result<RegistrationStart, AuthError> {
        let challenge = Uuid::new_v4().simple().to_string();
        let exclude: Vec<Value> = exclude_credentials
            .iter()
            .map(|id| json!({"type": "public-key", "id": id}))
            .collect();
        let options = json!({
            "publicKey": {
                "challenge": challenge,
                "rp": {"id": "app.example.com", "name": "Gatehouse"},
                "user": {"id": user_id, "name": user_name, "displayName": display_name},
                "excludeCredentials": exclude,
            }
        });
        Ok(RegistrationStart {
            options,
            state: json!({"challenge": challenge}).to_string(),
            challenge,
        })
    }

    fn finish_registration(
        &self,
        credential: &Value,
        state: &str,
    ) -> Result<VerifiedCredential, AuthError> {
        let client = client_data(credential)?;
        let state: Value = serde_json::from_str(state)
            .map_err(|_| AuthError::InvalidCredential("unreadable state".to_string()))?;
        if state["challenge"].as_str() != Some(client.challenge.as_str()) {
            return Err(AuthError::InvalidCredential("challenge mismatch".to_string()));
        }
        let id = credential["id"]
            .as_str()
            .ok_or_else(|| AuthError::InvalidCredential("missing id".to_string()))?;
        if id == Self::REJECTED_ID {
            return Err(AuthError::InvalidCredential("attestation rejected".to_string()));
        }
        Ok(VerifiedCredential {
            credential_id: id.to_string(),
            public_key: "{}".to_string(),
            counter: 0,
        })
    }
}

/// A registration response answering `challenge` from [`TEST_ORIGIN`].
pub fn fake_credential(challenge: &str, id: &str) -> Value {
    let client_data = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(
        json!({
            "type": "webauthn.create",
            "challenge": challenge,
            "origin": TEST_ORIGIN,
        })
        .to_string(),
    );
    json!({
        "id": id,
        "rawId": id,
        "type": "public-key",
        "response": {"attestationObject": "AAAA", "clientDataJSON": client_data}
    })
}

/// Keeps every message it is handed; optionally fails after recording.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<EmailMessage>>,
    fail: bool,
}

impl RecordingDispatcher {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::default(),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    pub fn last(&self) -> Result<EmailMessage> {
        self.sent().pop().ok_or_else(|| anyhow!("no email sent"))
    }
}

#[async_trait]
impl EmailDispatcher for RecordingDispatcher {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message.clone());
        }
        if self.fail {
            return Err(anyhow!("mailer unavailable"));
        }
        Ok(())
    }
}

/// Stores `plain:<password>`; argon2 is too slow for unit tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainHasher;

impl PasswordHasher for PlainHasher {
    fn hash(&self, password: &str) -> Result<String, AuthError> {
        Ok(format!("plain:{password}"))
    }

    fn verify(&self, password: &str, stored_hash: &str) -> bool {
        stored_hash.strip_prefix("plain:") == Some(password)
    }
}

pub fn test_config() -> AuthConfig {
    AuthConfig::new("https://auth.example.com".to_string())
        .with_client_url(Some(TEST_ORIGIN.to_string()))
        .with_allowed_redirect_urls(vec!["https://partner.example.com/**".to_string()])
}

pub struct Harness {
    pub store: Arc<MemoryIdentityStore>,
    pub emails: Arc<RecordingDispatcher>,
    pub orchestrator: Orchestrator,
}

pub fn harness(config: AuthConfig) -> Result<Harness> {
    harness_with(config, RecordingDispatcher::default())
}

pub fn harness_with(config: AuthConfig, emails: RecordingDispatcher) -> Result<Harness> {
    build(config, emails, Arc::new(PlainHasher))
}

/// Same as [`harness`] with a real or instrumented password hasher.
pub fn harness_with_passwords(
    config: AuthConfig,
    passwords: Arc<dyn PasswordHasher>,
) -> Result<Harness> {
    build(config, RecordingDispatcher::default(), passwords)
}

fn build(
    config: AuthConfig,
    emails: RecordingDispatcher,
    passwords: Arc<dyn PasswordHasher>,
) -> Result<Harness> {
    let store = Arc::new(MemoryIdentityStore::new());
    let emails = Arc::new(emails);
    let signer = JwtClaimsSigner::new(
        &SecretString::from(TEST_SECRET.to_string()),
        DEFAULT_CLAIMS_NAMESPACE.to_string(),
    )?;
    let orchestrator = Orchestrator::new(
        config,
        store.clone(),
        Arc::new(signer),
        emails.clone(),
        passwords,
    )
    .with_credential_verifier(Arc::new(FakeVerifier), 300);
    Ok(Harness {
        store,
        emails,
        orchestrator,
    })
}
