//! `WebAuthn` registration ceremonies.
//!
//! A ceremony moves a user through `NoChallenge -> ChallengeIssued ->
//! NoChallenge`. The challenge, the serialized ceremony state and its expiry
//! live on the user row (`current_challenge`, `challenge_state`,
//! `challenge_expires_at`), never in process memory, so any instance can
//! finish a ceremony another instance started.
//!
//! Cryptographic verification sits behind [`CredentialVerifier`];
//! [`WebauthnRsVerifier`] is the `webauthn-rs` implementation.

mod challenge;
mod verifier;

pub use challenge::ChallengeManager;
pub use verifier::WebauthnRsVerifier;

use crate::error::AuthError;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

/// Output of starting a registration ceremony.
#[derive(Debug, Clone)]
pub struct RegistrationStart {
    /// `PublicKeyCredentialCreationOptions` as sent to the browser.
    pub options: Value,
    /// base64url challenge embedded in `options`.
    pub challenge: String,
    /// Opaque ceremony state needed to finish.
    pub state: String,
}

/// A credential that passed attestation checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedCredential {
    pub credential_id: String,
    pub public_key: String,
    pub counter: u32,
}

pub trait CredentialVerifier: Send + Sync {
    /// # Errors
    /// `Configuration` if the relying party cannot produce options.
    fn start_registration(
        &self,
        user_id: Uuid,
        user_name: &str,
        display_name: &str,
        exclude_credentials: &[String],
    ) -> Result<RegistrationStart, AuthError>;

    /// # Errors
    /// `InvalidCredential` when the attestation does not verify.
    fn finish_registration(
        &self,
        credential: &Value,
        state: &str,
    ) -> Result<VerifiedCredential, AuthError>;
}

/// The parts of `clientDataJSON` the engine looks at before verification.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ClientData {
    pub challenge: String,
    pub origin: String,
}

/// Decode `response.clientDataJSON` from a credential.
///
/// # Errors
/// `InvalidCredential` if the field is missing or not base64url JSON.
pub fn client_data(credential: &Value) -> Result<ClientData, AuthError> {
    let encoded = credential
        .pointer("/response/clientDataJSON")
        .and_then(Value::as_str)
        .ok_or_else(|| AuthError::InvalidCredential("missing clientDataJSON".to_string()))?;
    let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .map_err(|_| AuthError::InvalidCredential("clientDataJSON is not base64url".to_string()))?;
    serde_json::from_slice(&raw)
        .map_err(|_| AuthError::InvalidCredential("clientDataJSON is not valid JSON".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode(value: &Value) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(value.to_string())
    }

    #[test]
    fn client_data_is_decoded() -> Result<(), AuthError> {
        let credential = json!({
            "response": {
                "clientDataJSON": encode(&json!({
                    "type": "webauthn.create",
                    "challenge": "abc",
                    "origin": "https://app.example.com"
                }))
            }
        });
        let data = client_data(&credential)?;
        assert_eq!(data.challenge, "abc");
        assert_eq!(data.origin, "https://app.example.com");
        Ok(())
    }

    #[test]
    fn malformed_client_data_is_invalid_credential() {
        for credential in [
            json!({}),
            json!({"response": {"clientDataJSON": "%%%"}}),
            json!({"response": {"clientDataJSON": "bm90IGpzb24"}}),
        ] {
            assert!(matches!(
                client_data(&credential),
                Err(AuthError::InvalidCredential(_))
            ));
        }
    }
}
