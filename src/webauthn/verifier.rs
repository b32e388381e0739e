use super::{CredentialVerifier, RegistrationStart, VerifiedCredential, client_data};
use crate::{
    config::{WebauthnConfig, normalize_origin},
    error::AuthError,
};
use serde_json::Value;
use std::collections::HashMap;
use url::Url;
use uuid::Uuid;
use webauthn_rs::prelude::*;

/// One `Webauthn` instance per allowed origin, all sharing the RP id.
pub struct WebauthnRsVerifier {
    primary_origin: String,
    webauthn_by_origin: HashMap<String, Webauthn>,
}

impl WebauthnRsVerifier {
    /// # Errors
    /// `Configuration` if `webauthn-rs` rejects the RP id / origin pair.
    pub fn new(config: &WebauthnConfig) -> Result<Self, AuthError> {
        let mut webauthn_by_origin = HashMap::new();
        for origin in config.allowed_origins() {
            let rp_origin_url = Url::parse(origin).map_err(|err| {
                AuthError::Configuration(format!("invalid WebAuthn origin {origin}: {err}"))
            })?;
            let webauthn = WebauthnBuilder::new(config.rp_id(), &rp_origin_url)
                .and_then(|builder| builder.rp_name(config.rp_name()).build())
                .map_err(|err| {
                    AuthError::Configuration(format!("invalid WebAuthn relying party: {err}"))
                })?;
            webauthn_by_origin.insert(origin.clone(), webauthn);
        }

        let primary_origin = config
            .allowed_origins()
            .first()
            .cloned()
            .ok_or_else(|| {
                AuthError::Configuration("WebAuthn allowed origins must not be empty".to_string())
            })?;

        Ok(Self {
            primary_origin,
            webauthn_by_origin,
        })
    }

    fn webauthn_for_origin(&self, origin: &str) -> Option<&Webauthn> {
        self.webauthn_by_origin.get(origin)
    }
}

impl CredentialVerifier for WebauthnRsVerifier {
    fn start_registration(
        &self,
        user_id: Uuid,
        user_name: &str,
        display_name: &str,
        exclude_credentials: &[String],
    ) -> Result<RegistrationStart, AuthError> {
        let webauthn = self
            .webauthn_for_origin(&self.primary_origin)
            .ok_or_else(|| AuthError::Configuration("no WebAuthn relying party".to_string()))?;

        let exclude: Vec<CredentialID> = exclude_credentials
            .iter()
            .filter_map(|id| serde_json::from_value(Value::String(id.clone())).ok())
            .collect();
        let exclude = (!exclude.is_empty()).then_some(exclude);

        let (options, registration) = webauthn
            .start_passkey_registration(user_id, user_name, display_name, exclude)
            .map_err(|err| {
                AuthError::Configuration(format!("failed to start WebAuthn registration: {err}"))
            })?;

        let options = serde_json::to_value(&options).map_err(|err| {
            AuthError::Configuration(format!("failed to encode creation options: {err}"))
        })?;
        let challenge = options
            .pointer("/publicKey/challenge")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AuthError::Configuration("creation options carry no challenge".to_string())
            })?
            .to_string();
        let state = serde_json::to_string(&registration).map_err(|err| {
            AuthError::Configuration(format!("failed to encode registration state: {err}"))
        })?;

        Ok(RegistrationStart {
            options,
            challenge,
            state,
        })
    }

    fn finish_registration(
        &self,
        credential: &Value,
        state: &str,
    ) -> Result<VerifiedCredential, AuthError> {
        let client = client_data(credential)?;
        let origin = normalize_origin(&client.origin)
            .map_err(|_| AuthError::InvalidCredential("unparsable origin".to_string()))?;
        let webauthn = self
            .webauthn_for_origin(&origin)
            .ok_or_else(|| AuthError::InvalidCredential(format!("origin {origin} not allowed")))?;

        let registration: PasskeyRegistration = serde_json::from_str(state)
            .map_err(|_| AuthError::InvalidCredential("unreadable ceremony state".to_string()))?;
        let response: RegisterPublicKeyCredential = serde_json::from_value(credential.clone())
            .map_err(|err| AuthError::InvalidCredential(format!("malformed credential: {err}")))?;

        let passkey = webauthn
            .finish_passkey_registration(&response, &registration)
            .map_err(|err| AuthError::InvalidCredential(err.to_string()))?;

        let credential_id = serde_json::to_value(passkey.cred_id())
            .ok()
            .and_then(|value| value.as_str().map(ToString::to_string))
            .ok_or_else(|| AuthError::InvalidCredential("unreadable credential id".to_string()))?;
        let public_key = serde_json::to_string(&passkey).map_err(|err| {
            AuthError::Configuration(format!("failed to serialize passkey: {err}"))
        })?;

        Ok(VerifiedCredential {
            credential_id,
            public_key,
            counter: 0,
        })
    }
}
