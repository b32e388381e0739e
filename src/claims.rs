//! Access token signing.
//!
//! Tokens are HS256 JWTs carrying the standard `sub`/`iat`/`exp` claims and a
//! namespaced block for the downstream authorization layer:
//!
//! ```json
//! {
//!   "sub": "<user id>",
//!   "https://hasura.io/jwt/claims": {
//!     "x-hasura-user-id": "<user id>",
//!     "x-hasura-default-role": "user",
//!     "x-hasura-allowed-roles": ["user", "me"]
//!   }
//! }
//! ```

use crate::error::AuthError;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value, json};
use uuid::Uuid;

pub const DEFAULT_CLAIMS_NAMESPACE: &str = "https://hasura.io/jwt/claims";
const MIN_SECRET_BYTES: usize = 32;
const USER_ID_CLAIM: &str = "x-hasura-user-id";
const DEFAULT_ROLE_CLAIM: &str = "x-hasura-default-role";
const ALLOWED_ROLES_CLAIM: &str = "x-hasura-allowed-roles";

/// Claims recovered from a verified access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessClaims {
    pub user_id: Uuid,
    pub default_role: String,
    pub allowed_roles: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

pub trait ClaimsSigner: Send + Sync {
    /// Sign an access token valid for `ttl_seconds`.
    ///
    /// # Errors
    /// `Configuration` when the token cannot be produced.
    fn sign(
        &self,
        user_id: Uuid,
        roles: &[String],
        default_role: &str,
        ttl_seconds: i64,
    ) -> Result<String, AuthError>;

    /// Verify signature and expiry.
    ///
    /// # Errors
    /// `Unauthenticated` for anything that is not a live token issued by us.
    fn verify(&self, token: &str) -> Result<AccessClaims, AuthError>;
}

pub struct JwtClaimsSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    namespace: String,
}

impl JwtClaimsSigner {
    /// # Errors
    /// `Configuration` if the secret is shorter than 32 bytes.
    pub fn new(secret: &SecretString, namespace: String) -> Result<Self, AuthError> {
        let secret = secret.expose_secret().as_bytes();
        if secret.len() < MIN_SECRET_BYTES {
            return Err(AuthError::Configuration(format!(
                "JWT secret must be at least {MIN_SECRET_BYTES} bytes"
            )));
        }
        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            namespace,
        })
    }

    fn validation() -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        validation
    }
}

impl ClaimsSigner for JwtClaimsSigner {
    fn sign(
        &self,
        user_id: Uuid,
        roles: &[String],
        default_role: &str,
        ttl_seconds: i64,
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let exp = now + Duration::seconds(ttl_seconds);

        let mut claims = Map::new();
        claims.insert("sub".to_string(), json!(user_id.to_string()));
        claims.insert("iat".to_string(), json!(now.timestamp()));
        claims.insert("exp".to_string(), json!(exp.timestamp()));
        claims.insert(
            self.namespace.clone(),
            json!({
                USER_ID_CLAIM: user_id.to_string(),
                DEFAULT_ROLE_CLAIM: default_role,
                ALLOWED_ROLES_CLAIM: roles,
            }),
        );

        encode(
            &Header::new(Algorithm::HS256),
            &Value::Object(claims),
            &self.encoding_key,
        )
        .map_err(|err| AuthError::Configuration(format!("failed to sign access token: {err}")))
    }

    fn verify(&self, token: &str) -> Result<AccessClaims, AuthError> {
        let data = decode::<Value>(token, &self.decoding_key, &Self::validation())
            .map_err(|_| AuthError::Unauthenticated)?;
        let claims = data.claims;

        let user_id = claims
            .get("sub")
            .and_then(Value::as_str)
            .and_then(|sub| Uuid::parse_str(sub).ok())
            .ok_or(AuthError::Unauthenticated)?;
        let expires_at = claims
            .get("exp")
            .and_then(Value::as_i64)
            .and_then(|exp| DateTime::from_timestamp(exp, 0))
            .ok_or(AuthError::Unauthenticated)?;
        let block = claims
            .get(&self.namespace)
            .ok_or(AuthError::Unauthenticated)?;
        let default_role = block
            .get(DEFAULT_ROLE_CLAIM)
            .and_then(Value::as_str)
            .ok_or(AuthError::Unauthenticated)?
            .to_string();
        let allowed_roles = block
            .get(ALLOWED_ROLES_CLAIM)
            .and_then(Value::as_array)
            .map(|roles| {
                roles
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(AccessClaims {
            user_id,
            default_role,
            allowed_roles,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn signer() -> Result<JwtClaimsSigner> {
        Ok(JwtClaimsSigner::new(
            &SecretString::from(SECRET.to_string()),
            DEFAULT_CLAIMS_NAMESPACE.to_string(),
        )?)
    }

    #[test]
    fn short_secret_is_a_configuration_error() {
        let result = JwtClaimsSigner::new(
            &SecretString::from("too-short".to_string()),
            DEFAULT_CLAIMS_NAMESPACE.to_string(),
        );
        assert!(matches!(result, Err(AuthError::Configuration(_))));
    }

    #[test]
    fn signed_token_verifies_with_namespaced_claims() -> Result<()> {
        let signer = signer()?;
        let user_id = Uuid::new_v4();
        let roles = vec!["user".to_string(), "me".to_string()];
        let token = signer.sign(user_id, &roles, "user", 900)?;

        let claims = signer.verify(&token)?;
        assert_eq!(claims.user_id, user_id);
        assert_eq!(claims.default_role, "user");
        assert_eq!(claims.allowed_roles, roles);
        assert!(claims.expires_at > Utc::now());
        Ok(())
    }

    #[test]
    fn expired_token_is_rejected() -> Result<()> {
        let signer = signer()?;
        let token = signer.sign(Uuid::new_v4(), &[], "user", -10)?;
        assert!(matches!(
            signer.verify(&token),
            Err(AuthError::Unauthenticated)
        ));
        Ok(())
    }

    #[test]
    fn token_from_other_secret_is_rejected() -> Result<()> {
        let other = JwtClaimsSigner::new(
            &SecretString::from("another-secret-of-at-least-32-bytes!".to_string()),
            DEFAULT_CLAIMS_NAMESPACE.to_string(),
        )?;
        let token = other.sign(Uuid::new_v4(), &[], "user", 900)?;
        assert!(signer()?.verify(&token).is_err());
        Ok(())
    }
}
