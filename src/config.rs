//! Engine configuration: URLs, policy switches, TTLs and `WebAuthn` relying party.

use crate::error::AuthError;
use std::time::Duration;
use url::Url;

const DEFAULT_TICKET_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_MFA_TICKET_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_STORE_TIMEOUT_SECONDS: u64 = 5;
const DEFAULT_EMAIL_TIMEOUT_SECONDS: u64 = 10;
const DEFAULT_CHALLENGE_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_PASSWORD_MIN_LENGTH: usize = 9;
const DEFAULT_RP_NAME: &str = "Gatehouse";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    server_url: String,
    client_url: Option<String>,
    allowed_redirect_urls: Vec<String>,
    disable_new_users: bool,
    email_verification_required: bool,
    passwordless_enabled: bool,
    anonymous_users_enabled: bool,
    default_role: String,
    default_allowed_roles: Vec<String>,
    default_locale: String,
    password_min_length: usize,
    ticket_ttl_seconds: i64,
    mfa_ticket_ttl_seconds: i64,
    access_token_ttl_seconds: i64,
    refresh_token_ttl_seconds: i64,
    store_timeout: Duration,
    email_timeout: Duration,
    webauthn: Option<WebauthnConfig>,
}

impl AuthConfig {
    #[must_use]
    pub fn new(server_url: String) -> Self {
        Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            client_url: None,
            allowed_redirect_urls: Vec::new(),
            disable_new_users: false,
            email_verification_required: true,
            passwordless_enabled: false,
            anonymous_users_enabled: false,
            default_role: "user".to_string(),
            default_allowed_roles: vec!["user".to_string(), "me".to_string()],
            default_locale: "en".to_string(),
            password_min_length: DEFAULT_PASSWORD_MIN_LENGTH,
            ticket_ttl_seconds: DEFAULT_TICKET_TTL_SECONDS,
            mfa_ticket_ttl_seconds: DEFAULT_MFA_TICKET_TTL_SECONDS,
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            refresh_token_ttl_seconds: DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
            store_timeout: Duration::from_secs(DEFAULT_STORE_TIMEOUT_SECONDS),
            email_timeout: Duration::from_secs(DEFAULT_EMAIL_TIMEOUT_SECONDS),
            webauthn: None,
        }
    }

    #[must_use]
    pub fn with_client_url(mut self, client_url: Option<String>) -> Self {
        self.client_url = client_url.filter(|url| !url.trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_allowed_redirect_urls(mut self, urls: Vec<String>) -> Self {
        self.allowed_redirect_urls = urls;
        self
    }

    #[must_use]
    pub fn with_disable_new_users(mut self, disabled: bool) -> Self {
        self.disable_new_users = disabled;
        self
    }

    #[must_use]
    pub fn with_email_verification_required(mut self, required: bool) -> Self {
        self.email_verification_required = required;
        self
    }

    #[must_use]
    pub fn with_passwordless_enabled(mut self, enabled: bool) -> Self {
        self.passwordless_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_anonymous_users_enabled(mut self, enabled: bool) -> Self {
        self.anonymous_users_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_default_role(mut self, role: String) -> Self {
        self.default_role = role;
        self
    }

    #[must_use]
    pub fn with_default_allowed_roles(mut self, roles: Vec<String>) -> Self {
        self.default_allowed_roles = roles;
        self
    }

    #[must_use]
    pub fn with_default_locale(mut self, locale: String) -> Self {
        self.default_locale = locale;
        self
    }

    #[must_use]
    pub fn with_password_min_length(mut self, length: usize) -> Self {
        self.password_min_length = length;
        self
    }

    #[must_use]
    pub fn with_ticket_ttl_seconds(mut self, seconds: i64) -> Self {
        self.ticket_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_mfa_ticket_ttl_seconds(mut self, seconds: i64) -> Self {
        self.mfa_ticket_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_email_timeout(mut self, timeout: Duration) -> Self {
        self.email_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_webauthn(mut self, webauthn: Option<WebauthnConfig>) -> Self {
        self.webauthn = webauthn;
        self
    }

    /// Reject settings the engine cannot run with.
    ///
    /// # Errors
    /// Returns `Configuration` if a URL does not parse, a TTL is not positive,
    /// or the default role is not part of the default allowed roles.
    pub fn validate(&self) -> Result<(), AuthError> {
        Url::parse(&self.server_url).map_err(|err| {
            AuthError::Configuration(format!("invalid server URL {}: {err}", self.server_url))
        })?;
        if let Some(client_url) = &self.client_url {
            Url::parse(client_url).map_err(|err| {
                AuthError::Configuration(format!("invalid client URL {client_url}: {err}"))
            })?;
        }
        for (name, ttl) in [
            ("ticket", self.ticket_ttl_seconds),
            ("mfa ticket", self.mfa_ticket_ttl_seconds),
            ("access token", self.access_token_ttl_seconds),
            ("refresh token", self.refresh_token_ttl_seconds),
        ] {
            if ttl <= 0 {
                return Err(AuthError::Configuration(format!(
                    "{name} TTL must be positive, got {ttl}"
                )));
            }
        }
        if !self.default_allowed_roles.contains(&self.default_role) {
            return Err(AuthError::Configuration(format!(
                "default role {} is not in the default allowed roles",
                self.default_role
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    #[must_use]
    pub fn client_url(&self) -> Option<&str> {
        self.client_url.as_deref()
    }

    #[must_use]
    pub fn allowed_redirect_urls(&self) -> &[String] {
        &self.allowed_redirect_urls
    }

    #[must_use]
    pub fn disable_new_users(&self) -> bool {
        self.disable_new_users
    }

    #[must_use]
    pub fn email_verification_required(&self) -> bool {
        self.email_verification_required
    }

    #[must_use]
    pub fn passwordless_enabled(&self) -> bool {
        self.passwordless_enabled
    }

    #[must_use]
    pub fn anonymous_users_enabled(&self) -> bool {
        self.anonymous_users_enabled
    }

    #[must_use]
    pub fn default_role(&self) -> &str {
        &self.default_role
    }

    #[must_use]
    pub fn default_allowed_roles(&self) -> &[String] {
        &self.default_allowed_roles
    }

    #[must_use]
    pub fn default_locale(&self) -> &str {
        &self.default_locale
    }

    #[must_use]
    pub fn password_min_length(&self) -> usize {
        self.password_min_length
    }

    #[must_use]
    pub fn ticket_ttl_seconds(&self) -> i64 {
        self.ticket_ttl_seconds
    }

    #[must_use]
    pub fn mfa_ticket_ttl_seconds(&self) -> i64 {
        self.mfa_ticket_ttl_seconds
    }

    #[must_use]
    pub fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_seconds
    }

    #[must_use]
    pub fn refresh_token_ttl_seconds(&self) -> i64 {
        self.refresh_token_ttl_seconds
    }

    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    #[must_use]
    pub fn email_timeout(&self) -> Duration {
        self.email_timeout
    }

    #[must_use]
    pub fn webauthn(&self) -> Option<&WebauthnConfig> {
        self.webauthn.as_ref()
    }
}

/// Relying party settings for `WebAuthn` ceremonies.
#[derive(Clone, Debug)]
pub struct WebauthnConfig {
    rp_id: String,
    rp_name: String,
    allowed_origins: Vec<String>,
    challenge_ttl_seconds: i64,
}

impl WebauthnConfig {
    /// Create a relying party configuration.
    ///
    /// # Errors
    /// Returns `Configuration` if the RP id is empty or no origin is usable.
    pub fn new(rp_id: String, allowed_origins: Vec<String>) -> Result<Self, AuthError> {
        if rp_id.trim().is_empty() {
            return Err(AuthError::Configuration(
                "WebAuthn RP id must not be empty".to_string(),
            ));
        }

        let allowed_origins = normalize_origins(allowed_origins)?;
        if allowed_origins.is_empty() {
            return Err(AuthError::Configuration(
                "WebAuthn allowed origins must not be empty".to_string(),
            ));
        }

        Ok(Self {
            rp_id,
            rp_name: DEFAULT_RP_NAME.to_string(),
            allowed_origins,
            challenge_ttl_seconds: DEFAULT_CHALLENGE_TTL_SECONDS,
        })
    }

    #[must_use]
    pub fn with_rp_name(mut self, rp_name: String) -> Self {
        self.rp_name = rp_name;
        self
    }

    #[must_use]
    pub fn with_challenge_ttl_seconds(mut self, seconds: i64) -> Self {
        self.challenge_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn rp_id(&self) -> &str {
        &self.rp_id
    }

    #[must_use]
    pub fn rp_name(&self) -> &str {
        &self.rp_name
    }

    #[must_use]
    pub fn allowed_origins(&self) -> &[String] {
        &self.allowed_origins
    }

    #[must_use]
    pub fn challenge_ttl_seconds(&self) -> i64 {
        self.challenge_ttl_seconds
    }
}

fn normalize_origins(origins: Vec<String>) -> Result<Vec<String>, AuthError> {
    let mut normalized = Vec::new();
    for origin in origins {
        let origin = normalize_origin(&origin)?;
        if !normalized.contains(&origin) {
            normalized.push(origin);
        }
    }
    Ok(normalized)
}

/// Reduce a URL to `scheme://host[:port]`.
///
/// # Errors
/// Returns `Configuration` if the value is not a URL with a host.
pub fn normalize_origin(origin: &str) -> Result<String, AuthError> {
    let parsed = Url::parse(origin.trim())
        .map_err(|err| AuthError::Configuration(format!("invalid origin URL {origin}: {err}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| AuthError::Configuration(format!("origin must include a host: {origin}")))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    Ok(format!("{}://{}{}", parsed.scheme(), host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = AuthConfig::new("https://auth.example.com/".to_string());
        assert!(config.validate().is_ok());
        assert_eq!(config.server_url(), "https://auth.example.com");
        assert_eq!(config.ticket_ttl_seconds(), 3600);
        assert_eq!(config.mfa_ticket_ttl_seconds(), 300);
        assert!(config.email_verification_required());
    }

    #[test]
    fn empty_client_url_is_ignored() {
        let config =
            AuthConfig::new("https://auth.example.com".to_string()).with_client_url(Some(" ".into()));
        assert_eq!(config.client_url(), None);
    }

    #[test]
    fn default_role_must_be_allowed() {
        let config = AuthConfig::new("https://auth.example.com".to_string())
            .with_default_role("admin".to_string());
        assert!(matches!(
            config.validate(),
            Err(AuthError::Configuration(_))
        ));
    }

    #[test]
    fn non_positive_ttl_is_rejected() {
        let config =
            AuthConfig::new("https://auth.example.com".to_string()).with_ticket_ttl_seconds(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn webauthn_origins_are_normalized_and_deduplicated() -> Result<(), AuthError> {
        let config = WebauthnConfig::new(
            "example.com".to_string(),
            vec![
                "https://example.com/".to_string(),
                "https://example.com".to_string(),
                "https://example.com:8443/app".to_string(),
            ],
        )?;
        assert_eq!(
            config.allowed_origins(),
            ["https://example.com", "https://example.com:8443"]
        );
        Ok(())
    }

    #[test]
    fn webauthn_requires_rp_id() {
        assert!(WebauthnConfig::new(" ".to_string(), vec!["https://a.com".to_string()]).is_err());
    }
}
