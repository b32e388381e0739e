use crate::{claims::DEFAULT_CLAIMS_NAMESPACE, config::AuthConfig};
use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_JWT_CLAIMS_NAMESPACE: &str = "jwt-claims-namespace";
pub const ARG_ACCESS_TOKEN_EXPIRES_IN: &str = "access-token-expires-in";
pub const ARG_REFRESH_TOKEN_EXPIRES_IN: &str = "refresh-token-expires-in";

#[derive(Debug)]
pub struct Options {
    pub jwt_secret: SecretString,
    pub claims_namespace: String,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_minutes: i64,
}

impl Options {
    /// # Errors
    /// Returns an error if the signing secret is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let jwt_secret = matches
            .get_one::<String>(ARG_JWT_SECRET)
            .cloned()
            .map(SecretString::from)
            .context("missing required argument: --jwt-secret")?;

        Ok(Self {
            jwt_secret,
            claims_namespace: matches
                .get_one::<String>(ARG_JWT_CLAIMS_NAMESPACE)
                .cloned()
                .unwrap_or_else(|| DEFAULT_CLAIMS_NAMESPACE.to_string()),
            access_token_ttl_seconds: matches
                .get_one::<i64>(ARG_ACCESS_TOKEN_EXPIRES_IN)
                .copied()
                .unwrap_or(900),
            refresh_token_ttl_minutes: matches
                .get_one::<i64>(ARG_REFRESH_TOKEN_EXPIRES_IN)
                .copied()
                .unwrap_or(43_200),
        })
    }

    /// Copy the token lifetimes into `config`.
    #[must_use]
    pub fn apply(&self, config: AuthConfig) -> AuthConfig {
        config
            .with_access_token_ttl_seconds(self.access_token_ttl_seconds)
            .with_refresh_token_ttl_seconds(self.refresh_token_ttl_minutes.saturating_mul(60))
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("HS256 secret for access tokens, at least 32 bytes")
                .env("AUTH_JWT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_JWT_CLAIMS_NAMESPACE)
                .long(ARG_JWT_CLAIMS_NAMESPACE)
                .help("Claim under which roles and the user id are published")
                .env("AUTH_JWT_CLAIMS_NAMESPACE")
                .default_value(DEFAULT_CLAIMS_NAMESPACE),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_EXPIRES_IN)
                .long(ARG_ACCESS_TOKEN_EXPIRES_IN)
                .help("Access token lifetime in seconds")
                .env("AUTH_ACCESS_TOKEN_EXPIRES_IN")
                .default_value("900")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_EXPIRES_IN)
                .long(ARG_REFRESH_TOKEN_EXPIRES_IN)
                .help("Refresh token lifetime in minutes")
                .env("AUTH_REFRESH_TOKEN_EXPIRES_IN")
                .default_value("43200")
                .value_parser(clap::value_parser!(i64)),
        )
}
