use crate::config::AuthConfig;
use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command, builder::BoolishValueParser};
use std::time::Duration;
use url::Url;

pub const ARG_SERVER_URL: &str = "server-url";
pub const ARG_CLIENT_URL: &str = "client-url";
pub const ARG_ALLOWED_REDIRECT_URLS: &str = "allowed-redirect-urls";
pub const ARG_DISABLE_NEW_USERS: &str = "disable-new-users";
pub const ARG_EMAIL_VERIFICATION_REQUIRED: &str = "email-verification-required";
pub const ARG_PASSWORDLESS_ENABLED: &str = "passwordless-enabled";
pub const ARG_ANONYMOUS_USERS_ENABLED: &str = "anonymous-users-enabled";
pub const ARG_DEFAULT_ROLE: &str = "default-role";
pub const ARG_DEFAULT_ALLOWED_ROLES: &str = "default-allowed-roles";
pub const ARG_DEFAULT_LOCALE: &str = "default-locale";
pub const ARG_PASSWORD_MIN_LENGTH: &str = "password-min-length";
pub const ARG_TICKET_TTL_SECONDS: &str = "ticket-ttl-seconds";
pub const ARG_MFA_TICKET_TTL_SECONDS: &str = "mfa-ticket-ttl-seconds";
pub const ARG_STORE_TIMEOUT_SECONDS: &str = "store-timeout-seconds";
pub const ARG_EMAIL_WEBHOOK_URL: &str = "email-webhook-url";
pub const ARG_EMAIL_TIMEOUT_SECONDS: &str = "email-timeout-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub config: AuthConfig,
    /// Deliver emails by POSTing them here; log them when unset.
    pub email_webhook_url: Option<Url>,
}

impl Options {
    /// # Errors
    /// Returns an error if the server URL is missing or the webhook URL does not parse.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let server_url = matches
            .get_one::<String>(ARG_SERVER_URL)
            .cloned()
            .context("missing required argument: --server-url")?;

        let config = AuthConfig::new(server_url)
            .with_client_url(
                matches
                    .get_one::<String>(ARG_CLIENT_URL)
                    .filter(|url| !url.trim().is_empty())
                    .cloned(),
            )
            .with_allowed_redirect_urls(strings(matches, ARG_ALLOWED_REDIRECT_URLS))
            .with_disable_new_users(flag(matches, ARG_DISABLE_NEW_USERS))
            .with_email_verification_required(flag(matches, ARG_EMAIL_VERIFICATION_REQUIRED))
            .with_passwordless_enabled(flag(matches, ARG_PASSWORDLESS_ENABLED))
            .with_anonymous_users_enabled(flag(matches, ARG_ANONYMOUS_USERS_ENABLED))
            .with_default_role(
                matches
                    .get_one::<String>(ARG_DEFAULT_ROLE)
                    .cloned()
                    .context("missing required argument: --default-role")?,
            )
            .with_default_allowed_roles(strings(matches, ARG_DEFAULT_ALLOWED_ROLES))
            .with_default_locale(
                matches
                    .get_one::<String>(ARG_DEFAULT_LOCALE)
                    .map(|locale| locale.to_lowercase())
                    .context("missing required argument: --default-locale")?,
            )
            .with_password_min_length(
                matches
                    .get_one::<usize>(ARG_PASSWORD_MIN_LENGTH)
                    .copied()
                    .unwrap_or(9),
            )
            .with_ticket_ttl_seconds(
                matches
                    .get_one::<i64>(ARG_TICKET_TTL_SECONDS)
                    .copied()
                    .unwrap_or(3600),
            )
            .with_mfa_ticket_ttl_seconds(
                matches
                    .get_one::<i64>(ARG_MFA_TICKET_TTL_SECONDS)
                    .copied()
                    .unwrap_or(300),
            )
            .with_store_timeout(Duration::from_secs(
                matches
                    .get_one::<u64>(ARG_STORE_TIMEOUT_SECONDS)
                    .copied()
                    .unwrap_or(5),
            ))
            .with_email_timeout(Duration::from_secs(
                matches
                    .get_one::<u64>(ARG_EMAIL_TIMEOUT_SECONDS)
                    .copied()
                    .unwrap_or(10),
            ));

        let email_webhook_url = matches
            .get_one::<String>(ARG_EMAIL_WEBHOOK_URL)
            .filter(|url| !url.trim().is_empty())
            .map(|url| Url::parse(url).with_context(|| format!("Invalid email webhook URL: {url}")))
            .transpose()?;

        Ok(Self {
            config,
            email_webhook_url,
        })
    }
}

fn flag(matches: &ArgMatches, id: &str) -> bool {
    matches.get_one::<bool>(id).copied().unwrap_or(false)
}

fn strings(matches: &ArgMatches, id: &str) -> Vec<String> {
    matches
        .get_many::<String>(id)
        .map(|values| {
            values
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_url_args(command);
    let command = with_signup_args(command);
    let command = with_ttl_args(command);
    with_delivery_args(command)
}

fn with_url_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SERVER_URL)
                .long(ARG_SERVER_URL)
                .help("Public URL of this service, used in emailed links")
                .env("AUTH_SERVER_URL")
                .default_value("http://localhost:4000"),
        )
        .arg(
            Arg::new(ARG_CLIENT_URL)
                .long(ARG_CLIENT_URL)
                .help("Frontend URL; default redirect target and allowed redirect prefix")
                .env("AUTH_CLIENT_URL"),
        )
        .arg(
            Arg::new(ARG_ALLOWED_REDIRECT_URLS)
                .long(ARG_ALLOWED_REDIRECT_URLS)
                .help("Comma separated redirect patterns, e.g. https://*.example.com/**")
                .env("AUTH_ACCESS_CONTROL_ALLOWED_REDIRECT_URLS")
                .value_delimiter(','),
        )
}

fn with_signup_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DISABLE_NEW_USERS)
                .long(ARG_DISABLE_NEW_USERS)
                .help("Create new users disabled")
                .env("AUTH_DISABLE_NEW_USERS")
                .default_value("false")
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new(ARG_EMAIL_VERIFICATION_REQUIRED)
                .long(ARG_EMAIL_VERIFICATION_REQUIRED)
                .help("Require a verified email before sign-in")
                .env("AUTH_EMAIL_SIGNIN_EMAIL_VERIFIED_REQUIRED")
                .default_value("true")
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new(ARG_PASSWORDLESS_ENABLED)
                .long(ARG_PASSWORDLESS_ENABLED)
                .help("Enable passwordless sign-in by email link")
                .env("AUTH_EMAIL_PASSWORDLESS_ENABLED")
                .default_value("false")
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new(ARG_ANONYMOUS_USERS_ENABLED)
                .long(ARG_ANONYMOUS_USERS_ENABLED)
                .help("Enable anonymous sign-in")
                .env("AUTH_ANONYMOUS_USERS_ENABLED")
                .default_value("false")
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new(ARG_DEFAULT_ROLE)
                .long(ARG_DEFAULT_ROLE)
                .help("Role given to new users")
                .env("AUTH_USER_DEFAULT_ROLE")
                .default_value("user"),
        )
        .arg(
            Arg::new(ARG_DEFAULT_ALLOWED_ROLES)
                .long(ARG_DEFAULT_ALLOWED_ROLES)
                .help("Comma separated roles new users may hold")
                .env("AUTH_USER_DEFAULT_ALLOWED_ROLES")
                .value_delimiter(',')
                .default_value("user,me"),
        )
        .arg(
            Arg::new(ARG_DEFAULT_LOCALE)
                .long(ARG_DEFAULT_LOCALE)
                .help("Two-letter locale used when a request has none")
                .env("AUTH_LOCALE_DEFAULT")
                .default_value("en"),
        )
        .arg(
            Arg::new(ARG_PASSWORD_MIN_LENGTH)
                .long(ARG_PASSWORD_MIN_LENGTH)
                .help("Minimum password length")
                .env("AUTH_PASSWORD_MIN_LENGTH")
                .default_value("9")
                .value_parser(clap::value_parser!(usize)),
        )
}

fn with_ttl_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TICKET_TTL_SECONDS)
                .long(ARG_TICKET_TTL_SECONDS)
                .help("Lifetime of emailed tickets in seconds")
                .env("AUTH_TICKET_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_MFA_TICKET_TTL_SECONDS)
                .long(ARG_MFA_TICKET_TTL_SECONDS)
                .help("Lifetime of MFA tickets in seconds")
                .env("AUTH_MFA_TICKET_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_STORE_TIMEOUT_SECONDS)
                .long(ARG_STORE_TIMEOUT_SECONDS)
                .help("Upper bound for a single identity store call")
                .env("AUTH_STORE_TIMEOUT_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_delivery_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_EMAIL_WEBHOOK_URL)
                .long(ARG_EMAIL_WEBHOOK_URL)
                .help("POST outgoing emails as JSON to this URL instead of logging them")
                .env("AUTH_EMAIL_WEBHOOK_URL"),
        )
        .arg(
            Arg::new(ARG_EMAIL_TIMEOUT_SECONDS)
                .long(ARG_EMAIL_TIMEOUT_SECONDS)
                .help("Upper bound for a single email delivery")
                .env("AUTH_EMAIL_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64)),
        )
}
