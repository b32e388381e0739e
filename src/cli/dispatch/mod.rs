//! Command-line argument dispatch.
//!
//! Maps validated CLI matches onto an action carrying a complete, validated
//! [`crate::config::AuthConfig`].

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{ARG_DSN, ARG_PORT, auth, token, webauthn};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if arguments are missing or the resulting configuration is invalid.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(4000);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .filter(|dsn| !dsn.trim().is_empty())
        .cloned();

    let auth_opts = auth::Options::parse(matches)?;
    let webauthn_opts = webauthn::Options::parse(matches)?;
    let token_opts = token::Options::parse(matches)?;

    let config = token_opts.apply(auth_opts.config.with_webauthn(webauthn_opts.config));
    config.validate().context("Invalid configuration")?;

    Ok(Action::Server(Args {
        port,
        dsn,
        config,
        jwt_secret: token_opts.jwt_secret,
        claims_namespace: token_opts.claims_namespace,
        email_webhook_url: auth_opts.email_webhook_url,
    }))
}
