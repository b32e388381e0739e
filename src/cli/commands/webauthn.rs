use crate::config::WebauthnConfig;
use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command, builder::BoolishValueParser};

pub const ARG_WEBAUTHN_ENABLED: &str = "webauthn-enabled";
pub const ARG_WEBAUTHN_RP_ID: &str = "webauthn-rp-id";
pub const ARG_WEBAUTHN_RP_NAME: &str = "webauthn-rp-name";
pub const ARG_WEBAUTHN_RP_ORIGINS: &str = "webauthn-rp-origins";
pub const ARG_WEBAUTHN_CHALLENGE_TTL_SECONDS: &str = "webauthn-challenge-ttl-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    /// `None` when passkeys are disabled.
    pub config: Option<WebauthnConfig>,
}

impl Options {
    /// # Errors
    /// Returns an error if passkeys are enabled without a usable RP id or origin.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let enabled = matches
            .get_one::<bool>(ARG_WEBAUTHN_ENABLED)
            .copied()
            .unwrap_or(false);
        if !enabled {
            return Ok(Self { config: None });
        }

        let rp_id = matches
            .get_one::<String>(ARG_WEBAUTHN_RP_ID)
            .cloned()
            .context("missing required argument: --webauthn-rp-id")?;
        let origins = matches
            .get_many::<String>(ARG_WEBAUTHN_RP_ORIGINS)
            .map(|values| values.cloned().collect())
            .unwrap_or_default();

        let mut config = WebauthnConfig::new(rp_id, origins)?;
        if let Some(name) = matches.get_one::<String>(ARG_WEBAUTHN_RP_NAME) {
            config = config.with_rp_name(name.clone());
        }
        if let Some(ttl) = matches
            .get_one::<i64>(ARG_WEBAUTHN_CHALLENGE_TTL_SECONDS)
            .copied()
        {
            config = config.with_challenge_ttl_seconds(ttl);
        }

        Ok(Self {
            config: Some(config),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_WEBAUTHN_ENABLED)
                .long(ARG_WEBAUTHN_ENABLED)
                .help("Enable passkey sign-up and authenticator registration")
                .env("AUTH_WEBAUTHN_ENABLED")
                .default_value("false")
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new(ARG_WEBAUTHN_RP_ID)
                .long(ARG_WEBAUTHN_RP_ID)
                .help("Relying party id, usually the registrable domain")
                .env("AUTH_WEBAUTHN_RP_ID"),
        )
        .arg(
            Arg::new(ARG_WEBAUTHN_RP_NAME)
                .long(ARG_WEBAUTHN_RP_NAME)
                .help("Relying party display name")
                .env("AUTH_WEBAUTHN_RP_NAME"),
        )
        .arg(
            Arg::new(ARG_WEBAUTHN_RP_ORIGINS)
                .long(ARG_WEBAUTHN_RP_ORIGINS)
                .help("Comma separated origins allowed to run ceremonies")
                .env("AUTH_WEBAUTHN_RP_ORIGINS")
                .value_delimiter(','),
        )
        .arg(
            Arg::new(ARG_WEBAUTHN_CHALLENGE_TTL_SECONDS)
                .long(ARG_WEBAUTHN_CHALLENGE_TTL_SECONDS)
                .help("Lifetime of a registration challenge in seconds")
                .env("AUTH_WEBAUTHN_CHALLENGE_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(i64)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(
        vars: [(&'static str, Option<&'static str>); 3],
    ) -> Result<Option<WebauthnConfig>> {
        temp_env::with_vars(vars, || {
            let matches = with_args(Command::new("test")).get_matches_from(["test"]);
            Options::parse(&matches).map(|options| options.config)
        })
    }

    #[test]
    fn disabled_by_default() -> Result<()> {
        let config = parse([
            ("AUTH_WEBAUTHN_ENABLED", None),
            ("AUTH_WEBAUTHN_RP_ID", None),
            ("AUTH_WEBAUTHN_RP_ORIGINS", None),
        ])?;
        assert!(config.is_none());
        Ok(())
    }

    #[test]
    fn enabled_with_origins() -> Result<()> {
        let config = parse([
            ("AUTH_WEBAUTHN_ENABLED", Some("true")),
            ("AUTH_WEBAUTHN_RP_ID", Some("example.com")),
            (
                "AUTH_WEBAUTHN_RP_ORIGINS",
                Some("https://app.example.com,https://admin.example.com"),
            ),
        ])?
        .ok_or_else(|| anyhow::anyhow!("webauthn not configured"))?;
        assert_eq!(config.rp_id(), "example.com");
        assert_eq!(config.allowed_origins().len(), 2);
        assert_eq!(config.challenge_ttl_seconds(), 300);
        Ok(())
    }

    #[test]
    fn enabled_without_rp_id_fails() {
        let result = parse([
            ("AUTH_WEBAUTHN_ENABLED", Some("true")),
            ("AUTH_WEBAUTHN_RP_ID", None),
            ("AUTH_WEBAUTHN_RP_ORIGINS", Some("https://app.example.com")),
        ]);
        assert!(result.is_err());
    }
}
