use crate::{
    api,
    claims::JwtClaimsSigner,
    cli::telemetry,
    config::AuthConfig,
    email::{EmailDispatcher, LogEmailDispatcher, WebhookEmailDispatcher},
    lifecycle::Orchestrator,
    password::Argon2PasswordHasher,
    store::{IdentityStore, MemoryIdentityStore, PgIdentityStore, TimeoutStore},
    webauthn::WebauthnRsVerifier,
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub config: AuthConfig,
    pub jwt_secret: SecretString,
    pub claims_namespace: String,
    pub email_webhook_url: Option<Url>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the store is unreachable, a component rejects its
/// configuration, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let orchestrator = build_orchestrator(&args).await?;
    let result = api::new(args.port, Arc::new(orchestrator)).await;

    telemetry::shutdown_tracer();
    result
}

async fn build_orchestrator(args: &Args) -> Result<Orchestrator> {
    let config = args.config.clone();

    let store: Arc<dyn IdentityStore> = if let Some(dsn) = &args.dsn {
        let store = PgIdentityStore::connect(dsn).await?;
        Arc::new(TimeoutStore::new(store, config.store_timeout()))
    } else {
        warn!("No DSN configured, users are kept in memory and lost on restart");
        Arc::new(TimeoutStore::new(
            MemoryIdentityStore::new(),
            config.store_timeout(),
        ))
    };

    let signer = JwtClaimsSigner::new(&args.jwt_secret, args.claims_namespace.clone())
        .context("Invalid JWT configuration")?;

    let email: Arc<dyn EmailDispatcher> = match &args.email_webhook_url {
        Some(url) => Arc::new(WebhookEmailDispatcher::new(
            url.clone(),
            config.email_timeout(),
        )?),
        None => Arc::new(LogEmailDispatcher),
    };

    let webauthn = config.webauthn().cloned();
    let orchestrator = Orchestrator::new(
        config,
        store,
        Arc::new(signer),
        email,
        Arc::new(Argon2PasswordHasher),
    );

    match webauthn {
        Some(webauthn) => {
            let verifier =
                WebauthnRsVerifier::new(&webauthn).context("Invalid WebAuthn configuration")?;
            Ok(orchestrator
                .with_credential_verifier(Arc::new(verifier), webauthn.challenge_ttl_seconds()))
        }
        None => Ok(orchestrator),
    }
}

fn log_startup_args(args: &Args) {
    let config = &args.config;
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        (
            "dsn",
            args.dsn
                .as_deref()
                .map_or_else(|| "memory".to_string(), redact_dsn),
        ),
        ("server_url", config.server_url().to_string()),
        (
            "client_url",
            config.client_url().unwrap_or("none").to_string(),
        ),
        (
            "allowed_redirect_urls",
            config.allowed_redirect_urls().join(","),
        ),
        (
            "email_verification_required",
            config.email_verification_required().to_string(),
        ),
        ("passwordless", config.passwordless_enabled().to_string()),
        ("anonymous_users", config.anonymous_users_enabled().to_string()),
        (
            "webauthn_rp_id",
            config
                .webauthn()
                .map_or_else(|| "disabled".to_string(), |w| w.rp_id().to_string()),
        ),
        (
            "email",
            args.email_webhook_url
                .as_ref()
                .map_or_else(|| "log".to_string(), |url| format!("webhook {url}")),
        ),
    ];
    log_entries("Startup configuration", &entries);
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} - {}\n\n{title}:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dsn_password_is_redacted() {
        assert_eq!(
            redact_dsn("postgres://auth:hunter2@db:5432/auth"),
            "postgres://auth:REDACTED@db:5432/auth"
        );
        assert_eq!(redact_dsn("::"), "invalid-dsn");
    }

    #[test]
    fn short_commit_truncates() {
        assert_eq!(short_commit("0123456789abcdef"), "0123456");
        assert_eq!(short_commit("abc"), "abc");
    }

    #[tokio::test]
    async fn memory_store_without_dsn() -> Result<()> {
        let args = Args {
            port: 0,
            dsn: None,
            config: AuthConfig::new("https://auth.example.com".to_string()),
            jwt_secret: SecretString::from("0123456789abcdef0123456789abcdef".to_string()),
            claims_namespace: crate::claims::DEFAULT_CLAIMS_NAMESPACE.to_string(),
            email_webhook_url: None,
        };
        let orchestrator = build_orchestrator(&args).await?;
        orchestrator.store().ping().await?;
        Ok(())
    }

    #[tokio::test]
    async fn short_secret_is_rejected() {
        let args = Args {
            port: 0,
            dsn: None,
            config: AuthConfig::new("https://auth.example.com".to_string()),
            jwt_secret: SecretString::from("short".to_string()),
            claims_namespace: crate::claims::DEFAULT_CLAIMS_NAMESPACE.to_string(),
            email_webhook_url: None,
        };
        assert!(build_orchestrator(&args).await.is_err());
    }
}
