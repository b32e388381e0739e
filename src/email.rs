//! Outbound email collaborator.
//!
//! The engine never renders or transports mail itself. It hands an
//! [`EmailMessage`] (template name, recipient, locale and the values a
//! template may interpolate) to an [`EmailDispatcher`]. Dispatch happens after
//! the state change is stored; failures are logged by the caller and never
//! roll anything back.
//!
//! - [`LogEmailDispatcher`] logs the message, for local development.
//! - [`WebhookEmailDispatcher`] POSTs the message as JSON to a mailer service.

use crate::{APP_USER_AGENT, ticket::TicketPurpose};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{Instrument, debug, info, info_span};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailLocals {
    pub link: String,
    pub email: Option<String>,
    pub new_email: Option<String>,
    pub display_name: String,
    pub ticket: String,
    pub redirect_to: String,
    pub locale: String,
    pub server_url: String,
    pub client_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub template: String,
    pub to: String,
    pub locale: String,
    pub locals: EmailLocals,
}

#[async_trait]
pub trait EmailDispatcher: Send + Sync {
    /// Deliver a message or return an error for the caller to log.
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

#[derive(Clone, Debug, Default)]
pub struct LogEmailDispatcher;

#[async_trait]
impl EmailDispatcher for LogEmailDispatcher {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to = %message.to,
            template = %message.template,
            locale = %message.locale,
            link = %message.locals.link,
            "email dispatch stub"
        );
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct WebhookEmailDispatcher {
    client: Client,
    url: Url,
}

impl WebhookEmailDispatcher {
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(url: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build email webhook client")?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl EmailDispatcher for WebhookEmailDispatcher {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let span = info_span!(
            "email.webhook",
            template = %message.template,
            http.url = %self.url
        );
        let response = self
            .client
            .post(self.url.clone())
            .json(message)
            .send()
            .instrument(span)
            .await
            .context("email webhook request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("email webhook returned {status}"));
        }

        debug!(template = %message.template, "email handed to webhook");
        Ok(())
    }
}

/// `<server_url>/verify?ticket=..&type=..&redirectTo=..`
///
/// # Errors
/// Returns error if `server_url` is not a valid base URL.
pub fn build_verify_link(
    server_url: &str,
    ticket: &str,
    purpose: TicketPurpose,
    redirect_to: &str,
) -> Result<String> {
    let mut url = Url::parse(&format!("{}/verify", server_url.trim_end_matches('/')))
        .with_context(|| format!("invalid server URL: {server_url}"))?;
    url.query_pairs_mut()
        .append_pair("ticket", ticket)
        .append_pair("type", purpose.as_str())
        .append_pair("redirectTo", redirect_to);
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_link_encodes_redirect() -> Result<()> {
        let link = build_verify_link(
            "https://auth.example.com/",
            "emailVerify:00000000-0000-4000-8000-000000000000",
            TicketPurpose::EmailVerify,
            "https://app.example.com/welcome?step=1",
        )?;
        let parsed = Url::parse(&link)?;
        assert_eq!(parsed.path(), "/verify");
        let pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (
                    "ticket".to_string(),
                    "emailVerify:00000000-0000-4000-8000-000000000000".to_string()
                ),
                ("type".to_string(), "emailVerify".to_string()),
                (
                    "redirectTo".to_string(),
                    "https://app.example.com/welcome?step=1".to_string()
                ),
            ]
        );
        assert!(link.contains("redirectTo=https%3A%2F%2Fapp.example.com%2Fwelcome%3Fstep%3D1"));
        Ok(())
    }

    #[test]
    fn message_serializes_camel_case_locals() -> Result<()> {
        let message = EmailMessage {
            template: "email-verify".to_string(),
            to: "a@x.com".to_string(),
            locale: "en".to_string(),
            locals: EmailLocals {
                link: "https://auth.example.com/verify".to_string(),
                email: Some("a@x.com".to_string()),
                new_email: None,
                display_name: "a@x.com".to_string(),
                ticket: "t".to_string(),
                redirect_to: "https://app.example.com".to_string(),
                locale: "en".to_string(),
                server_url: "https://auth.example.com".to_string(),
                client_url: None,
            },
        };
        let value = serde_json::to_value(&message)?;
        assert_eq!(value["locals"]["redirectTo"], "https://app.example.com");
        assert_eq!(value["locals"]["displayName"], "a@x.com");
        Ok(())
    }

    #[tokio::test]
    async fn log_dispatcher_always_succeeds() -> Result<()> {
        let message = EmailMessage {
            template: "password-reset".to_string(),
            to: "a@x.com".to_string(),
            locale: "en".to_string(),
            locals: EmailLocals {
                link: String::new(),
                email: None,
                new_email: None,
                display_name: String::new(),
                ticket: String::new(),
                redirect_to: String::new(),
                locale: "en".to_string(),
                server_url: String::new(),
                client_url: None,
            },
        };
        LogEmailDispatcher.send(&message).await
    }
}
