//! # Gatehouse (identity ticket and session lifecycle)
//!
//! `gatehouse` issues, validates and rotates the identity artifacts of user
//! accounts held in an external identity store: access tokens, refresh tokens,
//! single-use email tickets and `WebAuthn` challenges.
//!
//! ## Lifecycle
//!
//! Users move between anonymous, unverified, verified and MFA-gated states.
//! Every email-driven flow (verification, password reset, passwordless sign-in,
//! email change) mints a ticket of shape `<purpose>:<uuid>` on the user row and
//! converges on `GET /verify`, which consumes the ticket with a single
//! conditional update and redirects the browser with a fresh refresh token.
//!
//! - **No shared memory:** all state lives in the [`store::IdentityStore`]; each
//!   transition is one conditional write, so concurrent redemptions of the same
//!   ticket observe zero affected rows.
//! - **Redirects:** every `redirectTo` passes the [`redirect::RedirectValidator`]
//!   before any state is touched.
//! - **Email:** dispatch failures are logged and never roll back a mutation.

pub mod api;
pub mod claims;
pub mod cli;
pub mod config;
pub mod email;
pub mod error;
pub mod lifecycle;
pub mod password;
pub mod redirect;
pub mod session;
pub mod store;
pub mod ticket;
pub mod webauthn;

#[cfg(test)]
pub(crate) mod test_support;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
