use crate::api::handlers::{health, signin, signup, token, user, verify, webauthn};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Reuse the same router wiring and only return the generated OpenAPI document.
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Add new endpoints here via `.routes(routes!(...))` so they are both served
/// and included in the generated `OpenAPI` document.
/// Routes added outside (like `OPTIONS /health`) are not documented.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(signup::sign_up_email_password))
        .routes(routes!(signin::sign_in_email_password))
        .routes(routes!(signin::sign_in_anonymous))
        .routes(routes!(signin::sign_in_passwordless_email))
        .routes(routes!(token::refresh))
        .routes(routes!(token::sign_out))
        .routes(routes!(user::request_password_reset))
        .routes(routes!(user::change_password))
        .routes(routes!(user::request_email_change))
        .routes(routes!(user::send_verification_email))
        .routes(routes!(user::deanonymize))
        .routes(routes!(webauthn::sign_up_webauthn))
        .routes(routes!(webauthn::sign_up_webauthn_verify))
        .routes(routes!(webauthn::add_authenticator))
        .routes(routes!(webauthn::add_authenticator_verify))
        .routes(routes!(verify::verify));

    router.get_openapi_mut().tags = Some(vec![
        tag("health", "Service health"),
        tag("signup", "Account creation"),
        tag("signin", "Password, anonymous and passwordless sign-in"),
        tag("token", "Refresh tokens and sign-out"),
        tag("user", "Account maintenance"),
        tag("webauthn", "Passkey registration"),
        tag("verify", "Email ticket redemption"),
    ]);

    router
}

fn tag(name: &str, description: &str) -> Tag {
    let mut tag = Tag::new(name);
    tag.description = Some(description.to_string());
    tag
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `:` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(':').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match author.split_once('<') {
        Some((name, email)) => {
            let name = name.trim();
            let email = email.trim_end_matches('>').trim();
            (
                (!name.is_empty()).then_some(name),
                (!email.is_empty()).then_some(email),
            )
        }
        None => {
            let name = author.trim();
            ((!name.is_empty()).then_some(name), None)
        }
    }
}
