//! HTTP surface.
//!
//! Routes are registered once in [`openapi`] through `utoipa-axum`, so the
//! served router and the published document cannot drift apart. The shared
//! [`Orchestrator`] reaches handlers as an `Extension<Arc<_>>`.

use crate::lifecycle::Orchestrator;
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::options,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;

pub mod handlers;
mod openapi;

pub use openapi::openapi;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// The complete application: routes plus request-id, tracing and CORS layers.
///
/// # Errors
/// Returns an error if the configured client URL cannot be turned into an origin.
pub fn app(orchestrator: Arc<Orchestrator>) -> Result<Router> {
    let allow_origin = match orchestrator.config().client_url() {
        Some(client_url) => AllowOrigin::exact(client_origin(client_url)?),
        None => AllowOrigin::from(Any),
    };
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(allow_origin);

    let (router, _openapi) = router().split_for_parts();
    let app = router
        .route("/health", options(handlers::health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static(REQUEST_ID_HEADER),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    REQUEST_ID_HEADER,
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(orchestrator)),
        );

    Ok(app)
}

/// Serve until Ctrl-C.
///
/// # Errors
/// Returns an error if the listener cannot bind or the server fails.
pub async fn new(port: u16, orchestrator: Arc<Orchestrator>) -> Result<()> {
    let app = app(orchestrator)?;

    let listener = TcpListener::bind(format!("::0:{port}"))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Gracefully shutdown");
            }
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn client_origin(client_url: &str) -> Result<HeaderValue> {
    let parsed =
        Url::parse(client_url).with_context(|| format!("Invalid client URL: {client_url}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Client URL must include a valid host: {client_url}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build client origin header")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{harness, test_config};
    use axum::http::{StatusCode, header::LOCATION};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    async fn json_body(response: axum::response::Response) -> Result<Value> {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn post(path: &str, body: &Value) -> Result<Request<Body>> {
        Ok(Request::post(path)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(body)?))?)
    }

    #[test]
    fn client_origin_drops_path() -> Result<()> {
        assert_eq!(
            client_origin("https://app.example.com:8443/welcome")?,
            "https://app.example.com:8443"
        );
        assert!(client_origin("not a url").is_err());
        Ok(())
    }

    #[tokio::test]
    async fn request_id_is_generated_and_echoed() -> Result<()> {
        let h = harness(test_config())?;
        let app = app(Arc::new(h.orchestrator))?;

        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let generated = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        assert_eq!(generated.len(), 26);

        let response = app
            .oneshot(
                Request::get("/health")
                    .header(REQUEST_ID_HEADER, "req-1")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER),
            Some(&HeaderValue::from_static("req-1"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn options_health_is_served() -> Result<()> {
        let h = harness(test_config())?;
        let response = app(Arc::new(h.orchestrator))?
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/health")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn missing_payload_is_rejected() -> Result<()> {
        let h = harness(test_config())?;
        let response = app(Arc::new(h.orchestrator))?
            .oneshot(Request::post("/signin/email-password").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await?["error"], "invalid-request");
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_sign_up_is_a_conflict() -> Result<()> {
        let h = harness(test_config())?;
        let app = app(Arc::new(h.orchestrator))?;
        let body = json!({"email": "a@x.com", "password": "correct horse"});

        let response = app
            .clone()
            .oneshot(post("/signup/email-password", &body)?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await?["session"], Value::Null);

        let response = app.oneshot(post("/signup/email-password", &body)?).await?;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = json_body(response).await?;
        assert_eq!(body["error"], "email-already-in-use");
        assert_eq!(body["status"], 409);
        Ok(())
    }

    #[tokio::test]
    async fn user_routes_require_a_bearer_token() -> Result<()> {
        let h = harness(test_config())?;
        let app = app(Arc::new(h.orchestrator))?;

        let response = app
            .clone()
            .oneshot(post("/user/password", &json!({"newPassword": "long enough pw"}))?)
            .await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await?["error"], "unauthenticated-user");

        let request = Request::post("/user/webauthn/add")
            .header(AUTHORIZATION, "Bearer not-a-jwt")
            .body(Body::empty())?;
        let response = app.oneshot(request).await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn anonymous_session_can_change_password() -> Result<()> {
        let h = harness(test_config().with_anonymous_users_enabled(true))?;
        let app = app(Arc::new(h.orchestrator))?;

        let response = app
            .clone()
            .oneshot(Request::post("/signin/anonymous").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await?;
        let access_token = body["session"]["accessToken"]
            .as_str()
            .ok_or_else(|| anyhow!("no access token"))?
            .to_string();

        let request = Request::post("/user/password")
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {access_token}"))
            .body(Body::from(r#"{"newPassword":"correct horse"}"#))?;
        let response = app.oneshot(request).await?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn verify_always_redirects() -> Result<()> {
        let h = harness(test_config())?;
        let response = app(Arc::new(h.orchestrator))?
            .oneshot(
                Request::get("/verify?ticket=emailVerify:nope&type=emailVerify")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        assert!(location.starts_with("https://app.example.com"));
        assert!(location.contains("error=invalid-ticket"));
        Ok(())
    }
}
