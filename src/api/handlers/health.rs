//! `/health`: identity store reachability plus build metadata.

use crate::{GIT_COMMIT_HASH, lifecycle::Orchestrator};
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{Duration, timeout};
use tracing::{Instrument, debug, error, info_span};
use utoipa::ToSchema;

const HEALTH_STORE_TIMEOUT_SECONDS: u64 = 2;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    store: String,
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Identity store is reachable", body = Health),
        (status = 503, description = "Identity store is unreachable", body = Health)
    ),
    tag = "health",
)]
/// Report service health. `OPTIONS` gets the same status and headers without a body.
pub async fn health(
    method: Method,
    orchestrator: Extension<Arc<Orchestrator>>,
) -> impl IntoResponse {
    let store_healthy = probe_store(&orchestrator).await;

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: if store_healthy {
            "ok".to_string()
        } else {
            "error".to_string()
        },
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);

            let mut headers = HeaderMap::new();
            headers.insert("X-App", x_app_header_value);
            headers
        })
        .map_err(|err| {
            debug!("Failed to parse X-App header: {}", err);
        })
        .unwrap_or_else(|()| HeaderMap::new());

    if store_healthy {
        (StatusCode::OK, headers, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}

async fn probe_store(orchestrator: &Orchestrator) -> bool {
    let span = info_span!("db.ping", db.operation = "PING");
    match timeout(
        Duration::from_secs(HEALTH_STORE_TIMEOUT_SECONDS),
        orchestrator.store().ping().instrument(span),
    )
    .await
    {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            error!("Identity store ping failed: {}", err);
            false
        }
        Err(_) => {
            error!(
                "Identity store ping timed out after {}s",
                HEALTH_STORE_TIMEOUT_SECONDS
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{harness, test_config};
    use anyhow::Result;

    #[tokio::test]
    async fn healthy_store_returns_ok_with_body() -> Result<()> {
        let h = harness(test_config())?;
        let response = health(Method::GET, Extension(Arc::new(h.orchestrator)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("X-App"));

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let body: serde_json::Value = serde_json::from_slice(&bytes)?;
        assert_eq!(body["name"], env!("CARGO_PKG_NAME"));
        assert_eq!(body["store"], "ok");
        Ok(())
    }

    #[tokio::test]
    async fn offline_store_returns_unavailable() -> Result<()> {
        let h = harness(test_config())?;
        h.store.set_offline(true);
        let response = health(Method::GET, Extension(Arc::new(h.orchestrator)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        Ok(())
    }

    #[tokio::test]
    async fn options_has_no_body() -> Result<()> {
        let h = harness(test_config())?;
        let response = health(Method::OPTIONS, Extension(Arc::new(h.orchestrator)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        assert!(bytes.is_empty());
        Ok(())
    }
}
