//! `GET /verify`: every emailed link lands here.

use crate::lifecycle::{Orchestrator, VerifyQuery};
use axum::{
    extract::{Extension, Query, rejection::QueryRejection},
    http::{HeaderValue, StatusCode, header::LOCATION},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{error, instrument};

#[utoipa::path(
    get,
    path = "/verify",
    params(VerifyQuery),
    responses(
        (status = 302, description = "Redirect carrying `refreshToken` and `type` on success, `error` and `errorDescription` otherwise")
    ),
    tag = "verify"
)]
#[instrument(skip_all)]
pub async fn verify(
    orchestrator: Extension<Arc<Orchestrator>>,
    query: Result<Query<VerifyQuery>, QueryRejection>,
) -> Response {
    // A query that fails to parse is treated like an empty one.
    let query = query.map(|Query(query)| query).unwrap_or_default();
    let redirect = orchestrator.verify(query).await;

    match HeaderValue::from_str(&redirect.location) {
        Ok(location) => (StatusCode::FOUND, [(LOCATION, location)]).into_response(),
        Err(err) => {
            error!("Failed to build Location header: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
