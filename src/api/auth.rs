//! `x-api-key` gate for the `/api/v1` routes.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use super::{failure, AppState};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Compare in constant time with respect to the provided key's content.
fn keys_match(expected: &[u8], provided: &[u8]) -> bool {
    if expected.len() != provided.len() {
        return false;
    }
    expected
        .iter()
        .zip(provided)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Rejects requests without the configured key. With no key configured every
/// request passes.
pub async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(request).await;
    };
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .map(|v| v.as_bytes())
        .unwrap_or_default();
    if !keys_match(expected.as_bytes(), provided) {
        metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
        debug!("rejected {} {}: bad or missing API key", request.method(), request.uri().path());
        return failure(StatusCode::UNAUTHORIZED, "Unauthorized: invalid or missing API key");
    }
    next.run(request).await
}
