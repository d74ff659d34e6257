//! Inbound webhook endpoint: persist first, dispatch later.
//!
//! The receiver does no payload interpretation. It stores the raw delivery
//! (headers as a versioned blob, body as text) and acknowledges; decoding
//! is the dispatcher's job. Enqueue already wakes a waiting dispatcher, so
//! acceptance latency does not depend on the poll timer.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use pont_store::{HeaderBlob, IntakeStore};
use serde_json::json;

/// Shared state behind every registered webhook path.
pub struct WebhookReceiverState {
    store: Arc<dyn IntakeStore>,
}

impl WebhookReceiverState {
    pub fn new(store: Arc<dyn IntakeStore>) -> Self {
        Self { store }
    }
}

/// Builds the router with one POST endpoint per registered path.
pub fn build_webhook_router(state: Arc<WebhookReceiverState>, paths: &[String]) -> Router {
    let mut router = Router::new();
    for path in paths {
        router = router.route(path, post(handle_webhook_delivery));
    }
    router.with_state(state)
}

async fn handle_webhook_delivery(
    State(state): State<Arc<WebhookReceiverState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if body.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "empty request body"})),
        )
            .into_response();
    }

    let blob = match header_blob_from_http(&headers) {
        Ok(blob) => blob,
        Err(response) => return response,
    };
    let encoded = match blob.encode() {
        Ok(encoded) => encoded,
        Err(error) => {
            tracing::error!(error = %error, "failed to encode webhook headers");
            return internal_error();
        }
    };
    let body = match String::from_utf8(body.to_vec()) {
        Ok(body) => body,
        Err(error) => {
            tracing::error!(error = %error, "webhook body is not valid utf-8");
            return internal_error();
        }
    };

    match state.store.enqueue(uri.path(), &encoded, &body).await {
        Ok(envelope_id) => (
            StatusCode::ACCEPTED,
            Json(json!({"status": "accepted", "envelope_id": envelope_id})),
        )
            .into_response(),
        Err(error) => {
            tracing::error!(path = uri.path(), error = %error, "failed to persist webhook delivery");
            internal_error()
        }
    }
}

fn header_blob_from_http(headers: &HeaderMap) -> Result<HeaderBlob, Response> {
    let mut pairs = Vec::with_capacity(headers.len());
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            tracing::error!(header = name.as_str(), "webhook header is not valid utf-8");
            return Err(internal_error());
        };
        pairs.push((name.as_str().to_string(), value.to_string()));
    }
    Ok(HeaderBlob::from_pairs(pairs))
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal error"})),
    )
        .into_response()
}
