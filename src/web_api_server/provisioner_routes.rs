use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use serde_json::json;
use std::sync::Arc;

use crate::error::Error;
use crate::provisioner::{self, WebhookEvent, DELIVERY_HEADER, SIGNATURE_HEADER};

use super::{fail, public, request_id, respond, ApiError, ApiResult, AppState};

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/webhook", post(webhook))
}

/// Subscription-lifecycle webhook. The signature covers the raw body, so
/// the body is taken as bytes and parsed after verification.
async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let rid = request_id(&headers);
    let ctx = public(&state, &headers, "provisioner").map_err(fail(&rid))?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::new(Error::AuthenticationRequired, &rid))?;
    if !provisioner::verify_signature(&body, signature) {
        return Err(ApiError::new(Error::AuthenticationRequired, &rid));
    }
    let delivery_id = headers
        .get(DELIVERY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::new(Error::validation("delivery", "missing delivery id"), &rid))?;

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::new(Error::validation("body", &e.to_string()), &rid))?;

    provisioner::handle_event(&state.db, &state.fabric, delivery_id, event)
        .await
        .map_err(fail(&rid))?;
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "accepted": true }),
    ))
}
