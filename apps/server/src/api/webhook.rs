//! Inbound live-event push endpoint.

use std::sync::Arc;

use axum::{body::Bytes, extract::State, http::HeaderMap, routing::post, Json, Router};
use serde_json::{json, Value};
use tracing::{debug, warn};

use lmsbridge_events::InboundHeaders;

use crate::error::{ApiError, ApiResult};
use crate::main_lib::AppState;

fn inbound_headers(headers: &HeaderMap) -> InboundHeaders {
    InboundHeaders::from_pairs(
        headers
            .iter()
            .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?))),
    )
}

/// Answers 200 whatever the verification outcome, which is only logged.
/// A stream store that cannot take the entry yields 503 so the sender
/// redelivers.
async fn receive_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    match state.gateway.ingest(&body, &inbound_headers(&headers)).await {
        Ok(true) => debug!("[Webhook] Accepted {} byte event", body.len()),
        Ok(false) => warn!("[Webhook] Unverified event dead-lettered"),
        Err(e) => {
            return Err(ApiError::ServiceUnavailable(format!(
                "Failed to enqueue event: {}",
                e
            )))
        }
    }
    Ok(Json(json!({ "ok": true })))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/lms/webhook", post(receive_event))
}
