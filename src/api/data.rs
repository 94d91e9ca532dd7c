//! Telemetry webhook called by the LoRaWAN network server.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

use super::error::ApiError;
use crate::ingest;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub message: &'static str,
    pub eui: String,
    pub device_type: String,
    pub received_at: String,
}

/// Shared secret from `Authorization: Bearer` or `X-Webhook-Token`
fn presented_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .or_else(|| headers.get("X-Webhook-Token").and_then(|h| h.to_str().ok()))
        .map(str::trim)
}

/// Constant-time check of the presented token. Open when no token is configured.
fn verify_webhook_token(expected: Option<&str>, headers: &HeaderMap) -> bool {
    let Some(expected) = expected.filter(|t| !t.is_empty()) else {
        return true;
    };
    let Some(provided) = presented_token(headers) else {
        return false;
    };
    let expected = expected.as_bytes();
    let provided = provided.as_bytes();
    expected.len() == provided.len() && bool::from(expected.ct_eq(provided))
}

/// POST /api/data
pub async fn receive_uplink(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IngestResponse>, ApiError> {
    if !verify_webhook_token(state.config.ingest.webhook_token.as_deref(), &headers) {
        warn!("Rejected webhook call with a missing or wrong token");
        return Err(ApiError::unauthorized("Invalid webhook token"));
    }

    let outcome = ingest::ingest(&state.db, &state.classifier, &body).await?;
    Ok(Json(IngestResponse {
        message: "Data saved",
        eui: outcome.eui,
        device_type: outcome.device_type.as_str().to_string(),
        received_at: outcome.received_at,
    }))
}
