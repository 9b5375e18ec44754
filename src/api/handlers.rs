//! Ingest endpoint handler.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{Duration, Utc};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::error::{LeadflowError, Result};
use crate::persistence::QUEUE_EVENTS;
use crate::signing;
use crate::worker::EventJob;

use super::state::AppState;
use super::types::IngestResponse;

const HEADER_API_KEY: &str = "x-api-key";
const HEADER_WEBHOOK_SIGNATURE: &str = "x-webhook-signature";

/// Either scheme may authenticate a request. `X-Webhook-Signature` is
/// checked first when present — it authenticates the exact body, which is
/// strictly stronger than a static key — falling back to `X-API-Key` only
/// when no signature header was sent.
fn authenticate(state: &AppState, source: &str, headers: &HeaderMap, raw_body: &[u8]) -> Result<()> {
    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    if let Some(signature) = header_str(HEADER_WEBHOOK_SIGNATURE) {
        return signing::verify_webhook_signature(source, Some(signature), raw_body, &state.auth.hmac_secrets);
    }
    if let Some(api_key) = header_str(HEADER_API_KEY) {
        return signing::verify_api_key(source, Some(api_key), &state.auth.api_keys);
    }
    Err(LeadflowError::Auth("missing X-API-Key or X-Webhook-Signature header".to_string()))
}

#[instrument(skip(state, headers, raw_body))]
pub async fn ingest_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    raw_body: axum::body::Bytes,
) -> Result<impl IntoResponse> {
    let request: super::types::IngestRequest = serde_json::from_slice(&raw_body)?;

    authenticate(&state, &request.source, &headers, &raw_body)?;

    if request.lead_identifier.is_empty() {
        return Err(LeadflowError::Validation("at least one lead identifier is required".to_string()));
    }
    if request.event_type.trim().is_empty() {
        return Err(LeadflowError::Validation("event_type must be non-empty".to_string()));
    }

    let now = Utc::now();
    let earliest = now - Duration::days(state.ingest.clock_skew_past_days);
    let latest = now + Duration::minutes(state.ingest.clock_skew_future_minutes);
    if request.occurred_at < earliest || request.occurred_at > latest {
        return Err(LeadflowError::Validation(format!(
            "occurred_at {} is outside the allowed clock-skew window",
            request.occurred_at
        )));
    }

    if let Some(correlation_id) = request.correlation_id.as_deref() {
        if let Some(existing) = state.store.find_event_by_correlation(&request.source, correlation_id).await? {
            return Ok((StatusCode::OK, Json(IngestResponse { event_id: existing.id })));
        }
    }

    let event_id = Uuid::new_v4();
    state
        .store
        .insert_preliminary_event(
            event_id,
            None,
            &request.event_type,
            &request.source,
            request.occurred_at,
            &request.metadata,
            request.correlation_id.as_deref(),
        )
        .await?;

    let job = EventJob {
        event_id,
        event_type: request.event_type,
        source: request.source,
        occurred_at: request.occurred_at,
        lead_identifier: request.lead_identifier,
        metadata: request.metadata,
        correlation_id: request.correlation_id,
    };

    if let Err(e) = state.broker.enqueue(QUEUE_EVENTS, &job, None).await {
        warn!(event_id = %event_id, error = %e, "event row written but enqueue failed, row left unprocessed for janitor");
        return Err(e);
    }

    state.metrics.inc_events_ingested();
    Ok((StatusCode::ACCEPTED, Json(IngestResponse { event_id })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn auth_config(api_keys: &[(&str, &str)]) -> crate::config::AuthConfig {
        crate::config::AuthConfig {
            api_keys: api_keys.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            hmac_secrets: HashMap::new(),
        }
    }

    #[test]
    fn authenticate_rejects_when_no_auth_headers_present() {
        let headers = HeaderMap::new();
        let api_keys = auth_config(&[("moco", "secret")]);
        assert!(signing::verify_api_key("moco", headers.get(HEADER_API_KEY).and_then(|v| v.to_str().ok()), &api_keys.api_keys).is_err());
    }

    #[test]
    fn api_key_header_name_is_lowercase_canonical() {
        // axum's HeaderMap lookups are case-insensitive regardless of the
        // literal casing used here; this just pins the constant.
        assert_eq!(HEADER_API_KEY, "x-api-key");
        assert_eq!(HEADER_WEBHOOK_SIGNATURE, "x-webhook-signature");
    }
}
