//! Wire DTOs for the ingest endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::LeadIdentifier;

/// The event envelope accepted by `POST /events/ingest`.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub event_type: String,
    pub source: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub lead_identifier: LeadIdentifier,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    pub event_id: Uuid,
}
