//! IntentSignal: append-only evidence that a lead's behavior matched one
//! of the fixed intent-detection rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::lead::Intent;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentSignal {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub intent: Intent,
    pub rule_id: String,
    pub confidence_points: i32,
    pub trigger_type: String,
    pub event_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
    pub expired: bool,
    pub detected_at: DateTime<Utc>,
}
