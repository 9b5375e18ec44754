//! MarketingEvent: the immutable record of a single behavioral/demographic
//! signal about a lead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fields promoted out of `metadata` into dedicated columns at persistence
/// time. Anything left in `metadata` after this extraction is opaque,
/// producer-defined payload.
#[derive(Debug, Clone, Default)]
pub struct PromotedFields {
    pub campaign_id: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_content: Option<String>,
    pub utm_term: Option<String>,
    pub event_category: Option<String>,
    pub company_name: Option<String>,
    pub company_domain: Option<String>,
}

impl PromotedFields {
    pub fn extract(metadata: &serde_json::Value) -> Self {
        let get = |k: &str| -> Option<String> {
            metadata
                .get(k)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        };
        Self {
            campaign_id: get("campaign_id"),
            utm_source: get("utm_source"),
            utm_medium: get("utm_medium"),
            utm_campaign: get("utm_campaign"),
            utm_content: get("utm_content"),
            utm_term: get("utm_term"),
            event_category: get("event_category"),
            company_name: get("company_name"),
            company_domain: get("company_domain"),
        }
    }
}

/// A persisted, immutable behavioral/demographic event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketingEvent {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub event_type: String,
    pub event_category: Option<String>,
    pub source: String,
    pub occurred_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
    pub campaign_id: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_content: Option<String>,
    pub utm_term: Option<String>,
    pub correlation_id: Option<String>,
    pub score_points: i32,
    pub score_category: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
