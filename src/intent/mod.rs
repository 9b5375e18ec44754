//! Intent detector: a fixed table of intent rules, distinct from the
//! admin-configured scoring rules — no DB-backed snapshot, no reload path.
//! Classifies events into one of three product-intent dimensions and
//! recomputes the lead's cumulative intent summary via the stored recalc
//! primitive.

use tracing::instrument;
use uuid::Uuid;

use std::sync::Arc;

use crate::domain::{Intent, Lead, MarketingEvent};
use crate::error::Result;
use crate::persistence::Store;
use crate::services::Metrics;

/// One entry of the fixed intent-rule table. Does not read user-defined
/// scoring rules.
struct IntentRule {
    rule_id: &'static str,
    event_type: &'static str,
    metadata_key: Option<&'static str>,
    metadata_match: Option<fn(Option<&serde_json::Value>) -> bool>,
    intent: Intent,
    confidence_points: i32,
}

/// Covers the canonical event vocabulary (`sample_report_downloaded`,
/// `roi_calculator_submitted`, `page_visited`, ...) plus the three shipped
/// pipelines (research, b2b, co-creation), each needing at least one
/// dedicated signal.
fn rules() -> &'static [IntentRule] {
    static RULES: &[IntentRule] = &[
        IntentRule {
            rule_id: "sample_report_download",
            event_type: "sample_report_downloaded",
            metadata_key: None,
            metadata_match: None,
            intent: Intent::Research,
            confidence_points: 25,
        },
        IntentRule {
            rule_id: "whitepaper_download",
            event_type: "whitepaper_downloaded",
            metadata_key: None,
            metadata_match: None,
            intent: Intent::Research,
            confidence_points: 15,
        },
        IntentRule {
            rule_id: "webinar_registration",
            event_type: "webinar_registered",
            metadata_key: None,
            metadata_match: None,
            intent: Intent::Research,
            confidence_points: 10,
        },
        IntentRule {
            rule_id: "roi_calculator_submitted",
            event_type: "roi_calculator_submitted",
            metadata_key: None,
            metadata_match: None,
            intent: Intent::B2b,
            confidence_points: 30,
        },
        IntentRule {
            rule_id: "demo_requested",
            event_type: "demo_requested",
            metadata_key: None,
            metadata_match: None,
            intent: Intent::B2b,
            confidence_points: 40,
        },
        IntentRule {
            rule_id: "pricing_page_visit",
            event_type: "page_visited",
            metadata_key: Some("page"),
            metadata_match: Some(|v| matches!(v.and_then(|v| v.as_str()), Some("pricing"))),
            intent: Intent::B2b,
            confidence_points: 10,
        },
        IntentRule {
            rule_id: "panel_signup",
            event_type: "panel_signup_submitted",
            metadata_key: None,
            metadata_match: None,
            intent: Intent::CoCreation,
            confidence_points: 30,
        },
        IntentRule {
            rule_id: "co_creation_workshop_rsvp",
            event_type: "workshop_rsvp_submitted",
            metadata_key: None,
            metadata_match: None,
            intent: Intent::CoCreation,
            confidence_points: 20,
        },
    ];
    RULES
}

impl IntentRule {
    fn matches(&self, event: &MarketingEvent) -> bool {
        if event.event_type != self.event_type {
            return false;
        }
        match (self.metadata_key, self.metadata_match) {
            (Some(key), Some(predicate)) => predicate(event.metadata.get(key)),
            _ => true,
        }
    }
}

/// Summary of what the intent detector did for a single event, so the
/// automation engine can be invoked with the `intent_detected` trigger if
/// this push changed the lead's `primary_intent`.
#[derive(Debug, Clone)]
pub struct IntentOutcome {
    pub primary_intent: Option<Intent>,
    pub intent_confidence: i32,
    pub is_routable: bool,
    pub conflict: bool,
}

pub struct IntentDetector {
    store: Store,
    route_min_intent: i32,
    conflict_margin: i32,
    metrics: Arc<Metrics>,
}

impl IntentDetector {
    pub fn new(store: Store, route_min_intent: i32, conflict_margin: i32, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            route_min_intent,
            conflict_margin,
            metrics,
        }
    }

    #[instrument(skip(self, event, lead), fields(lead_id = %lead.id, event_id = %event.id))]
    pub async fn process_event(&self, event: &MarketingEvent, lead: &Lead) -> Result<IntentOutcome> {
        let matches: Vec<&IntentRule> = rules().iter().filter(|r| r.matches(event)).collect();

        for rule in &matches {
            self.insert_signal(lead.id, event.id, rule).await?;
            self.metrics.inc_intent_detections();
        }

        if !matches.is_empty() {
            self.store.recalc_lead_intent(lead.id).await?;
        }

        let refreshed = self.store.get_lead(lead.id).await?.unwrap_or_else(|| lead.clone());
        let is_routable = refreshed.intent_confidence >= self.route_min_intent;
        let conflict = refreshed.has_intent_conflict(self.route_min_intent, self.conflict_margin);

        Ok(IntentOutcome {
            primary_intent: refreshed.primary_intent,
            intent_confidence: refreshed.intent_confidence,
            is_routable,
            conflict,
        })
    }

    async fn insert_signal(&self, lead_id: Uuid, event_id: Uuid, rule: &IntentRule) -> Result<Uuid> {
        self.store
            .insert_intent_signal(lead_id, rule.intent, rule.rule_id, rule.confidence_points, "event", Some(event_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(event_type: &str, metadata: serde_json::Value) -> MarketingEvent {
        MarketingEvent {
            id: Uuid::new_v4(),
            lead_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            event_category: None,
            source: "test".to_string(),
            occurred_at: chrono::Utc::now(),
            metadata,
            campaign_id: None,
            utm_source: None,
            utm_medium: None,
            utm_campaign: None,
            utm_content: None,
            utm_term: None,
            correlation_id: None,
            score_points: 0,
            score_category: None,
            processed_at: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn pricing_page_visit_requires_matching_metadata() {
        let matching = event("page_visited", json!({"page": "pricing"}));
        let other = event("page_visited", json!({"page": "home"}));
        let pricing_rule = rules().iter().find(|r| r.rule_id == "pricing_page_visit").unwrap();
        assert!(pricing_rule.matches(&matching));
        assert!(!pricing_rule.matches(&other));
    }

    #[test]
    fn demo_requested_matches_regardless_of_metadata() {
        let e = event("demo_requested", json!({}));
        let rule = rules().iter().find(|r| r.rule_id == "demo_requested").unwrap();
        assert!(rule.matches(&e));
        assert_eq!(rule.intent, Intent::B2b);
    }

    #[test]
    fn each_intent_dimension_has_at_least_one_rule() {
        let has = |intent: Intent| rules().iter().any(|r| r.intent == intent);
        assert!(has(Intent::Research));
        assert!(has(Intent::B2b));
        assert!(has(Intent::CoCreation));
    }
}
