//! Event worker: the consumer of the `events` queue. Orchestrates
//! identity resolution, event persistence, attribution, scoring, intent
//! detection, automation, and the conditional routing enqueue — ten
//! steps, strictly ordered, each best-effort past step 6.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::automation::{AutomationEngine, Trigger};
use crate::domain::{Attribution, LeadIdentifier, PromotedFields};
use crate::error::Result;
use crate::intent::IntentDetector;
use crate::persistence::{JobBroker, Store, QUEUE_ROUTING};
use crate::scoring::ScoringEngine;
use crate::services::Metrics;
use std::sync::Arc;

use super::JobHandler;

/// The envelope the ingest endpoint enqueues onto `events`:
/// `{event_id, event_type, source, lead_identifier, metadata,
/// occurred_at}`. `correlation_id` rides along so the worker never has
/// to re-read the preliminary row just to recover it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventJob {
    pub event_id: Uuid,
    pub event_type: String,
    pub source: String,
    pub occurred_at: DateTime<Utc>,
    pub lead_identifier: LeadIdentifier,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

/// Profile fields coalesced onto the lead from event metadata. Kept
/// separate from [`PromotedFields`] because these land on `leads`, not
/// `events`.
struct ProfileFields {
    first_name: Option<String>,
    last_name: Option<String>,
    phone: Option<String>,
    job_title: Option<String>,
}

impl ProfileFields {
    fn extract(metadata: &Value) -> Self {
        let get = |k: &str| metadata.get(k).and_then(|v| v.as_str()).map(str::to_string);
        Self {
            first_name: get("first_name"),
            last_name: get("last_name"),
            phone: get("phone"),
            job_title: get("job_title"),
        }
    }
}

/// Keys promoted into dedicated columns on either `events` or `leads`;
/// anything else left in `metadata` is opaque payload.
const PROMOTED_KEYS: &[&str] = &[
    "campaign_id",
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_content",
    "utm_term",
    "event_category",
    "company_name",
    "company_domain",
    "first_name",
    "last_name",
    "phone",
    "job_title",
];

fn strip_promoted_keys(metadata: &Value) -> Value {
    match metadata.as_object() {
        Some(obj) => {
            let mut remaining = Map::new();
            for (k, v) in obj {
                if !PROMOTED_KEYS.contains(&k.as_str()) {
                    remaining.insert(k.clone(), v.clone());
                }
            }
            Value::Object(remaining)
        }
        None => metadata.clone(),
    }
}

pub struct EventWorker {
    store: Store,
    broker: JobBroker,
    scoring: ScoringEngine,
    intent: IntentDetector,
    automation: AutomationEngine,
    route_min_score: i32,
    route_min_intent: i32,
    metrics: Arc<Metrics>,
}

impl EventWorker {
    pub fn new(
        store: Store,
        broker: JobBroker,
        scoring: ScoringEngine,
        intent: IntentDetector,
        automation: AutomationEngine,
        route_min_score: i32,
        route_min_intent: i32,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            broker,
            scoring,
            intent,
            automation,
            route_min_score,
            route_min_intent,
            metrics,
        }
    }

    /// Reloads the scoring and automation rule snapshots wholesale on
    /// command. The intent rule table is fixed in code, so there is
    /// nothing to reload for it.
    pub async fn reload(&self) -> Result<()> {
        self.scoring.reload().await?;
        self.automation.reload().await?;
        Ok(())
    }

    #[instrument(skip(self, job), fields(event_id = %job.event_id))]
    async fn process(&self, job: EventJob) -> Result<()> {
        // Step 1: identity resolution.
        let lead = match self.store.find_lead_by_identifier(&job.lead_identifier).await? {
            Some(lead) => {
                let profile = ProfileFields::extract(&job.metadata);
                self.store
                    .coalesce_lead_fields(
                        lead.id,
                        &job.lead_identifier,
                        profile.first_name.as_deref(),
                        profile.last_name.as_deref(),
                        profile.phone.as_deref(),
                        profile.job_title.as_deref(),
                    )
                    .await?;
                lead
            }
            None => {
                let promoted = PromotedFields::extract(&job.metadata);
                let first_touch = Attribution {
                    source: Some(job.source.clone()),
                    campaign: promoted.utm_campaign.clone(),
                    date: Some(job.occurred_at),
                };
                self.store.create_lead(&job.lead_identifier, &first_touch).await?
            }
        };

        // Step 2: organization linkage.
        let promoted = PromotedFields::extract(&job.metadata);
        if lead.organization_id.is_none() {
            if promoted.company_name.is_some() || promoted.company_domain.is_some() {
                let name = promoted
                    .company_name
                    .clone()
                    .or_else(|| promoted.company_domain.clone())
                    .unwrap_or_else(|| "unknown".to_string());
                let org = self
                    .store
                    .find_or_create_organization(&name, promoted.company_domain.as_deref())
                    .await?;
                self.store.set_lead_organization_if_absent(lead.id, org.id).await?;
            }
        }

        // Step 3: event persistence — promote fields onto the already
        // pre-written row, stripping them from the remaining metadata blob.
        let remaining_metadata = strip_promoted_keys(&job.metadata);
        self.store
            .promote_event_fields(job.event_id, lead.id, &promoted, &remaining_metadata)
            .await?;

        // Step 4: attribution.
        let last_touch = Attribution {
            source: Some(job.source.clone()),
            campaign: promoted.utm_campaign.clone(),
            date: Some(job.occurred_at),
        };
        self.store.update_attribution(lead.id, &last_touch).await?;

        // Step 5: touch activity.
        self.store.touch_last_activity(lead.id).await?;

        // Step 6: mark processed. Everything from here is best-effort.
        self.store.mark_event_processed(job.event_id).await?;

        // Step 7: scoring, against a freshly-read event + lead + org.
        if let Err(e) = self.run_scoring(job.event_id, lead.id).await {
            warn!(lead_id = %lead.id, error = %e, "scoring engine failed, continuing");
        }

        // Step 8: intent detection, against a freshly-read lead.
        if let Err(e) = self.run_intent(job.event_id, lead.id).await {
            warn!(lead_id = %lead.id, error = %e, "intent detector failed, continuing");
        }

        // Step 9: automation, trigger type `event`.
        if let Err(e) = self.run_event_automation(&job, lead.id).await {
            warn!(lead_id = %lead.id, error = %e, "automation engine failed, continuing");
        }

        // Step 10: routing enqueue decision, against a final fresh read.
        if let Err(e) = self.maybe_enqueue_routing(lead.id).await {
            warn!(lead_id = %lead.id, error = %e, "routing enqueue decision failed, continuing");
        }

        self.metrics.inc_events_processed();
        Ok(())
    }

    async fn run_scoring(&self, event_id: Uuid, lead_id: Uuid) -> Result<()> {
        let event = self.store.get_event(event_id).await?.ok_or_else(|| {
            crate::error::LeadflowError::Internal(format!("event {event_id} vanished after promotion"))
        })?;
        let lead = self.store.get_lead(lead_id).await?.ok_or_else(|| {
            crate::error::LeadflowError::Internal(format!("lead {lead_id} vanished mid-job"))
        })?;
        let organization = match lead.organization_id {
            Some(org_id) => self.store.get_organization(org_id).await?,
            None => None,
        };

        let outcome = self.scoring.process_event(&event, &lead, organization.as_ref()).await?;
        if let Some(tier) = outcome.crossed_tier {
            let fresh_lead = self.store.get_lead(lead_id).await?.unwrap_or(lead);
            let trigger = Trigger::ScoreThreshold { tier };
            if let Err(e) = self.automation.evaluate(&trigger, &fresh_lead).await {
                warn!(lead_id = %lead_id, error = %e, "score-threshold automation failed, continuing");
            }
        }
        Ok(())
    }

    async fn run_intent(&self, event_id: Uuid, lead_id: Uuid) -> Result<()> {
        let event = self.store.get_event(event_id).await?.ok_or_else(|| {
            crate::error::LeadflowError::Internal(format!("event {event_id} vanished after promotion"))
        })?;
        let lead = self.store.get_lead(lead_id).await?.ok_or_else(|| {
            crate::error::LeadflowError::Internal(format!("lead {lead_id} vanished mid-job"))
        })?;

        let outcome = self.intent.process_event(&event, &lead).await?;
        if let Some(intent) = outcome.primary_intent {
            if outcome.is_routable {
                let fresh_lead = self.store.get_lead(lead_id).await?.unwrap_or(lead);
                let trigger = Trigger::IntentDetected {
                    intent,
                    confidence: outcome.intent_confidence,
                };
                if let Err(e) = self.automation.evaluate(&trigger, &fresh_lead).await {
                    warn!(lead_id = %lead_id, error = %e, "intent-detected automation failed, continuing");
                }
            }
        }
        Ok(())
    }

    async fn run_event_automation(&self, job: &EventJob, lead_id: Uuid) -> Result<()> {
        let lead = self.store.get_lead(lead_id).await?.ok_or_else(|| {
            crate::error::LeadflowError::Internal(format!("lead {lead_id} vanished mid-job"))
        })?;
        let trigger = Trigger::Event {
            event_type: &job.event_type,
            metadata: &job.metadata,
        };
        self.automation.evaluate(&trigger, &lead).await?;
        Ok(())
    }

    /// Step 10: enqueue a routing job iff the lead is unrouted and both
    /// thresholds are currently met.
    async fn maybe_enqueue_routing(&self, lead_id: Uuid) -> Result<()> {
        let lead = self.store.get_lead(lead_id).await?.ok_or_else(|| {
            crate::error::LeadflowError::Internal(format!("lead {lead_id} vanished mid-job"))
        })?;

        if lead.routing_status != crate::domain::RoutingStatus::Unrouted {
            return Ok(());
        }
        if lead.total_score < self.route_min_score || lead.intent_confidence < self.route_min_intent {
            return Ok(());
        }

        let dedup_key = format!("routing-{}-{}", lead_id, Utc::now().timestamp_millis());
        self.broker
            .enqueue(
                QUEUE_ROUTING,
                &serde_json::json!({"lead_id": lead_id, "trigger": "score_change"}),
                Some(dedup_key.as_str()),
            )
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl JobHandler for EventWorker {
    async fn handle(&self, job: &crate::persistence::Job) -> Result<()> {
        let payload: EventJob = job.payload_as()?;
        self.process(payload).await
    }

    fn queue_name(&self) -> &'static str {
        crate::persistence::QUEUE_EVENTS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_promoted_keys_drops_known_fields_only() {
        let metadata = serde_json::json!({
            "campaign_id": "spring-26",
            "utm_source": "newsletter",
            "page": "pricing",
        });
        let remaining = strip_promoted_keys(&metadata);
        assert_eq!(remaining, serde_json::json!({"page": "pricing"}));
    }

    #[test]
    fn strip_promoted_keys_passes_through_non_object_metadata() {
        let metadata = serde_json::json!(null);
        assert_eq!(strip_promoted_keys(&metadata), serde_json::json!(null));
    }

    #[test]
    fn profile_fields_extract_reads_known_keys_only() {
        let metadata = serde_json::json!({"first_name": "Ada", "unrelated": 1});
        let profile = ProfileFields::extract(&metadata);
        assert_eq!(profile.first_name.as_deref(), Some("Ada"));
        assert!(profile.last_name.is_none());
    }
}
