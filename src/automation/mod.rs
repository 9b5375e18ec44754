//! Automation engine: shared between the event worker and the routing
//! worker. Loads a snapshot of active AutomationRules and, given a
//! trigger, executes at most one action per matching rule in `priority
//! asc` order. Action failures are logged, non-fatal.

use std::sync::{Arc, RwLock};

use chrono::{Duration, Utc};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::domain::{
    ActionConfig, ActionType, AutomationRule, AutomationRuleSet, Intent, Lead,
    StageAutomationEntry, TriggerConfig, TriggerType, UPDATE_FIELD_SAFELIST,
};
use crate::error::Result;
use crate::persistence::{JobBroker, Store, QUEUE_SYNC};
use crate::scoring::ScoreTier;
use crate::services::Metrics;

/// The event that can fire a `trigger_type = event` rule, or select
/// `score_threshold`/`intent_detected`/`stage_change`/`time_in_stage`
/// rules.
#[derive(Debug, Clone)]
pub enum Trigger<'a> {
    Event { event_type: &'a str, metadata: &'a serde_json::Value },
    ScoreThreshold { tier: ScoreTier },
    IntentDetected { intent: Intent, confidence: i32 },
    StageChange { stage_slug: &'a str },
    TimeInStage { stage_slug: &'a str, hours_in_stage: i64 },
}

impl Trigger<'_> {
    fn trigger_type(&self) -> TriggerType {
        match self {
            Trigger::Event { .. } => TriggerType::Event,
            Trigger::ScoreThreshold { .. } => TriggerType::ScoreThreshold,
            Trigger::IntentDetected { .. } => TriggerType::IntentDetected,
            Trigger::StageChange { .. } => TriggerType::StageChange,
            Trigger::TimeInStage { .. } => TriggerType::TimeInStage,
        }
    }

    fn matches_config(&self, config: &TriggerConfig) -> bool {
        match (self, config) {
            (Trigger::Event { event_type, metadata }, TriggerConfig::Event(cond)) => {
                cond.matches(event_type, metadata)
            }
            (Trigger::IntentDetected { intent, confidence }, TriggerConfig::IntentDetected { intent: want, confidence_gte }) => {
                intent == want && *confidence >= *confidence_gte
            }
            (Trigger::ScoreThreshold { tier }, TriggerConfig::ScoreThreshold { tier: want }) => {
                want.as_deref().map_or(true, |w| w.eq_ignore_ascii_case(tier_label(*tier)))
            }
            (Trigger::StageChange { stage_slug }, TriggerConfig::StageChange { stage_slug: want }) => {
                want.as_deref().map_or(true, |w| w == *stage_slug)
            }
            (
                Trigger::TimeInStage { stage_slug, hours_in_stage },
                TriggerConfig::TimeInStage { stage_slug: want_slug, hours: want_hours },
            ) => {
                want_slug.as_deref().map_or(true, |w| w == *stage_slug)
                    && want_hours.map_or(true, |h| *hours_in_stage >= h)
            }
            _ => false,
        }
    }
}

fn tier_label(tier: ScoreTier) -> &'static str {
    match tier {
        ScoreTier::Cold => "cold",
        ScoreTier::Warm => "warm",
        ScoreTier::Hot => "hot",
        ScoreTier::VeryHot => "very_hot",
    }
}

pub struct AutomationEngine {
    store: Store,
    broker: JobBroker,
    rules: RwLock<Arc<AutomationRuleSet>>,
    metrics: Arc<Metrics>,
}

impl AutomationEngine {
    pub async fn load(store: Store, broker: JobBroker, metrics: Arc<Metrics>) -> Result<Self> {
        let rules = store.load_active_automation_rules().await?;
        Ok(Self {
            store,
            broker,
            rules: RwLock::new(Arc::new(AutomationRuleSet::new(rules))),
            metrics,
        })
    }

    pub async fn reload(&self) -> Result<()> {
        let rules = self.store.load_active_automation_rules().await?;
        *self.rules.write().unwrap() = Arc::new(AutomationRuleSet::new(rules));
        Ok(())
    }

    fn snapshot(&self) -> Arc<AutomationRuleSet> {
        self.rules.read().unwrap().clone()
    }

    /// Evaluate every active rule for `trigger.trigger_type()` in priority
    /// order, firing at most once per rule per invocation.
    #[instrument(skip(self, trigger, lead), fields(lead_id = %lead.id))]
    pub async fn evaluate(&self, trigger: &Trigger<'_>, lead: &Lead) -> Result<usize> {
        let rules = self.snapshot();
        let mut fired = 0;

        for rule in rules.active_for_trigger(trigger.trigger_type()) {
            if !trigger.matches_config(&rule.trigger_config) {
                continue;
            }

            match self.execute_action(rule, lead).await {
                Ok(()) => {
                    if let Err(e) = self.store.record_automation_execution(rule.id).await {
                        warn!(rule_id = %rule.id, error = %e, "failed to record automation execution");
                    }
                    fired += 1;
                    self.metrics.inc_automation_actions();
                }
                Err(e) => {
                    warn!(rule_id = %rule.id, lead_id = %lead.id, error = %e, "automation action failed, continuing");
                }
            }
        }

        Ok(fired)
    }

    /// Run a pipeline stage's inline `automation_config` list unconditionally,
    /// in order. Distinct from [`Self::evaluate`]: these entries carry
    /// their own trigger/action pair and are not filtered against the
    /// admin-configured rule table.
    #[instrument(skip(self, entries, lead), fields(lead_id = %lead.id))]
    pub async fn run_stage_automation(&self, entries: &[StageAutomationEntry], lead: &Lead) -> Result<()> {
        for entry in entries {
            match self.execute_action_config(&entry.action, lead).await {
                Ok(()) => self.metrics.inc_automation_actions(),
                Err(e) => warn!(lead_id = %lead.id, error = %e, "stage automation action failed, continuing"),
            }
        }
        Ok(())
    }

    async fn execute_action(&self, rule: &AutomationRule, lead: &Lead) -> Result<()> {
        match &rule.action_config {
            ActionConfig::SendNotification { channel, template } => {
                self.send_notification(lead, channel, template).await
            }
            ActionConfig::CreateTask { title, due_days } => {
                self.create_task(Some(rule.id), lead, title, *due_days).await
            }
            ActionConfig::UpdateField { field, value } => self.update_field(lead.id, field, value).await,
            ActionConfig::RouteToPipeline { pipeline_slug, create_deal } => {
                self.route_to_pipeline(lead.id, pipeline_slug, *create_deal).await
            }
            ActionConfig::SyncMoco { payload } => self.sync_moco(lead.id, payload).await,
        }
    }

    /// Same action dispatch as [`Self::execute_action`], for an
    /// [`ActionConfig`] not tied to an admin-configured rule row (used by
    /// [`Self::run_stage_automation`]).
    async fn execute_action_config(&self, action_config: &ActionConfig, lead: &Lead) -> Result<()> {
        match action_config {
            ActionConfig::SendNotification { channel, template } => {
                self.send_notification(lead, channel, template).await
            }
            ActionConfig::CreateTask { title, due_days } => self.create_task(None, lead, title, *due_days).await,
            ActionConfig::UpdateField { field, value } => self.update_field(lead.id, field, value).await,
            ActionConfig::RouteToPipeline { pipeline_slug, create_deal } => {
                self.route_to_pipeline(lead.id, pipeline_slug, *create_deal).await
            }
            ActionConfig::SyncMoco { payload } => self.sync_moco(lead.id, payload).await,
        }
    }

    /// `send_notification`: emits a structured message to the `sync`
    /// queue targeting Slack.
    async fn send_notification(&self, lead: &Lead, channel: &str, template: &str) -> Result<()> {
        let text = render_template(template, lead);
        self.broker
            .enqueue(
                QUEUE_SYNC,
                &serde_json::json!({
                    "target": "slack",
                    "channel": channel,
                    "text": text,
                    "lead_id": lead.id,
                }),
                None,
            )
            .await?;
        Ok(())
    }

    async fn create_task(&self, rule_id: Option<Uuid>, lead: &Lead, title: &str, due_days: i64) -> Result<()> {
        let due_date = Utc::now() + Duration::days(due_days);
        self.store
            .create_task(Some(lead.id), None, title, due_date, rule_id)
            .await?;
        Ok(())
    }

    async fn update_field(&self, lead_id: Uuid, field: &str, value: &serde_json::Value) -> Result<()> {
        if !UPDATE_FIELD_SAFELIST.contains(&field) {
            return Err(crate::error::LeadflowError::Validation(format!(
                "field '{field}' is not in the update_field safelist"
            )));
        }
        self.store.update_lead_field(lead_id, field, value).await
    }

    /// `route_to_pipeline`: sets the lead's pipeline by slug and, if
    /// requested, creates a deal in the pipeline's first stage. Used by
    /// inline stage automation; the routing worker's own primary pipeline
    /// assignment goes through `Store` directly since it needs a
    /// transaction spanning the deal insert and lead update.
    async fn route_to_pipeline(&self, lead_id: Uuid, pipeline_slug: &str, create_deal: bool) -> Result<()> {
        let pipelines = self.store.load_pipelines().await?;
        let pipeline = pipelines
            .iter()
            .find(|p| p.slug == pipeline_slug)
            .ok_or_else(|| crate::error::LeadflowError::EngineFailure {
                engine: "automation",
                reason: format!("unknown pipeline slug: {pipeline_slug}"),
            })?;

        if create_deal {
            let stage = pipeline.first_stage().ok_or_else(|| crate::error::LeadflowError::EngineFailure {
                engine: "automation",
                reason: format!("pipeline {pipeline_slug} has no stages"),
            })?;
            self.store.create_deal_if_absent(lead_id, pipeline.id, stage.id).await?;
        }
        Ok(())
    }

    /// `sync_moco`: out of scope; emits the sync job envelope only, no
    /// external call.
    async fn sync_moco(&self, lead_id: Uuid, payload: &serde_json::Value) -> Result<()> {
        self.broker
            .enqueue(
                QUEUE_SYNC,
                &serde_json::json!({"target": "moco", "lead_id": lead_id, "payload": payload}),
                None,
            )
            .await?;
        Ok(())
    }
}

/// Minimal `{lead.*}` placeholder substitution for notification templates.
fn render_template(template: &str, lead: &Lead) -> String {
    template
        .replace("{lead.email}", &lead.email)
        .replace("{lead.id}", &lead.id.to_string())
        .replace("{lead.first_name}", lead.first_name.as_deref().unwrap_or(""))
        .replace("{lead.last_name}", lead.last_name.as_deref().unwrap_or(""))
        .replace("{lead.total_score}", &lead.total_score.to_string())
        .replace(
            "{lead.primary_intent}",
            lead.primary_intent.map(|i| i.as_str()).unwrap_or("none"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_substitutes_known_placeholders() {
        let lead = sample_lead();
        let rendered = render_template("Hot lead {lead.email} scored {lead.total_score}", &lead);
        assert_eq!(rendered, "Hot lead test@example.com scored 77");
    }

    #[test]
    fn score_threshold_trigger_matches_named_tier() {
        let trigger = Trigger::ScoreThreshold { tier: ScoreTier::Hot };
        let config = TriggerConfig::ScoreThreshold { tier: Some("hot".to_string()) };
        assert!(trigger.matches_config(&config));
        let config_mismatch = TriggerConfig::ScoreThreshold { tier: Some("cold".to_string()) };
        assert!(!trigger.matches_config(&config_mismatch));
    }

    fn sample_lead() -> Lead {
        Lead {
            id: Uuid::new_v4(),
            email: "test@example.com".to_string(),
            portal_id: None,
            linkedin_url: None,
            waalaxy_id: None,
            lemlist_id: None,
            first_name: None,
            last_name: None,
            phone: None,
            job_title: None,
            status: crate::domain::LeadStatus::New,
            lifecycle_stage: crate::domain::LifecycleStage::Lead,
            demographic_score: 0,
            engagement_score: 0,
            behavior_score: 77,
            total_score: 77,
            routing_status: crate::domain::RoutingStatus::Unrouted,
            pipeline_id: None,
            primary_intent: None,
            intent_confidence: 0,
            intent_summary: Default::default(),
            organization_id: None,
            first_touch: Default::default(),
            last_touch: Default::default(),
            gdpr_delete_requested: false,
            last_activity: None,
            routed_at: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }
}
