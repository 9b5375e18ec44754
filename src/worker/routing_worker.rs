//! Routing worker: consumes the `routing` queue, assigns a pipeline by
//! primary intent (falling back to the default pipeline, or to manual
//! review on an intent conflict), and runs the first stage's inline
//! automation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::automation::AutomationEngine;
use crate::domain::{Pipeline, PipelineSet, RoutingStatus};
use crate::error::Result;
use crate::persistence::{JobBroker, Store, QUEUE_SYNC};
use crate::services::Metrics;

use super::JobHandler;

/// Payload enqueued by the event worker's step 10:
/// `{lead_id, trigger: "score_change"}`. `trigger` rides along for
/// observability only; the routing worker re-derives everything it needs
/// from a fresh lead read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingJob {
    pub lead_id: Uuid,
    #[serde(default)]
    pub trigger: Option<String>,
}

pub struct RoutingWorker {
    store: Store,
    broker: JobBroker,
    automation: AutomationEngine,
    pipelines: RwLock<Arc<PipelineSet>>,
    pipeline_by_intent: HashMap<String, String>,
    route_min_intent: i32,
    conflict_margin: i32,
    metrics: Arc<Metrics>,
}

impl RoutingWorker {
    pub fn new(
        store: Store,
        broker: JobBroker,
        automation: AutomationEngine,
        pipelines: PipelineSet,
        pipeline_by_intent: HashMap<String, String>,
        route_min_intent: i32,
        conflict_margin: i32,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            broker,
            automation,
            pipelines: RwLock::new(Arc::new(pipelines)),
            pipeline_by_intent,
            route_min_intent,
            conflict_margin,
            metrics,
        }
    }

    /// Re-loads the pipeline snapshot, mirroring `ScoringEngine::reload`
    /// and `AutomationEngine::reload` — a full replacement with atomic
    /// pointer swap rather than mutation in place.
    pub async fn reload(&self) -> Result<()> {
        let fresh = PipelineSet { pipelines: self.store.load_pipelines().await? };
        *self.pipelines.write().unwrap() = Arc::new(fresh);
        self.automation.reload().await
    }

    fn snapshot(&self) -> Arc<PipelineSet> {
        self.pipelines.read().unwrap().clone()
    }

    #[instrument(skip(self, job), fields(lead_id = %job.lead_id))]
    async fn process(&self, job: RoutingJob) -> Result<()> {
        // Step 1: idempotency. Only an unrouted lead is actionable.
        let lead = match self.store.get_lead(job.lead_id).await? {
            Some(lead) => lead,
            None => return Ok(()),
        };
        if lead.routing_status != RoutingStatus::Unrouted {
            return Ok(());
        }

        // Step 2: intent conflict short-circuits to manual review.
        if lead.has_intent_conflict(self.route_min_intent, self.conflict_margin) {
            self.store.set_routing_status(lead.id, RoutingStatus::ManualReview).await?;
            let dedup_key = format!("routing-conflict-{}", lead.id);
            self.broker
                .enqueue(
                    QUEUE_SYNC,
                    &serde_json::json!({
                        "target": "slack",
                        "kind": "routing_conflict",
                        "lead_id": lead.id,
                    }),
                    Some(dedup_key.as_str()),
                )
                .await?;
            self.metrics.inc_routing_decisions();
            return Ok(());
        }

        // Step 3: pick a pipeline by primary intent, default as fallback.
        let snapshot = self.snapshot();
        let pipeline = self.select_pipeline(&snapshot, &lead);
        let Some(pipeline) = pipeline else {
            warn!(lead_id = %lead.id, "no target pipeline and no default pipeline configured, leaving unrouted");
            return Ok(());
        };
        let Some(first_stage) = pipeline.first_stage() else {
            warn!(lead_id = %lead.id, pipeline_id = %pipeline.id, "pipeline has no stages, leaving unrouted");
            return Ok(());
        };

        // Step 4: transactional deal creation + lead state flip.
        self.store
            .route_lead_into_pipeline(lead.id, pipeline.id, first_stage.id)
            .await?;

        // Step 5: first stage's inline automation, against the now-routed lead.
        let routed_lead = self.store.get_lead(lead.id).await?.unwrap_or(lead);
        self.automation
            .run_stage_automation(&first_stage.automation_config, &routed_lead)
            .await?;

        self.metrics.inc_routing_decisions();
        Ok(())
    }

    /// Table lookup by `primary_intent` against the configured
    /// `pipeline_by_intent` mapping; falls back to the default pipeline
    /// when there's no primary intent, no configured slug for it, or the
    /// target pipeline has no stages to route into.
    fn select_pipeline<'a>(&self, pipelines: &'a PipelineSet, lead: &crate::domain::Lead) -> Option<&'a Pipeline> {
        lead.primary_intent
            .and_then(|intent| self.pipeline_by_intent.get(intent.as_str()))
            .and_then(|slug| pipelines.by_slug(slug))
            .filter(|p| !p.stages.is_empty())
            .or_else(|| pipelines.default_pipeline())
    }
}

#[async_trait::async_trait]
impl JobHandler for RoutingWorker {
    async fn handle(&self, job: &crate::persistence::Job) -> Result<()> {
        let payload: RoutingJob = job.payload_as()?;
        self.process(payload).await
    }

    fn queue_name(&self) -> &'static str {
        crate::persistence::QUEUE_ROUTING
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Intent, LeadStatus, LifecycleStage};

    fn sample_lead(primary_intent: Option<Intent>) -> crate::domain::Lead {
        crate::domain::Lead {
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
            status: LeadStatus::New,
            lifecycle_stage: LifecycleStage::Lead,
            demographic_score: 0,
            engagement_score: 0,
            behavior_score: 0,
            total_score: 0,
            routing_status: RoutingStatus::Unrouted,
            pipeline_id: None,
            primary_intent,
            intent_confidence: 70,
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

    fn sample_pipeline(slug: &str, is_default: bool, with_stage: bool) -> Pipeline {
        Pipeline {
            id: Uuid::new_v4(),
            slug: slug.to_string(),
            is_default,
            stages: if with_stage {
                vec![crate::domain::PipelineStage {
                    id: Uuid::new_v4(),
                    pipeline_id: Uuid::new_v4(),
                    slug: "entry".to_string(),
                    position: 0,
                    stage_type: crate::domain::StageType::Entry,
                    automation_config: vec![],
                }]
            } else {
                vec![]
            },
        }
    }

    fn worker_with(pipelines: Vec<Pipeline>, map: &[(&str, &str)]) -> (PipelineSet, HashMap<String, String>) {
        let pipeline_by_intent = map.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        (PipelineSet { pipelines }, pipeline_by_intent)
    }

    fn select(pipelines: &PipelineSet, map: &HashMap<String, String>, lead: &crate::domain::Lead) -> Option<String> {
        lead.primary_intent
            .and_then(|intent| map.get(intent.as_str()))
            .and_then(|slug| pipelines.by_slug(slug))
            .filter(|p| !p.stages.is_empty())
            .or_else(|| pipelines.default_pipeline())
            .map(|p| p.slug.clone())
    }

    #[test]
    fn select_pipeline_uses_configured_intent_mapping() {
        let (pipelines, map) = worker_with(
            vec![sample_pipeline("research-lab", false, true), sample_pipeline("general", true, true)],
            &[("research", "research-lab")],
        );
        let lead = sample_lead(Some(Intent::Research));
        assert_eq!(select(&pipelines, &map, &lead).as_deref(), Some("research-lab"));
    }

    #[test]
    fn select_pipeline_falls_back_to_default_without_primary_intent() {
        let (pipelines, map) = worker_with(
            vec![sample_pipeline("research-lab", false, true), sample_pipeline("general", true, true)],
            &[("research", "research-lab")],
        );
        let lead = sample_lead(None);
        assert_eq!(select(&pipelines, &map, &lead).as_deref(), Some("general"));
    }

    #[test]
    fn select_pipeline_falls_back_to_default_when_target_has_no_stages() {
        let (pipelines, map) = worker_with(
            vec![sample_pipeline("research-lab", false, false), sample_pipeline("general", true, true)],
            &[("research", "research-lab")],
        );
        let lead = sample_lead(Some(Intent::Research));
        assert_eq!(select(&pipelines, &map, &lead).as_deref(), Some("general"));
    }
}
