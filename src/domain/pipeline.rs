//! Pipeline / PipelineStage: static configuration describing the ordered
//! stages a routed lead's deal moves through, and the per-stage
//! automation that fires on entry.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::automation_rule::{ActionConfig, TriggerType};

/// One `{trigger, action}` pair in a stage's `automation_config` list.
/// Distinct from the admin-configured `AutomationRule` table: this is
/// inline stage configuration, evaluated unconditionally in order when a
/// deal enters the stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageAutomationEntry {
    pub trigger: TriggerType,
    pub action: ActionConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    Entry,
    Qualification,
    Negotiation,
    Closing,
    Won,
    Lost,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStage {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub slug: String,
    pub position: i32,
    pub stage_type: StageType,
    pub automation_config: Vec<StageAutomationEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Uuid,
    pub slug: String,
    pub is_default: bool,
    pub stages: Vec<PipelineStage>,
}

impl Pipeline {
    pub fn first_stage(&self) -> Option<&PipelineStage> {
        self.stages.iter().min_by_key(|s| s.position)
    }
}

/// Static configuration read once at worker startup.
#[derive(Debug, Clone, Default)]
pub struct PipelineSet {
    pub pipelines: Vec<Pipeline>,
}

impl PipelineSet {
    pub fn by_slug(&self, slug: &str) -> Option<&Pipeline> {
        self.pipelines.iter().find(|p| p.slug == slug)
    }

    pub fn default_pipeline(&self) -> Option<&Pipeline> {
        self.pipelines.iter().find(|p| p.is_default)
    }
}
