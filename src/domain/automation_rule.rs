//! AutomationRule and the action vocabulary it can fire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::lead::Intent;
use super::predicate::EventCondition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Event,
    ScoreThreshold,
    IntentDetected,
    StageChange,
    TimeInStage,
}

/// The trigger configuration, shaped per `trigger_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TriggerConfig {
    Event(EventCondition),
    IntentDetected {
        intent: Intent,
        confidence_gte: i32,
    },
    ScoreThreshold {
        #[serde(default)]
        tier: Option<String>,
    },
    StageChange {
        #[serde(default)]
        stage_slug: Option<String>,
    },
    TimeInStage {
        #[serde(default)]
        stage_slug: Option<String>,
        #[serde(default)]
        hours: Option<i64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    SendNotification,
    CreateTask,
    UpdateField,
    RouteToPipeline,
    SyncMoco,
}

/// Fields a `update_field` action is permitted to touch.
pub const UPDATE_FIELD_SAFELIST: &[&str] = &[
    "status",
    "lifecycle_stage",
    "job_title",
    "phone",
    "first_name",
    "last_name",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionConfig {
    SendNotification {
        channel: String,
        template: String,
    },
    CreateTask {
        title: String,
        due_days: i64,
    },
    UpdateField {
        field: String,
        value: serde_json::Value,
    },
    RouteToPipeline {
        pipeline_slug: String,
        #[serde(default)]
        create_deal: bool,
    },
    SyncMoco {
        #[serde(default)]
        payload: serde_json::Value,
    },
}

/// A single static automation rule, read from the admin-configured table
/// into the startup snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: Uuid,
    pub trigger_type: TriggerType,
    pub trigger_config: TriggerConfig,
    pub action_type: ActionType,
    pub action_config: ActionConfig,
    pub priority: i32,
    pub is_active: bool,
    pub execution_count: i64,
    pub last_executed: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct AutomationRuleSet {
    pub rules: Vec<AutomationRule>,
}

impl AutomationRuleSet {
    pub fn new(mut rules: Vec<AutomationRule>) -> Self {
        rules.sort_by_key(|r| r.priority);
        Self { rules }
    }

    pub fn active_for_trigger(&self, trigger: TriggerType) -> impl Iterator<Item = &AutomationRule> {
        self.rules
            .iter()
            .filter(move |r| r.is_active && r.trigger_type == trigger)
    }
}
