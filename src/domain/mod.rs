pub mod automation_rule;
pub mod deal;
pub mod event;
pub mod intent_signal;
pub mod lead;
pub mod organization;
pub mod pipeline;
pub mod predicate;
pub mod score_history;
pub mod scoring_rule;
pub mod task;

pub use automation_rule::{
    ActionConfig, ActionType, AutomationRule, AutomationRuleSet, TriggerConfig, TriggerType,
    UPDATE_FIELD_SAFELIST,
};
pub use deal::{Deal, DealStatus};
pub use event::{MarketingEvent, PromotedFields};
pub use intent_signal::IntentSignal;
pub use lead::{Attribution, Intent, IntentSummary, Lead, LeadIdentifier, LeadStatus, LifecycleStage, RoutingStatus};
pub use organization::Organization;
pub use pipeline::{Pipeline, PipelineSet, PipelineStage, StageAutomationEntry, StageType};
pub use predicate::{Comparison, Conditions, EventCondition, FieldCondition, MetadataMatch};
pub use score_history::ScoreHistory;
pub use scoring_rule::{RuleType, ScoreCategory, ScoringRule, ScoringRuleSet};
pub use task::{Task, TaskStatus};
