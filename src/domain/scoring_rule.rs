//! ScoringRule: admin-configured rule matched against events/leads to
//! award (or penalize) category points. Mutated only outside the core;
//! the core reads an immutable snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::predicate::Conditions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreCategory {
    Demographic,
    Engagement,
    Behavior,
}

impl ScoreCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Demographic => "demographic",
            Self::Engagement => "engagement",
            Self::Behavior => "behavior",
        }
    }
}

impl std::str::FromStr for ScoreCategory {
    type Err = crate::error::LeadflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "demographic" => Ok(Self::Demographic),
            "engagement" => Ok(Self::Engagement),
            "behavior" => Ok(Self::Behavior),
            other => Err(crate::error::LeadflowError::Internal(format!(
                "unknown score category: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Event,
    Field,
}

/// A single scoring rule, as loaded into the read-only startup snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringRule {
    pub id: Uuid,
    pub slug: String,
    pub category: ScoreCategory,
    pub rule_type: RuleType,
    pub conditions: Conditions,
    pub points: i32,
    pub max_per_day: Option<i32>,
    pub max_per_lead: Option<i32>,
    pub decay_days: Option<i32>,
    pub is_active: bool,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

/// Immutable snapshot of all active rules, ordered by (priority asc,
/// created_at asc). Reloaded wholesale and swapped behind a
/// `RwLock<Arc<_>>`.
#[derive(Debug, Clone, Default)]
pub struct ScoringRuleSet {
    pub rules: Vec<ScoringRule>,
}

impl ScoringRuleSet {
    pub fn new(mut rules: Vec<ScoringRule>) -> Self {
        rules.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)));
        Self { rules }
    }

    pub fn active_event_rules(&self) -> impl Iterator<Item = &ScoringRule> {
        self.rules
            .iter()
            .filter(|r| r.is_active && r.rule_type == RuleType::Event)
    }

    pub fn active_field_rules(&self) -> impl Iterator<Item = &ScoringRule> {
        self.rules
            .iter()
            .filter(|r| r.is_active && r.rule_type == RuleType::Field)
    }
}
