//! Lead aggregate: the prospect being scored, classified, and routed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a lead within the CRM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Contacted,
    Qualified,
    Nurturing,
    Customer,
    Churned,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Contacted => "contacted",
            Self::Qualified => "qualified",
            Self::Nurturing => "nurturing",
            Self::Customer => "customer",
            Self::Churned => "churned",
        }
    }
}

impl std::str::FromStr for LeadStatus {
    type Err = crate::error::LeadflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "contacted" => Ok(Self::Contacted),
            "qualified" => Ok(Self::Qualified),
            "nurturing" => Ok(Self::Nurturing),
            "customer" => Ok(Self::Customer),
            "churned" => Ok(Self::Churned),
            other => Err(crate::error::LeadflowError::Internal(format!(
                "unknown lead status: {other}"
            ))),
        }
    }
}

/// Marketing/sales lifecycle stage, independent of `LeadStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStage {
    Lead,
    Mql,
    Sql,
    Opportunity,
    Customer,
}

impl LifecycleStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Mql => "mql",
            Self::Sql => "sql",
            Self::Opportunity => "opportunity",
            Self::Customer => "customer",
        }
    }
}

impl std::str::FromStr for LifecycleStage {
    type Err = crate::error::LeadflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lead" => Ok(Self::Lead),
            "mql" => Ok(Self::Mql),
            "sql" => Ok(Self::Sql),
            "opportunity" => Ok(Self::Opportunity),
            "customer" => Ok(Self::Customer),
            other => Err(crate::error::LeadflowError::Internal(format!(
                "unknown lifecycle stage: {other}"
            ))),
        }
    }
}

/// Routing state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStatus {
    Unrouted,
    Pending,
    Routed,
    ManualReview,
}

impl RoutingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unrouted => "unrouted",
            Self::Pending => "pending",
            Self::Routed => "routed",
            Self::ManualReview => "manual_review",
        }
    }
}

impl std::str::FromStr for RoutingStatus {
    type Err = crate::error::LeadflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unrouted" => Ok(Self::Unrouted),
            "pending" => Ok(Self::Pending),
            "routed" => Ok(Self::Routed),
            "manual_review" => Ok(Self::ManualReview),
            other => Err(crate::error::LeadflowError::Internal(format!(
                "unknown routing status: {other}"
            ))),
        }
    }
}

/// The product intent axis a lead is classified along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Research,
    B2b,
    CoCreation,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::B2b => "b2b",
            Self::CoCreation => "co_creation",
        }
    }

    /// Deterministic argmax tie-break order: research > b2b > co_creation.
    /// This is intentional product behavior, not arbitrary.
    pub const PRIORITY_ORDER: [Intent; 3] = [Intent::Research, Intent::B2b, Intent::CoCreation];
}

impl std::str::FromStr for Intent {
    type Err = crate::error::LeadflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "research" => Ok(Self::Research),
            "b2b" => Ok(Self::B2b),
            "co_creation" => Ok(Self::CoCreation),
            other => Err(crate::error::LeadflowError::Internal(format!(
                "unknown intent: {other}"
            ))),
        }
    }
}

/// Per-intent running point totals, summed from non-expired `IntentSignal` rows.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IntentSummary {
    pub research: i32,
    pub b2b: i32,
    pub co_creation: i32,
}

impl IntentSummary {
    pub fn get(&self, intent: Intent) -> i32 {
        match intent {
            Intent::Research => self.research,
            Intent::B2b => self.b2b,
            Intent::CoCreation => self.co_creation,
        }
    }

    /// Argmax over the three dimensions, ties broken by `Intent::PRIORITY_ORDER`
    /// (earliest entry wins, matching the `recalc_lead_intent` stored
    /// procedure). Returns `None` when all three dimensions are zero.
    ///
    /// `Iterator::max_by_key` keeps the *last* maximal element on a tie, so
    /// this folds manually rather than calling it directly over
    /// `PRIORITY_ORDER`.
    pub fn argmax(&self) -> Option<Intent> {
        let mut best: Option<(Intent, i32)> = None;
        for intent in Intent::PRIORITY_ORDER {
            let value = self.get(intent);
            match best {
                Some((_, best_value)) if value <= best_value => {}
                _ => best = Some((intent, value)),
            }
        }
        match best {
            Some((intent, value)) if value > 0 => Some(intent),
            _ => None,
        }
    }

    /// The value of the top dimension and the runner-up, used for conflict detection.
    pub fn top_two(&self) -> (i32, i32) {
        let mut values: Vec<i32> = vec![self.research, self.b2b, self.co_creation];
        values.sort_unstable_by(|a, b| b.cmp(a));
        (values[0], values[1])
    }
}

/// Source of first/last touch attribution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attribution {
    pub source: Option<String>,
    pub campaign: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

/// A sales prospect tracked by the system; the central aggregate of the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub email: String,
    pub portal_id: Option<String>,
    pub linkedin_url: Option<String>,
    pub waalaxy_id: Option<String>,
    pub lemlist_id: Option<String>,

    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub job_title: Option<String>,

    pub status: LeadStatus,
    pub lifecycle_stage: LifecycleStage,

    pub demographic_score: i32,
    pub engagement_score: i32,
    pub behavior_score: i32,
    pub total_score: i32,

    pub routing_status: RoutingStatus,
    pub pipeline_id: Option<Uuid>,

    pub primary_intent: Option<Intent>,
    pub intent_confidence: i32,
    pub intent_summary: IntentSummary,

    pub organization_id: Option<Uuid>,

    pub first_touch: Attribution,
    pub last_touch: Attribution,

    pub gdpr_delete_requested: bool,

    pub last_activity: Option<DateTime<Utc>>,
    pub routed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// `total_score = demographic + engagement + behavior`, the invariant
    /// the stored recalc primitive is solely responsible for upholding.
    /// Exposed here only for assertions in tests.
    pub fn scores_consistent(&self) -> bool {
        self.total_score == self.demographic_score + self.engagement_score + self.behavior_score
    }

    /// A lead is in `conflict` when its top two intent dimensions are within
    /// the configured margin and it would otherwise be routable.
    pub fn has_intent_conflict(&self, route_min_intent: i32, conflict_margin: i32) -> bool {
        let (top, second) = self.intent_summary.top_two();
        let confidence = top.min(100);
        let is_routable = confidence >= route_min_intent;
        is_routable && (top - second) < conflict_margin
    }
}

/// The set of external identifiers an inbound event may carry to resolve
/// (or create) a lead. Order of precedence is fixed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeadIdentifier {
    pub email: Option<String>,
    pub portal_id: Option<String>,
    pub waalaxy_id: Option<String>,
    pub linkedin_url: Option<String>,
    pub lemlist_id: Option<String>,
}

impl LeadIdentifier {
    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.portal_id.is_none()
            && self.waalaxy_id.is_none()
            && self.linkedin_url.is_none()
            && self.lemlist_id.is_none()
    }

    pub fn normalized_email(&self) -> Option<String> {
        self.email.as_ref().map(|e| e.trim().to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_breaks_ties_by_priority_order() {
        let summary = IntentSummary {
            research: 50,
            b2b: 50,
            co_creation: 0,
        };
        assert_eq!(summary.argmax(), Some(Intent::Research));

        let summary = IntentSummary {
            research: 0,
            b2b: 30,
            co_creation: 30,
        };
        assert_eq!(summary.argmax(), Some(Intent::B2b));
    }

    #[test]
    fn argmax_picks_strict_max_when_no_tie() {
        let summary = IntentSummary {
            research: 10,
            b2b: 90,
            co_creation: 20,
        };
        assert_eq!(summary.argmax(), Some(Intent::B2b));
    }

    #[test]
    fn argmax_is_none_when_all_zero() {
        assert_eq!(IntentSummary::default().argmax(), None);
    }
}
