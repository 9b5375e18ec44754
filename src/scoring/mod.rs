//! Scoring engine: matches the active rule snapshot against an event +
//! lead (+ organization), writes score-history rows subject to per-rule
//! caps, invokes the stored recalc primitive, and reports any
//! WARM/HOT/VERY_HOT tier crossing for the automation engine to act on.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{Duration, Utc};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::config::ScoringThresholds;
use crate::domain::{Conditions, Lead, MarketingEvent, Organization, ScoringRule, ScoringRuleSet};
use crate::error::Result;
use crate::persistence::Store;
use crate::services::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ScoreTier {
    Cold,
    Warm,
    Hot,
    VeryHot,
}

impl ScoreTier {
    pub fn classify(total: i32, thresholds: &ScoringThresholds) -> Self {
        if total >= thresholds.very_hot {
            Self::VeryHot
        } else if total >= thresholds.hot {
            Self::Hot
        } else if total >= thresholds.warm {
            Self::Warm
        } else {
            Self::Cold
        }
    }
}

/// Result of scoring a single event, handed to the automation engine as
/// the `score_threshold` trigger payload.
#[derive(Debug, Clone)]
pub struct ScoringOutcome {
    pub old_total: i32,
    pub new_total: i32,
    pub crossed_tier: Option<ScoreTier>,
}

/// Live snapshot of active scoring rules, swapped wholesale on reload.
pub struct ScoringEngine {
    store: Store,
    rules: RwLock<Arc<ScoringRuleSet>>,
    thresholds: ScoringThresholds,
    metrics: Arc<Metrics>,
}

impl ScoringEngine {
    pub async fn load(store: Store, thresholds: ScoringThresholds, metrics: Arc<Metrics>) -> Result<Self> {
        let rules = store.load_active_scoring_rules().await?;
        Ok(Self {
            store,
            rules: RwLock::new(Arc::new(ScoringRuleSet::new(rules))),
            thresholds,
            metrics,
        })
    }

    /// Rebuild the snapshot from the database and swap it in atomically —
    /// the `rules reload` path.
    pub async fn reload(&self) -> Result<()> {
        let rules = self.store.load_active_scoring_rules().await?;
        let fresh = Arc::new(ScoringRuleSet::new(rules));
        *self.rules.write().unwrap() = fresh;
        Ok(())
    }

    fn snapshot(&self) -> Arc<ScoringRuleSet> {
        self.rules.read().unwrap().clone()
    }

    /// Apply every matching, non-capped rule for this event, then invoke
    /// the stored recalc primitive.
    #[instrument(skip(self, event, lead, organization), fields(lead_id = %lead.id, event_id = %event.id))]
    pub async fn process_event(
        &self,
        event: &MarketingEvent,
        lead: &Lead,
        organization: Option<&Organization>,
    ) -> Result<ScoringOutcome> {
        let rules = self.snapshot();
        let fields = flatten_fields(lead, organization);
        let old_total = lead.total_score;

        let mut any_applied = false;

        for rule in rules.rules.iter().filter(|r| r.is_active) {
            if !rule_matches(rule, event, &fields) {
                continue;
            }

            if self.is_capped(lead.id, rule).await? {
                continue;
            }

            let expires_at = rule
                .decay_days
                .map(|days| Utc::now() + Duration::days(days as i64));

            self.store
                .insert_score_history(
                    lead.id,
                    Some(event.id),
                    rule.id,
                    rule.category,
                    rule.points,
                    lead.total_score,
                    expires_at,
                )
                .await?;

            // Every matching rule bumps `score_points`; only the first
            // match sets `score_category`.
            self.store
                .set_event_score_category_if_unset(event.id, rule.points, rule.category)
                .await?;
            any_applied = true;
            self.metrics.inc_scoring_applications();
        }

        if any_applied {
            self.store.recalc_lead_scores(lead.id).await?;
        }

        let refreshed = self.store.get_lead(lead.id).await?;
        let new_total = refreshed.map(|l| l.total_score).unwrap_or(old_total);

        let old_tier = ScoreTier::classify(old_total, &self.thresholds);
        let new_tier = ScoreTier::classify(new_total, &self.thresholds);
        let crossed_tier = if new_tier > old_tier { Some(new_tier) } else { None };

        Ok(ScoringOutcome {
            old_total,
            new_total,
            crossed_tier,
        })
    }

    async fn is_capped(&self, lead_id: Uuid, rule: &ScoringRule) -> Result<bool> {
        if let Some(max_per_day) = rule.max_per_day {
            let count = self.store.score_history_count_today(lead_id, rule.id).await?;
            if count >= max_per_day as i64 {
                return Ok(true);
            }
        }
        if let Some(max_per_lead) = rule.max_per_lead {
            let count = self.store.score_history_count_all_time(lead_id, rule.id).await?;
            if count >= max_per_lead as i64 {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn rule_matches(
    rule: &ScoringRule,
    event: &MarketingEvent,
    fields: &HashMap<String, serde_json::Value>,
) -> bool {
    match &rule.conditions {
        Conditions::Event(cond) => cond.matches(&event.event_type, &event.metadata),
        Conditions::Field { all } => {
            if all.is_empty() {
                warn!(rule = %rule.slug, "field rule with empty condition list never matches");
                return false;
            }
            all.iter().all(|c| c.matches(fields))
        }
    }
}

/// Flatten the fields a `field`-type rule may reference.
fn flatten_fields(lead: &Lead, organization: Option<&Organization>) -> HashMap<String, serde_json::Value> {
    let mut fields = HashMap::new();
    fields.insert("email".into(), serde_json::json!(lead.email));
    fields.insert("status".into(), serde_json::json!(lead.status.as_str()));
    fields.insert("lifecycle_stage".into(), serde_json::json!(lead.lifecycle_stage.as_str()));
    if let Some(v) = &lead.first_name {
        fields.insert("first_name".into(), serde_json::json!(v));
    }
    if let Some(v) = &lead.last_name {
        fields.insert("last_name".into(), serde_json::json!(v));
    }
    if let Some(v) = &lead.phone {
        fields.insert("phone".into(), serde_json::json!(v));
    }
    if let Some(v) = &lead.job_title {
        fields.insert("job_title".into(), serde_json::json!(v));
    }
    if let Some(org) = organization {
        if let Some(v) = &org.domain {
            fields.insert("organization_domain".into(), serde_json::json!(v));
        }
        if let Some(v) = &org.industry {
            fields.insert("organization_industry".into(), serde_json::json!(v));
        }
        if let Some(v) = &org.size {
            fields.insert("organization_size".into(), serde_json::json!(v));
        }
        if let Some(v) = &org.country {
            fields.insert("organization_country".into(), serde_json::json!(v));
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_classification_respects_cutoffs() {
        let thresholds = ScoringThresholds {
            warm: 20,
            hot: 50,
            very_hot: 80,
        };
        assert_eq!(ScoreTier::classify(5, &thresholds), ScoreTier::Cold);
        assert_eq!(ScoreTier::classify(20, &thresholds), ScoreTier::Warm);
        assert_eq!(ScoreTier::classify(50, &thresholds), ScoreTier::Hot);
        assert_eq!(ScoreTier::classify(80, &thresholds), ScoreTier::VeryHot);
    }

    #[test]
    fn tier_ordering_detects_crossing() {
        let thresholds = ScoringThresholds {
            warm: 20,
            hot: 50,
            very_hot: 80,
        };
        let old = ScoreTier::classify(10, &thresholds);
        let new = ScoreTier::classify(55, &thresholds);
        assert!(new > old);
    }
}
