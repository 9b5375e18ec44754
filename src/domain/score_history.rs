//! ScoreHistory: append-only ledger of every rule application. The stored
//! recalc primitive derives category totals by summing the non-expired
//! rows here; a periodic external decay job flips `expired`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::scoring_rule::ScoreCategory;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreHistory {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub event_id: Option<Uuid>,
    pub rule_id: Uuid,
    pub category: ScoreCategory,
    pub points_change: i32,
    /// Debugging hint only — never read by the core for `total_score`/
    /// category sums; the recalc primitive always recomputes from scratch.
    pub new_total: i32,
    pub expires_at: Option<DateTime<Utc>>,
    pub expired: bool,
    pub expired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
