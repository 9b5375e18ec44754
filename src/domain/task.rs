//! Task: a follow-up item created by an automation action.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub lead_id: Option<Uuid>,
    pub deal_id: Option<Uuid>,
    pub title: String,
    pub due_date: DateTime<Utc>,
    pub status: TaskStatus,
    pub automation_rule_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
