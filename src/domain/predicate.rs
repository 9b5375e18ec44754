//! Structured, closed predicate types used by scoring rules and automation
//! triggers: a small tagged-variant predicate type with a pure evaluator,
//! not a dynamic expression interpreter.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single metadata-value comparison. A bare JSON scalar means strict
/// equality; this variant carries the explicit `{lt|lte|gt|gte: number}`
/// comparison-object form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataMatch {
    Scalar(serde_json::Value),
    Comparison(Comparison),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comparison {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lte: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gte: Option<f64>,
}

impl MetadataMatch {
    /// Evaluate this match against an actual metadata value.
    pub fn matches(&self, actual: Option<&serde_json::Value>) -> bool {
        match self {
            MetadataMatch::Scalar(expected) => actual == Some(expected),
            MetadataMatch::Comparison(cmp) => {
                let Some(actual) = actual else { return false };
                let Some(n) = coerce_numeric(actual) else {
                    return false;
                };
                cmp.lt.map_or(true, |v| n < v)
                    && cmp.lte.map_or(true, |v| n <= v)
                    && cmp.gt.map_or(true, |v| n > v)
                    && cmp.gte.map_or(true, |v| n >= v)
            }
        }
    }
}

fn coerce_numeric(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

/// `rule_type = "event"` condition: an event_type match plus an optional
/// per-key metadata predicate map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventCondition {
    pub event_type: String,
    #[serde(default)]
    pub metadata: HashMap<String, MetadataMatch>,
}

impl EventCondition {
    pub fn matches(&self, event_type: &str, metadata: &serde_json::Value) -> bool {
        if event_type != self.event_type {
            return false;
        }
        self.metadata
            .iter()
            .all(|(key, expected)| expected.matches(metadata.get(key)))
    }
}

/// `rule_type = "field"` operator set, evaluated against a lead (and
/// optionally its joined organization).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FieldCondition {
    Equals { field: String, value: serde_json::Value },
    In { field: String, values: Vec<serde_json::Value> },
    Contains { field: String, value: String },
    Pattern { field: String, pattern: String },
    Gte { field: String, value: f64 },
    Lte { field: String, value: f64 },
}

impl FieldCondition {
    pub fn field_name(&self) -> &str {
        match self {
            FieldCondition::Equals { field, .. }
            | FieldCondition::In { field, .. }
            | FieldCondition::Contains { field, .. }
            | FieldCondition::Pattern { field, .. }
            | FieldCondition::Gte { field, .. }
            | FieldCondition::Lte { field, .. } => field,
        }
    }

    /// Evaluate against a flattened view of lead (+organization) fields.
    pub fn matches(&self, fields: &HashMap<String, serde_json::Value>) -> bool {
        let actual = fields.get(self.field_name());
        match self {
            FieldCondition::Equals { value, .. } => actual == Some(value),
            FieldCondition::In { values, .. } => {
                actual.is_some_and(|a| values.iter().any(|v| v == a))
            }
            FieldCondition::Contains { value, .. } => match actual {
                Some(serde_json::Value::String(s)) => {
                    s.to_lowercase().contains(&value.to_lowercase())
                }
                Some(serde_json::Value::Array(arr)) => arr.iter().any(|item| {
                    item.as_str()
                        .is_some_and(|s| s.eq_ignore_ascii_case(value))
                }),
                _ => false,
            },
            FieldCondition::Pattern { pattern, .. } => match actual.and_then(|v| v.as_str()) {
                Some(s) => regex::RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .is_ok_and(|re| re.is_match(s)),
                None => false,
            },
            FieldCondition::Gte { value, .. } => {
                actual.and_then(coerce_numeric).is_some_and(|n| n >= *value)
            }
            FieldCondition::Lte { value, .. } => {
                actual.and_then(coerce_numeric).is_some_and(|n| n <= *value)
            }
        }
    }
}

/// The closed condition type stored on a `ScoringRule` or an `event`-trigger
/// `AutomationRule`. Exactly one of the two variants is populated depending
/// on `rule_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Conditions {
    Event(EventCondition),
    Field { all: Vec<FieldCondition> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn comparison_matches_numeric_coercion() {
        let m = MetadataMatch::Comparison(Comparison {
            lt: None,
            lte: None,
            gt: Some(5.0),
            gte: None,
        });
        assert!(m.matches(Some(&json!("10"))));
        assert!(!m.matches(Some(&json!("3"))));
        assert!(!m.matches(None));
    }

    #[test]
    fn scalar_requires_exact_match() {
        let m = MetadataMatch::Scalar(json!("pricing"));
        assert!(m.matches(Some(&json!("pricing"))));
        assert!(!m.matches(Some(&json!("other"))));
    }

    #[test]
    fn event_condition_requires_all_metadata_keys() {
        let cond = EventCondition {
            event_type: "page_visited".to_string(),
            metadata: HashMap::from([(
                "page".to_string(),
                MetadataMatch::Scalar(json!("pricing")),
            )]),
        };
        assert!(cond.matches("page_visited", &json!({"page": "pricing"})));
        assert!(!cond.matches("page_visited", &json!({"page": "home"})));
        assert!(!cond.matches("other", &json!({"page": "pricing"})));
    }

    #[test]
    fn field_contains_is_case_insensitive() {
        let cond = FieldCondition::Contains {
            field: "email".to_string(),
            value: ".edu".to_string(),
        };
        let mut fields = HashMap::new();
        fields.insert("email".to_string(), json!("person@UNI.EDU"));
        assert!(cond.matches(&fields));
    }

    #[test]
    fn field_pattern_is_case_insensitive_regex() {
        let cond = FieldCondition::Pattern {
            field: "job_title".to_string(),
            pattern: "^vp|director$".to_string(),
        };
        let mut fields = HashMap::new();
        fields.insert("job_title".to_string(), json!("Director"));
        assert!(cond.matches(&fields));
    }
}
