//! Timing template types consumed by the planner.
//!
//! A timing template is an ordered list of rows, each describing one action
//! at a relative day offset. The planner scales the offsets to the target
//! cycle length and turns rows into concrete steps.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::job::{ActionType, RecordType};

/// One row of a timing template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingRow {
    /// Day offset relative to the template's own cycle.
    pub relative_day: f64,
    /// What the row does.
    pub action_type: ActionType,
    /// Record type the row operates on.
    pub record_type: RecordType,
    /// Symbolic id minted by this row's step, if it creates a record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id_template: Option<String>,
    /// Nested target-type -> symbolic id(s) JSON structure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associations_template: Option<Value>,
    /// Label identifying where the row came from (template authoring tool).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_label: Option<String>,
    /// Raw content hints (JSON) used as the generation fallback payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_template: Option<Value>,
    /// Free-text rationale; placeholder tokens are substituted at planning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_template: Option<String>,
}

/// Values substituted into template placeholder tokens at planning time.
///
/// Recognized tokens: `{{theme}}`, `{{industry}}`, `{{frequency}}`,
/// `{{simulation_id}}`, `{{owner_id}}`, `{{sequence}}`, `{{now}}`.
#[derive(Debug, Clone)]
pub struct PlaceholderValues {
    pub theme: String,
    pub industry: String,
    pub frequency: String,
    pub simulation_id: Uuid,
    pub owner_id: Option<String>,
    pub sequence: u32,
    pub now: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_timing_row_deserializes_with_optionals_missing() {
        let row: TimingRow = serde_json::from_value(json!({
            "relative_day": 2.5,
            "action_type": "create",
            "record_type": "contact",
        }))
        .unwrap();
        assert_eq!(row.relative_day, 2.5);
        assert!(row.record_id_template.is_none());
        assert!(row.associations_template.is_none());
    }

    #[test]
    fn test_timing_row_roundtrip() {
        let row = TimingRow {
            relative_day: 5.0,
            action_type: ActionType::Associate,
            record_type: RecordType::Deal,
            record_id_template: Some("deal_1".to_string()),
            associations_template: Some(json!({ "contact": ["contact_1"] })),
            source_label: Some("q3-pipeline".to_string()),
            action_template: None,
            reason_template: Some("link the champion".to_string()),
        };
        let value = serde_json::to_value(&row).unwrap();
        let back: TimingRow = serde_json::from_value(value).unwrap();
        assert_eq!(back.record_id_template.as_deref(), Some("deal_1"));
        assert_eq!(back.action_type, ActionType::Associate);
    }
}
