//! Per-record-type validation and bounded auto-repair.
//!
//! Generated payloads are untyped JSON until they pass `validate`, which
//! returns the typed content variant. `repair` fixes the known-common
//! omissions (missing lifecycle stage, malformed email/domain shapes,
//! stringly-typed amounts, stale pipeline stages) in one pass on a copy;
//! the generator re-validates exactly once after repair.

use serde_json::Value;

use simcrm_types::content::GeneratedContent;
use simcrm_types::crm::Pipeline;
use simcrm_types::error::ValidationError;
use simcrm_types::job::RecordType;

/// Lifecycle stage filled in when a generated contact omits one.
const DEFAULT_LIFECYCLE_STAGE: &str = "lead";

/// Validate an untyped payload as content for `record_type`.
pub fn validate(
    record_type: RecordType,
    payload: &Value,
    pipelines: &[Pipeline],
) -> Result<GeneratedContent, ValidationError> {
    let map = payload.as_object().ok_or_else(|| ValidationError::InvalidField {
        field: "$".to_string(),
        message: "expected a JSON object".to_string(),
    })?;

    for field in required_fields(record_type) {
        let missing = match map.get(*field) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        };
        if missing {
            return Err(ValidationError::MissingField {
                field: (*field).to_string(),
            });
        }
    }

    match record_type {
        RecordType::Contact => {
            let email = str_field(map, "email");
            if !is_email_like(&email) {
                return Err(ValidationError::InvalidField {
                    field: "email".to_string(),
                    message: format!("'{email}' is not an email address"),
                });
            }
        }
        RecordType::Company => {
            let domain = str_field(map, "domain");
            if !is_domain_like(&domain) {
                return Err(ValidationError::InvalidField {
                    field: "domain".to_string(),
                    message: format!("'{domain}' is not a bare domain"),
                });
            }
        }
        RecordType::Deal => {
            let amount = map.get("amount").and_then(Value::as_f64);
            match amount {
                Some(a) if a >= 0.0 => {}
                _ => {
                    return Err(ValidationError::InvalidField {
                        field: "amount".to_string(),
                        message: "must be a non-negative number".to_string(),
                    });
                }
            }
            validate_stage(map, pipelines)?;
        }
        RecordType::Note | RecordType::Task => {}
    }

    // Tag and deserialize into the typed variant
    let mut tagged = map.clone();
    tagged.insert(
        "record_type".to_string(),
        Value::String(record_type.as_str().to_string()),
    );
    serde_json::from_value(Value::Object(tagged)).map_err(|e| ValidationError::InvalidField {
        field: "$".to_string(),
        message: e.to_string(),
    })
}

/// One bounded repair pass for known-common defects, on a copy.
pub fn repair(record_type: RecordType, payload: &Value, pipelines: &[Pipeline]) -> Value {
    let mut payload = payload.clone();
    let Value::Object(ref mut map) = payload else {
        return payload;
    };

    match record_type {
        RecordType::Contact => {
            let stage_missing = matches!(map.get("lifecycle_stage"), None | Some(Value::Null));
            if stage_missing {
                map.insert(
                    "lifecycle_stage".to_string(),
                    Value::String(DEFAULT_LIFECYCLE_STAGE.to_string()),
                );
            }
            if let Some(Value::String(email)) = map.get("email") {
                let coerced = coerce_email(email);
                map.insert("email".to_string(), Value::String(coerced));
            }
        }
        RecordType::Company => {
            if let Some(Value::String(domain)) = map.get("domain") {
                let coerced = coerce_domain(domain);
                map.insert("domain".to_string(), Value::String(coerced));
            }
        }
        RecordType::Deal => {
            // Stringly-typed amounts show up constantly in generated output
            if let Some(Value::String(raw)) = map.get("amount") {
                if let Ok(amount) = raw.trim().trim_start_matches('$').replace(',', "").parse::<f64>()
                {
                    if let Some(number) = serde_json::Number::from_f64(amount) {
                        map.insert("amount".to_string(), Value::Number(number));
                    }
                }
            }
            repair_stage(map, pipelines);
        }
        RecordType::Note => {
            // Generators sometimes answer with "text" instead of "body"
            if !map.contains_key("body") {
                if let Some(text) = map.remove("text") {
                    map.insert("body".to_string(), text);
                }
            }
        }
        RecordType::Task => {}
    }

    payload
}

fn required_fields(record_type: RecordType) -> &'static [&'static str] {
    match record_type {
        RecordType::Contact => &["first_name", "last_name", "email"],
        RecordType::Company => &["name", "domain"],
        RecordType::Deal => &["name", "amount"],
        RecordType::Note => &["body"],
        RecordType::Task => &["subject"],
    }
}

fn str_field(map: &serde_json::Map<String, Value>, field: &str) -> String {
    map.get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn validate_stage(
    map: &serde_json::Map<String, Value>,
    pipelines: &[Pipeline],
) -> Result<(), ValidationError> {
    let Some(stage) = map.get("stage").and_then(Value::as_str) else {
        return Ok(());
    };
    if pipelines.is_empty() {
        return Ok(());
    }

    let pipeline_hint = map.get("pipeline").and_then(Value::as_str);
    let candidates: Vec<&Pipeline> = match pipeline_hint {
        Some(id) => pipelines.iter().filter(|p| p.id == id).collect(),
        None => pipelines.iter().collect(),
    };

    let known = candidates
        .iter()
        .any(|p| p.stages.iter().any(|s| s.id == stage));
    if known {
        Ok(())
    } else {
        Err(ValidationError::UnknownStage {
            pipeline: pipeline_hint.unwrap_or("any").to_string(),
            stage: stage.to_string(),
        })
    }
}

fn repair_stage(map: &mut serde_json::Map<String, Value>, pipelines: &[Pipeline]) {
    let Some(first) = pipelines.first() else {
        return;
    };
    let pipeline_known = map
        .get("pipeline")
        .and_then(Value::as_str)
        .is_some_and(|id| pipelines.iter().any(|p| p.id == id));
    if !pipeline_known {
        map.insert("pipeline".to_string(), Value::String(first.id.clone()));
    }

    let pipeline_id = str_field(map, "pipeline");
    let pipeline = pipelines
        .iter()
        .find(|p| p.id == pipeline_id)
        .unwrap_or(first);

    let stage_known = map
        .get("stage")
        .and_then(Value::as_str)
        .is_some_and(|id| pipeline.stages.iter().any(|s| s.id == id));
    if !stage_known {
        if let Some(stage) = pipeline.stages.first() {
            map.insert("stage".to_string(), Value::String(stage.id.clone()));
        }
    }
}

fn is_email_like(value: &str) -> bool {
    let Some((local, host)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty() && host.contains('.') && !value.contains(char::is_whitespace)
}

fn is_domain_like(value: &str) -> bool {
    !value.is_empty()
        && value.contains('.')
        && !value.contains("://")
        && !value.contains('/')
        && !value.contains(char::is_whitespace)
}

fn coerce_email(raw: &str) -> String {
    raw.trim().replace(char::is_whitespace, "").to_lowercase()
}

fn coerce_domain(raw: &str) -> String {
    let without_scheme = raw
        .trim()
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or_else(|| raw.trim());
    let without_path = without_scheme.split('/').next().unwrap_or(without_scheme);
    without_path.to_lowercase()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use simcrm_types::crm::PipelineStage;

    fn pipelines() -> Vec<Pipeline> {
        vec![Pipeline {
            id: "default".to_string(),
            label: "Sales".to_string(),
            stages: vec![
                PipelineStage {
                    id: "discovery".to_string(),
                    label: "Discovery".to_string(),
                },
                PipelineStage {
                    id: "closed_won".to_string(),
                    label: "Closed Won".to_string(),
                },
            ],
        }]
    }

    // -------------------------------------------------------------------
    // validate
    // -------------------------------------------------------------------

    #[test]
    fn test_valid_contact_passes() {
        let content = validate(
            RecordType::Contact,
            &json!({ "first_name": "Ada", "last_name": "Lovelace", "email": "ada@ex.co" }),
            &[],
        )
        .unwrap();
        assert!(matches!(content, GeneratedContent::Contact(_)));
    }

    #[test]
    fn test_missing_required_field() {
        let err = validate(
            RecordType::Contact,
            &json!({ "first_name": "Ada", "last_name": "Lovelace" }),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::MissingField { ref field } if field == "email"));
    }

    #[test]
    fn test_blank_required_field_counts_as_missing() {
        let err = validate(
            RecordType::Company,
            &json!({ "name": "Initech", "domain": "  " }),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::MissingField { ref field } if field == "domain"));
    }

    #[test]
    fn test_malformed_email_rejected() {
        let err = validate(
            RecordType::Contact,
            &json!({ "first_name": "A", "last_name": "B", "email": "not-an-email" }),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { ref field, .. } if field == "email"));
    }

    #[test]
    fn test_url_shaped_domain_rejected() {
        let err = validate(
            RecordType::Company,
            &json!({ "name": "Initech", "domain": "https://initech.example/home" }),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { ref field, .. } if field == "domain"));
    }

    #[test]
    fn test_negative_amount_rejected() {
        let err = validate(
            RecordType::Deal,
            &json!({ "name": "Renewal", "amount": -5.0 }),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { ref field, .. } if field == "amount"));
    }

    #[test]
    fn test_unknown_stage_rejected() {
        let err = validate(
            RecordType::Deal,
            &json!({ "name": "Renewal", "amount": 100.0, "pipeline": "default", "stage": "imaginary" }),
            &pipelines(),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::UnknownStage { .. }));
    }

    #[test]
    fn test_known_stage_accepted() {
        let content = validate(
            RecordType::Deal,
            &json!({ "name": "Renewal", "amount": 100.0, "pipeline": "default", "stage": "discovery" }),
            &pipelines(),
        )
        .unwrap();
        assert!(matches!(content, GeneratedContent::Deal(_)));
    }

    #[test]
    fn test_non_object_rejected() {
        let err = validate(RecordType::Note, &json!("just a string"), &[]).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { .. }));
    }

    // -------------------------------------------------------------------
    // repair
    // -------------------------------------------------------------------

    #[test]
    fn test_repair_fills_lifecycle_stage() {
        let input = json!({ "first_name": "A", "last_name": "B", "email": "a@b.co" });
        let repaired = repair(RecordType::Contact, &input, &[]);
        assert_eq!(repaired["lifecycle_stage"], "lead");
        // Input untouched
        assert!(input.get("lifecycle_stage").is_none());
    }

    #[test]
    fn test_repair_coerces_email() {
        let input = json!({ "first_name": "A", "last_name": "B", "email": " Ada @Example.CO " });
        let repaired = repair(RecordType::Contact, &input, &[]);
        assert_eq!(repaired["email"], "ada@example.co");
        assert!(validate(RecordType::Contact, &repaired, &[]).is_ok());
    }

    #[test]
    fn test_repair_strips_domain_scheme_and_path() {
        let input = json!({ "name": "Initech", "domain": "https://Initech.Example/about" });
        let repaired = repair(RecordType::Company, &input, &[]);
        assert_eq!(repaired["domain"], "initech.example");
        assert!(validate(RecordType::Company, &repaired, &[]).is_ok());
    }

    #[test]
    fn test_repair_coerces_string_amount_and_stage() {
        let input = json!({ "name": "Renewal", "amount": "$12,500.00", "stage": "imaginary" });
        let repaired = repair(RecordType::Deal, &input, &pipelines());
        assert_eq!(repaired["amount"], 12500.0);
        assert_eq!(repaired["pipeline"], "default");
        assert_eq!(repaired["stage"], "discovery");
        assert!(validate(RecordType::Deal, &repaired, &pipelines()).is_ok());
    }

    #[test]
    fn test_repair_renames_note_text_to_body() {
        let input = json!({ "text": "called the champion" });
        let repaired = repair(RecordType::Note, &input, &[]);
        assert_eq!(repaired["body"], "called the champion");
        assert!(validate(RecordType::Note, &repaired, &[]).is_ok());
    }
}
