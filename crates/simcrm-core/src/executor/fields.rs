//! Field-name normalization and property type inference.
//!
//! Well-known content fields map to the CRM's canonical vocabulary through a
//! static table; everything else is slugified deterministically. Unmapped
//! fields get their external schema type inferred from name and sample value
//! with ordered heuristics: boolean, date, numeric, enumerated, else string.

use serde_json::Value;

use simcrm_types::crm::PropertyType;
use simcrm_types::job::RecordType;

/// Hard cap on slugified property names.
const MAX_NAME_LEN: usize = 64;

/// Canonical CRM name for a well-known content field, if the table knows it.
pub fn canonical_name(record_type: RecordType, field: &str) -> Option<&'static str> {
    let mapped = match (record_type, field) {
        (RecordType::Contact, "first_name") => "firstname",
        (RecordType::Contact, "last_name") => "lastname",
        (RecordType::Contact, "email") => "email",
        (RecordType::Contact, "phone") => "phone",
        (RecordType::Contact, "job_title") => "jobtitle",
        (RecordType::Contact, "lifecycle_stage") => "lifecyclestage",
        (RecordType::Company, "name") => "name",
        (RecordType::Company, "domain") => "domain",
        (RecordType::Company, "industry") => "industry",
        (RecordType::Company, "description") => "description",
        (RecordType::Company, "employee_count") => "numberofemployees",
        (RecordType::Deal, "name") => "dealname",
        (RecordType::Deal, "amount") => "amount",
        (RecordType::Deal, "pipeline") => "pipeline",
        (RecordType::Deal, "stage") => "dealstage",
        (RecordType::Deal, "close_date") => "closedate",
        (RecordType::Note, "body") => "note_body",
        (RecordType::Task, "subject") => "task_subject",
        (RecordType::Task, "body") => "task_body",
        (RecordType::Task, "due_date") => "task_due_date",
        _ => return None,
    };
    Some(mapped)
}

/// Deterministic slug for fields the mapping table doesn't know: lowercase,
/// invalid characters replaced with `_`, guaranteed leading letter, capped
/// length.
pub fn slugify(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    for c in raw.chars() {
        let lowered = c.to_ascii_lowercase();
        if lowered.is_ascii_alphanumeric() || lowered == '_' {
            slug.push(lowered);
        } else {
            slug.push('_');
        }
    }
    if !slug.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        slug.insert_str(0, "f_");
    }
    slug.truncate(MAX_NAME_LEN);
    slug
}

/// Canonical or slugified name for any content field.
pub fn normalize_name(record_type: RecordType, field: &str) -> String {
    match canonical_name(record_type, field) {
        Some(name) => name.to_string(),
        None => slugify(field),
    }
}

/// Normalize every key of a field map; values pass through untouched.
pub fn normalize_fields(
    record_type: RecordType,
    fields: &serde_json::Map<String, Value>,
) -> serde_json::Map<String, Value> {
    fields
        .iter()
        .map(|(name, value)| (normalize_name(record_type, name), value.clone()))
        .collect()
}

/// Infer the external schema type of an unmapped field.
pub fn infer_property_type(name: &str, value: &Value) -> PropertyType {
    if is_boolean_like(name, value) {
        return PropertyType::Bool;
    }
    if is_date_like(name, value) {
        return PropertyType::Date;
    }
    if is_numeric_like(name, value) {
        return PropertyType::Number;
    }
    if let Value::Array(items) = value {
        if items.iter().all(|v| v.is_string()) {
            return PropertyType::MultiEnumeration;
        }
    }
    if is_enumerated_name(name) && value.is_string() {
        return PropertyType::Enumeration;
    }
    PropertyType::String
}

fn is_boolean_like(name: &str, value: &Value) -> bool {
    if value.is_boolean() {
        return true;
    }
    if name.starts_with("is_") || name.starts_with("has_") || name.ends_with("_flag") {
        return true;
    }
    matches!(
        value.as_str().map(str::to_lowercase).as_deref(),
        Some("true" | "false" | "yes" | "no")
    )
}

fn is_date_like(name: &str, value: &Value) -> bool {
    if name.contains("date") || name.ends_with("_at") {
        return true;
    }
    let Some(s) = value.as_str() else {
        return false;
    };
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
        || chrono::DateTime::parse_from_rfc3339(s).is_ok()
}

fn is_numeric_like(name: &str, value: &Value) -> bool {
    if value.is_number() {
        return true;
    }
    if name.ends_with("_count")
        || name.ends_with("_amount")
        || name.ends_with("_total")
        || name.contains("revenue")
        || name.contains("quantity")
    {
        return true;
    }
    value
        .as_str()
        .is_some_and(|s| !s.is_empty() && s.parse::<f64>().is_ok())
}

fn is_enumerated_name(name: &str) -> bool {
    name.ends_with("_type")
        || name.ends_with("_status")
        || name.ends_with("_stage")
        || name.ends_with("_category")
        || name.ends_with("_tier")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
