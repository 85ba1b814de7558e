//! Placeholder token substitution.
//!
//! Template strings may embed `{{theme}}`, `{{industry}}`, `{{frequency}}`,
//! `{{simulation_id}}`, `{{owner_id}}`, `{{sequence}}`, and `{{now}}`.
//! Substitution is a single pure string-replace pass applied once at
//! planning time; unknown tokens are left as-is.

use serde_json::Value;
use simcrm_types::template::PlaceholderValues;

/// Substitute all recognized tokens in a string.
pub fn substitute(input: &str, values: &PlaceholderValues) -> String {
    input
        .replace("{{theme}}", &values.theme)
        .replace("{{industry}}", &values.industry)
        .replace("{{frequency}}", &values.frequency)
        .replace("{{simulation_id}}", &values.simulation_id.to_string())
        .replace("{{owner_id}}", values.owner_id.as_deref().unwrap_or(""))
        .replace("{{sequence}}", &values.sequence.to_string())
        .replace("{{now}}", &values.now.to_rfc3339())
}

/// Substitute tokens in every string leaf of a JSON tree, producing a new
/// tree. The input is never mutated.
pub fn substitute_value(input: &Value, values: &PlaceholderValues) -> Value {
    match input {
        Value::String(s) => Value::String(substitute(s, values)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| substitute_value(item, values))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_value(v, values)))
                .collect(),
        ),
        other => other.clone(),
    }
}
