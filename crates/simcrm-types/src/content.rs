//! Generated-content model.
//!
//! Everything returned by the text-generation service is loosely-typed JSON;
//! it only becomes one of these variants after passing the generator's
//! schema validation. The rest of the engine never touches raw generated
//! fields directly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::job::RecordType;

/// Bookkeeping fields stripped from payloads before caching.
pub const BOOKKEEPING_FIELDS: &[&str] = &["_seed", "_generated_at"];

/// Validated content for one record, tagged by record type.
///
/// Internally tagged to match the generated JSON:
/// ```json
/// { "record_type": "contact", "first_name": "Ada", ... }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record_type", rename_all = "snake_case")]
pub enum GeneratedContent {
    Contact(ContactContent),
    Company(CompanyContent),
    Deal(DealContent),
    Note(NoteContent),
    Task(TaskContent),
}

impl GeneratedContent {
    /// The record type this content is for.
    pub fn record_type(&self) -> RecordType {
        match self {
            GeneratedContent::Contact(_) => RecordType::Contact,
            GeneratedContent::Company(_) => RecordType::Company,
            GeneratedContent::Deal(_) => RecordType::Deal,
            GeneratedContent::Note(_) => RecordType::Note,
            GeneratedContent::Task(_) => RecordType::Task,
        }
    }

    /// The natural key used for de-duplication and search fallback, if any.
    ///
    /// Contacts key on email, companies on domain, deals on name.
    pub fn natural_key(&self) -> Option<(&'static str, &str)> {
        match self {
            GeneratedContent::Contact(c) => Some(("email", c.email.as_str())),
            GeneratedContent::Company(c) => Some(("domain", c.domain.as_str())),
            GeneratedContent::Deal(d) => Some(("dealname", d.name.as_str())),
            GeneratedContent::Note(_) | GeneratedContent::Task(_) => None,
        }
    }

    /// Flatten into a field-name -> value map for the executor.
    pub fn to_fields(&self) -> serde_json::Map<String, Value> {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(ref mut map) = value {
            map.remove("record_type");
            return std::mem::take(map);
        }
        serde_json::Map::new()
    }
}

/// Generated fields for a contact record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactContent {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle_stage: Option<String>,
}

/// Generated fields for a company record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyContent {
    pub name: String,
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_count: Option<u32>,
}

/// Generated fields for a deal record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealContent {
    pub name: String,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_date: Option<String>,
}

/// Generated body for a note record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteContent {
    pub body: String,
}

/// Generated fields for a task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskContent {
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
}
