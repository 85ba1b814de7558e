//! Wire types for the external CRM-style API.
//!
//! Plain serde structs mirroring the shapes the HTTP client sends and
//! receives: record payloads, exact-match search, property (field schema)
//! definitions, and association requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A record as returned by the CRM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmRecord {
    /// The CRM-assigned id.
    pub id: String,
    /// Normalized field name -> value.
    pub properties: serde_json::Map<String, Value>,
}

/// Payload for creating or updating a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordPayload {
    /// Normalized field name -> value.
    pub properties: serde_json::Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Exact-match search over one property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Normalized property name to match on.
    pub property: String,
    /// Exact value to match.
    pub value: String,
    /// Maximum number of hits to return.
    #[serde(default = "default_search_limit")]
    pub limit: u32,
}

fn default_search_limit() -> u32 {
    10
}

impl SearchQuery {
    pub fn exact(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            value: value.into(),
            limit: default_search_limit(),
        }
    }
}

// ---------------------------------------------------------------------------
// Property definitions
// ---------------------------------------------------------------------------

/// External schema type of a CRM property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    Bool,
    Date,
    Number,
    Enumeration,
    MultiEnumeration,
    String,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::Bool => "bool",
            PropertyType::Date => "date",
            PropertyType::Number => "number",
            PropertyType::Enumeration => "enumeration",
            PropertyType::MultiEnumeration => "multi_enumeration",
            PropertyType::String => "string",
        }
    }
}

/// Definition of a property on a CRM record type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDefinition {
    /// Normalized (canonical) property name.
    pub name: String,
    /// Schema type.
    pub property_type: PropertyType,
    /// Valid option values for enumerated properties.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

// ---------------------------------------------------------------------------
// Pipelines
// ---------------------------------------------------------------------------

/// A deal pipeline with its ordered stages, fetched from the CRM so that
/// generated content only references identifiers that actually exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub label: String,
    pub stages: Vec<PipelineStage>,
}

/// One stage within a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStage {
    pub id: String,
    pub label: String,
}

// ---------------------------------------------------------------------------
// Associations
// ---------------------------------------------------------------------------

/// Request to associate two existing records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssociationRequest {
    pub source_type: String,
    pub source_id: String,
    pub target_type: String,
    pub target_id: String,
    /// CRM association type identifier supplied by the compatibility table.
    pub association_type: String,
}
