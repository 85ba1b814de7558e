//! Wire envelopes for the CRM HTTP API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use simcrm_types::crm::{CrmRecord, Pipeline, PropertyDefinition};

/// Body for create/update requests.
#[derive(Debug, Serialize)]
pub struct RecordBody<'a> {
    pub properties: &'a serde_json::Map<String, Value>,
}

/// Body for exact-match search requests.
#[derive(Debug, Serialize)]
pub struct SearchBody<'a> {
    pub property: &'a str,
    pub value: &'a str,
    pub limit: u32,
}

/// List responses are wrapped in a `results` envelope.
#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<CrmRecord>,
}

#[derive(Debug, Deserialize)]
pub struct PropertyListResponse {
    pub results: Vec<PropertyDefinition>,
}

#[derive(Debug, Deserialize)]
pub struct PipelineListResponse {
    pub results: Vec<Pipeline>,
}

/// Body for adding enum option values to a property.
#[derive(Debug, Serialize)]
pub struct OptionsBody<'a> {
    pub options: &'a [String],
}
