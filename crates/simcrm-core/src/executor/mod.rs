//! Record executor: performs the actual CRM writes for a step.
//!
//! Creates de-duplicate through exact-match search on the content's natural
//! key; field names are normalized to the CRM vocabulary; missing property
//! definitions and enum options are created lazily before the write; and
//! association pairs are gated by the local compatibility table before any
//! network call happens.

pub mod associations;
pub mod fields;

use std::sync::Arc;

use serde_json::{Value, json};

use simcrm_types::crm::{
    AssociationRequest, PropertyDefinition, PropertyType, RecordPayload, SearchQuery,
};
use simcrm_types::error::{ReferenceError, StepError, ValidationError};
use simcrm_types::job::{ActionType, CorrelationId, RecordType, Step};

use crate::crm::CrmApi;
use crate::generator::GeneratedPayload;
use crate::governor::RateGovernor;
use crate::resolver::ResolvedReferences;

/// Provider label under which CRM calls are governed.
pub const CRM_PROVIDER: &str = "crm";

/// What a step execution produced.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// The CRM id the step operated on (newly created, reused, or updated).
    pub record_id: Option<String>,
    /// True when an existing record was reused instead of creating one.
    pub deduplicated: bool,
    /// Result payload persisted onto the step.
    pub summary: Value,
}

/// Executes create/update/associate actions against the CRM.
pub struct RecordExecutor<C: CrmApi> {
    crm: Arc<C>,
    governor: Arc<RateGovernor>,
    deduplicate: bool,
}

impl<C: CrmApi> RecordExecutor<C> {
    pub fn new(crm: Arc<C>, governor: Arc<RateGovernor>, deduplicate: bool) -> Self {
        Self {
            crm,
            governor,
            deduplicate,
        }
    }

    /// Perform a step's action. References must already be resolved.
    pub async fn execute(
        &self,
        step: &Step,
        payload: &GeneratedPayload,
        resolved: &ResolvedReferences,
    ) -> Result<ExecutionOutcome, StepError> {
        let correlation = CorrelationId::new(step.job_id, step.step_index);
        match step.action_type {
            ActionType::Create => self.execute_create(step, payload, resolved, correlation).await,
            ActionType::Update => self.execute_update(step, payload, resolved, correlation).await,
            ActionType::Associate => self.execute_associate(step, resolved, correlation).await,
        }
    }

    async fn execute_create(
        &self,
        step: &Step,
        payload: &GeneratedPayload,
        resolved: &ResolvedReferences,
        correlation: CorrelationId,
    ) -> Result<ExecutionOutcome, StepError> {
        if self.deduplicate {
            if let Some((property, value)) = payload.natural_key() {
                let query = SearchQuery::exact(property, value.clone());
                let matches = self
                    .governor
                    .execute(CRM_PROVIDER, || {
                        self.crm.search_records(step.record_type, &query)
                    })
                    .await?;
                match matches.len() {
                    0 => {}
                    1 => {
                        let existing_id = matches[0].id.clone();
                        tracing::info!(
                            correlation = %correlation,
                            record_id = %existing_id,
                            "reusing existing record instead of creating"
                        );
                        let applied = self
                            .maybe_associate(step.record_type, &existing_id, resolved, correlation)
                            .await?;
                        return Ok(ExecutionOutcome {
                            record_id: Some(existing_id.clone()),
                            deduplicated: true,
                            summary: json!({
                                "action": "create",
                                "record_id": existing_id,
                                "deduplicated": true,
                                "associations": applied,
                            }),
                        });
                    }
                    candidates => {
                        return Err(ReferenceError::Ambiguous {
                            correlation,
                            token: format!("{property}={value}"),
                            candidates,
                        }
                        .into());
                    }
                }
            }
        }

        let properties = fields::normalize_fields(step.record_type, &payload.fields());
        self.ensure_properties(step.record_type, &properties).await?;

        let record_payload = RecordPayload { properties };
        let record = self
            .governor
            .execute(CRM_PROVIDER, || {
                self.crm.create_record(step.record_type, &record_payload)
            })
            .await?;

        let applied = self
            .maybe_associate(step.record_type, &record.id, resolved, correlation)
            .await?;

        Ok(ExecutionOutcome {
            record_id: Some(record.id.clone()),
            deduplicated: false,
            summary: json!({
                "action": "create",
                "record_id": record.id,
                "deduplicated": false,
                "associations": applied,
            }),
        })
    }

    async fn execute_update(
        &self,
        step: &Step,
        payload: &GeneratedPayload,
        resolved: &ResolvedReferences,
        correlation: CorrelationId,
    ) -> Result<ExecutionOutcome, StepError> {
        let record_id = self.require_record_id(step, resolved, correlation)?;

        let properties = fields::normalize_fields(step.record_type, &payload.fields());
        self.ensure_properties(step.record_type, &properties).await?;

        let record_payload = RecordPayload { properties };
        let record = self
            .governor
            .execute(CRM_PROVIDER, || {
                self.crm
                    .update_record(step.record_type, &record_id, &record_payload)
            })
            .await?;

        let applied = self
            .maybe_associate(step.record_type, &record.id, resolved, correlation)
            .await?;

        Ok(ExecutionOutcome {
            record_id: Some(record.id.clone()),
            deduplicated: false,
            summary: json!({
                "action": "update",
                "record_id": record.id,
                "associations": applied,
            }),
        })
    }

    async fn execute_associate(
        &self,
        step: &Step,
        resolved: &ResolvedReferences,
        correlation: CorrelationId,
    ) -> Result<ExecutionOutcome, StepError> {
        let record_id = self.require_record_id(step, resolved, correlation)?;
        let Some(associations) = &resolved.associations else {
            return Err(ValidationError::MissingField {
                field: "associations_template".to_string(),
            }
            .into());
        };

        let applied = self
            .apply_associations(step.record_type, &record_id, associations, correlation)
            .await?;

        Ok(ExecutionOutcome {
            record_id: Some(record_id.clone()),
            deduplicated: false,
            summary: json!({
                "action": "associate",
                "record_id": record_id,
                "associations": applied,
            }),
        })
    }

    fn require_record_id(
        &self,
        step: &Step,
        resolved: &ResolvedReferences,
        correlation: CorrelationId,
    ) -> Result<String, StepError> {
        resolved.record_id.clone().ok_or_else(|| {
            ReferenceError::NotFound {
                correlation,
                token: step
                    .record_id_template
                    .clone()
                    .unwrap_or_else(|| "<no record id template>".to_string()),
            }
            .into()
        })
    }

    async fn maybe_associate(
        &self,
        source_type: RecordType,
        source_id: &str,
        resolved: &ResolvedReferences,
        correlation: CorrelationId,
    ) -> Result<Vec<Value>, StepError> {
        match &resolved.associations {
            Some(associations) => {
                self.apply_associations(source_type, source_id, associations, correlation)
                    .await
            }
            None => Ok(Vec::new()),
        }
    }

    /// Apply a resolved associations structure. All (source, target) pairs
    /// are validated against the compatibility table before the first
    /// network call, so an unsupported pair never reaches the API.
    async fn apply_associations(
        &self,
        source_type: RecordType,
        source_id: &str,
        associations: &Value,
        correlation: CorrelationId,
    ) -> Result<Vec<Value>, StepError> {
        let Some(map) = associations.as_object() else {
            return Err(ValidationError::InvalidField {
                field: "associations".to_string(),
                message: "expected an object of target type -> id(s)".to_string(),
            }
            .into());
        };

        // Gate every pair first
        let mut validated: Vec<(RecordType, &'static str, Vec<String>)> = Vec::new();
        for (target_key, ids) in map {
            let target_type: RecordType =
                target_key
                    .parse()
                    .map_err(|_| ValidationError::InvalidField {
                        field: target_key.clone(),
                        message: "unknown association target type".to_string(),
                    })?;
            let association_type = associations::association_type(source_type, target_type)
                .ok_or_else(|| ValidationError::InvalidField {
                    field: format!("{source_type}->{target_type}"),
                    message: "unsupported association pair".to_string(),
                })?;

            let targets: Vec<String> = match ids {
                Value::String(id) => vec![id.clone()],
                Value::Array(items) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
                _ => {
                    return Err(ValidationError::InvalidField {
                        field: target_key.clone(),
                        message: "expected an id or list of ids".to_string(),
                    }
                    .into());
                }
            };
            validated.push((target_type, association_type, targets));
        }

        let mut applied = Vec::new();
        for (target_type, association_type, targets) in validated {
            for target_id in targets {
                if crate::resolver::is_symbolic(&target_id) {
                    // Unresolved leftover from non-strict resolution
                    tracing::warn!(
                        correlation = %correlation,
                        target = %target_id,
                        "skipping association with unresolved target"
                    );
                    applied.push(json!({
                        "target_type": target_type.as_str(),
                        "target_id": target_id,
                        "skipped": "unresolved",
                    }));
                    continue;
                }

                let request = AssociationRequest {
                    source_type: source_type.as_str().to_string(),
                    source_id: source_id.to_string(),
                    target_type: target_type.as_str().to_string(),
                    target_id: target_id.clone(),
                    association_type: association_type.to_string(),
                };
                self.governor
                    .execute(CRM_PROVIDER, || self.crm.associate(&request))
                    .await?;
                applied.push(json!({
                    "target_type": target_type.as_str(),
                    "target_id": target_id,
                    "association_type": association_type,
                }));
            }
        }
        Ok(applied)
    }

    /// Make sure every outgoing field exists on the CRM's schema, creating
    /// missing property definitions and enum option values first.
    async fn ensure_properties(
        &self,
        record_type: RecordType,
        properties: &serde_json::Map<String, Value>,
    ) -> Result<(), StepError> {
        let existing = self
            .governor
            .execute(CRM_PROVIDER, || self.crm.list_properties(record_type))
            .await?;

        for (name, value) in properties {
            match existing.iter().find(|def| def.name == *name) {
                None => {
                    let property_type = fields::infer_property_type(name, value);
                    let definition = PropertyDefinition {
                        name: name.clone(),
                        property_type,
                        options: enum_options(property_type, value),
                    };
                    tracing::debug!(
                        record_type = %record_type,
                        property = %name,
                        property_type = property_type.as_str(),
                        "creating missing property definition"
                    );
                    self.governor
                        .execute(CRM_PROVIDER, || {
                            self.crm.create_property(record_type, &definition)
                        })
                        .await?;
                }
                Some(def)
                    if matches!(
                        def.property_type,
                        PropertyType::Enumeration | PropertyType::MultiEnumeration
                    ) =>
                {
                    let missing: Vec<String> = option_values(value)
                        .into_iter()
                        .filter(|option| !def.options.contains(option))
                        .collect();
                    if !missing.is_empty() {
                        self.governor
                            .execute(CRM_PROVIDER, || {
                                self.crm.add_property_options(record_type, name, &missing)
                            })
                            .await?;
                    }
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

fn option_values(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn enum_options(property_type: PropertyType, value: &Value) -> Vec<String> {
    match property_type {
        PropertyType::Enumeration | PropertyType::MultiEnumeration => option_values(value),
        _ => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
