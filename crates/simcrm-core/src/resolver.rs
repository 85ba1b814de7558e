//! Reference resolver: symbolic step-local ids to real CRM ids.
//!
//! Resolution consults the job context first. On a miss, strict mode raises
//! a non-retryable reference error; non-strict mode falls back to an
//! exact-match CRM search keyed by a natural key inferred from the symbol's
//! shape and the step's generated content. Exactly one hit is adopted and
//! recorded for the job; more than one is ambiguous and always fails.
//! Association templates are resolved by a pure, copy-producing tree walk.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use simcrm_types::crm::SearchQuery;
use simcrm_types::error::{ReferenceError, StepError};
use simcrm_types::job::{ActionType, CorrelationId, RecordType, Step};

use crate::context::JobContext;
use crate::crm::CrmApi;
use crate::executor::CRM_PROVIDER;
use crate::generator::GeneratedPayload;
use crate::governor::RateGovernor;

/// Symbol prefixes and the record family they imply.
const SYMBOL_PREFIXES: &[(&str, RecordType)] = &[
    ("contact_", RecordType::Contact),
    ("company_", RecordType::Company),
    ("deal_", RecordType::Deal),
    ("note_", RecordType::Note),
    ("task_", RecordType::Task),
];

/// Whether a token has the shape of a symbolic step-local id.
pub fn is_symbolic(token: &str) -> bool {
    SYMBOL_PREFIXES
        .iter()
        .any(|(prefix, _)| token.len() > prefix.len() && token.starts_with(prefix))
}

fn symbol_record_type(token: &str) -> Option<RecordType> {
    SYMBOL_PREFIXES
        .iter()
        .find(|(prefix, _)| token.len() > prefix.len() && token.starts_with(prefix))
        .map(|(_, record_type)| *record_type)
}

/// Output of resolving one step's references.
#[derive(Debug, Clone)]
pub struct ResolvedReferences {
    /// The real id behind the step's own `record_id_template`, when it
    /// refers to an existing record (update/associate actions).
    pub record_id: Option<String>,
    /// Copy of the associations template with resolvable symbolic leaves
    /// replaced by real ids. The template itself is never mutated.
    pub associations: Option<Value>,
    /// Symbols resolved via search fallback; the runner writes these into
    /// the job context immediately so later steps skip the search.
    pub discovered: Vec<(String, String)>,
    /// Symbols left unresolved (non-strict mode only).
    pub unresolved: Vec<String>,
}

/// Resolves symbolic references for one step at a time.
pub struct ReferenceResolver<C: CrmApi> {
    crm: Arc<C>,
    governor: Arc<RateGovernor>,
    strict: bool,
}

impl<C: CrmApi> ReferenceResolver<C> {
    pub fn new(crm: Arc<C>, governor: Arc<RateGovernor>, strict: bool) -> Self {
        Self {
            crm,
            governor,
            strict,
        }
    }

    /// Resolve the step's own record reference and its association template.
    pub async fn resolve(
        &self,
        step: &Step,
        payload: &GeneratedPayload,
        context: &JobContext,
    ) -> Result<ResolvedReferences, StepError> {
        let correlation = CorrelationId::new(step.job_id, step.step_index);

        // Collect every symbol this step needs: its own (unless it mints
        // it), plus all symbolic leaves of the association template.
        let mut wanted: Vec<String> = Vec::new();
        let own_symbol = match (step.action_type, &step.record_id_template) {
            (ActionType::Update | ActionType::Associate, Some(symbol)) => {
                wanted.push(symbol.clone());
                Some(symbol.clone())
            }
            _ => None,
        };
        if let Some(template) = &step.associations_template {
            collect_symbols(template, &mut wanted);
        }
        let mut seen = std::collections::HashSet::new();
        wanted.retain(|symbol| seen.insert(symbol.clone()));

        let mut resolutions: HashMap<String, String> = HashMap::new();
        let mut discovered = Vec::new();
        let mut unresolved = Vec::new();

        for symbol in &wanted {
            if resolutions.contains_key(symbol) {
                continue;
            }
            match self
                .resolve_symbol(symbol, payload, context, correlation)
                .await?
            {
                Resolution::FromContext(id) => {
                    resolutions.insert(symbol.clone(), id);
                }
                Resolution::Discovered(id) => {
                    resolutions.insert(symbol.clone(), id.clone());
                    discovered.push((symbol.clone(), id));
                }
                Resolution::Unresolved => unresolved.push(symbol.clone()),
            }
        }

        let record_id = own_symbol.and_then(|symbol| resolutions.get(&symbol).cloned());
        let associations = step
            .associations_template
            .as_ref()
            .map(|template| substitute_tree(template, &resolutions));

        Ok(ResolvedReferences {
            record_id,
            associations,
            discovered,
            unresolved,
        })
    }

    async fn resolve_symbol(
        &self,
        symbol: &str,
        payload: &GeneratedPayload,
        context: &JobContext,
        correlation: CorrelationId,
    ) -> Result<Resolution, StepError> {
        if let Some(id) = context.get(symbol) {
            return Ok(Resolution::FromContext(id.to_string()));
        }

        if self.strict {
            return Err(ReferenceError::NotFound {
                correlation,
                token: symbol.to_string(),
            }
            .into());
        }

        // Search fallback: a natural key inferred from the symbol's shape
        // and the step's generated content.
        let Some((record_type, property, value)) = natural_key_for(symbol, payload) else {
            tracing::debug!(
                correlation = %correlation,
                symbol,
                "no natural key available, leaving unresolved"
            );
            return Ok(Resolution::Unresolved);
        };

        let query = SearchQuery::exact(property, value);
        let matches = self
            .governor
            .execute(CRM_PROVIDER, || {
                self.crm.search_records(record_type, &query)
            })
            .await?;

        match matches.len() {
            0 => Ok(Resolution::Unresolved),
            1 => {
                let id = matches[0].id.clone();
                tracing::info!(
                    correlation = %correlation,
                    symbol,
                    record_id = %id,
                    "resolved symbol via search fallback"
                );
                Ok(Resolution::Discovered(id))
            }
            candidates => Err(ReferenceError::Ambiguous {
                correlation,
                token: symbol.to_string(),
                candidates,
            }
            .into()),
        }
    }
}

enum Resolution {
    FromContext(String),
    Discovered(String),
    Unresolved,
}

/// The search key to try for a symbol, based on its record family and the
/// step's content. Missing content means no fallback is possible.
fn natural_key_for(
    symbol: &str,
    payload: &GeneratedPayload,
) -> Option<(RecordType, &'static str, String)> {
    let record_type = symbol_record_type(symbol)?;
    match record_type {
        RecordType::Contact => payload
            .field_str("email")
            .map(|email| (record_type, "email", email)),
        RecordType::Company => payload
            .field_str("domain")
            .map(|domain| (record_type, "domain", domain)),
        RecordType::Deal => payload
            .field_str("name")
            .map(|name| (record_type, "dealname", name)),
        RecordType::Note | RecordType::Task => None,
    }
}

/// Collect symbolic leaves of an association template.
fn collect_symbols(tree: &Value, out: &mut Vec<String>) {
    match tree {
        Value::String(leaf) => {
            if is_symbolic(leaf) {
                out.push(leaf.clone());
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_symbols(item, out);
            }
        }
        Value::Object(map) => {
            for value in map.values() {
                collect_symbols(value, out);
            }
        }
        _ => {}
    }
}

/// Rebuild a tree with resolved leaves substituted in place. Pure: the
/// input tree is never modified, so retries of a failed step see the
/// original template.
fn substitute_tree(tree: &Value, resolutions: &HashMap<String, String>) -> Value {
    match tree {
        Value::String(leaf) => match resolutions.get(leaf) {
            Some(id) => Value::String(id.clone()),
            None => tree.clone(),
        },
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| substitute_tree(item, resolutions))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), substitute_tree(value, resolutions)))
                .collect(),
        ),
        _ => tree.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
