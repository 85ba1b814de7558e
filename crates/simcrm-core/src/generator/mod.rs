//! Content generator: deterministic seeding, prompt construction, parsing,
//! validation with bounded auto-repair, and caching.
//!
//! For a given (action, theme, industry, job, step index) the seed is
//! stable, so re-running a step regenerates identical content -- both
//! because the cache is keyed on the seed and because the prompt instructs
//! the service to produce identical output for identical seeds.

pub mod cache;
pub mod schema;

use std::sync::Arc;

use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use simcrm_types::content::GeneratedContent;
use simcrm_types::crm::Pipeline;
use simcrm_types::error::{GenerationError, StepError};
use simcrm_types::job::{ActionType, CorrelationId, RecordType};

use crate::governor::RateGovernor;
use crate::textgen::TextGenerator;
use cache::{CacheKey, ContentCache};

/// Provider label under which text-service calls are governed.
const TEXTGEN_PROVIDER: &str = "textgen";

// ---------------------------------------------------------------------------
// Request / payload types
// ---------------------------------------------------------------------------

/// Everything the generator needs for one step.
#[derive(Debug)]
pub struct GenerationRequest<'a> {
    pub correlation: CorrelationId,
    pub action_type: ActionType,
    pub record_type: RecordType,
    pub theme: &'a str,
    pub industry: &'a str,
    /// Valid pipelines/stages fetched from the CRM, embedded in the prompt
    /// so generated deals never reference identifiers that don't exist.
    pub pipelines: &'a [Pipeline],
    /// The step's raw template payload, returned unchanged when relaxed-mode
    /// generation falls back.
    pub fallback: Option<&'a Value>,
}

/// What the generator hands to the executor.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratedPayload {
    /// Schema-validated, typed content.
    Validated(GeneratedContent),
    /// The step's template payload, passed through unchanged (relaxed mode).
    Fallback(Value),
}

impl GeneratedPayload {
    /// Flatten to a field map for the executor.
    pub fn fields(&self) -> serde_json::Map<String, Value> {
        match self {
            GeneratedPayload::Validated(content) => content.to_fields(),
            GeneratedPayload::Fallback(value) => match value {
                Value::Object(map) => map.clone(),
                _ => serde_json::Map::new(),
            },
        }
    }

    /// A single string field, if present.
    pub fn field_str(&self, key: &str) -> Option<String> {
        self.fields()
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// The de-duplication natural key, if one applies.
    pub fn natural_key(&self) -> Option<(&'static str, String)> {
        match self {
            GeneratedPayload::Validated(content) => content
                .natural_key()
                .map(|(property, value)| (property, value.to_string())),
            GeneratedPayload::Fallback(_) => {
                for property in ["email", "domain", "dealname"] {
                    if let Some(value) = self.field_str(property) {
                        return Some((
                            match property {
                                "email" => "email",
                                "domain" => "domain",
                                _ => "dealname",
                            },
                            value,
                        ));
                    }
                }
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Seeding
// ---------------------------------------------------------------------------

/// Derive the stable seed for a step's content.
pub fn derive_seed(
    action_type: ActionType,
    theme: &str,
    industry: &str,
    job_id: Uuid,
    step_index: u32,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(action_type.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(theme.as_bytes());
    hasher.update(b"|");
    hasher.update(industry.as_bytes());
    hasher.update(b"|");
    hasher.update(job_id.as_bytes());
    hasher.update(b"|");
    hasher.update(step_index.to_be_bytes());
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// ContentGenerator
// ---------------------------------------------------------------------------

/// Drives the generate/parse/validate/repair/cache pipeline.
pub struct ContentGenerator<G: TextGenerator> {
    textgen: Arc<G>,
    cache: Arc<ContentCache>,
    governor: Arc<RateGovernor>,
    strict: bool,
}

impl<G: TextGenerator> ContentGenerator<G> {
    pub fn new(
        textgen: Arc<G>,
        cache: Arc<ContentCache>,
        governor: Arc<RateGovernor>,
        strict: bool,
    ) -> Self {
        Self {
            textgen,
            cache,
            governor,
            strict,
        }
    }

    /// Produce content for one step.
    pub async fn generate(
        &self,
        request: &GenerationRequest<'_>,
    ) -> Result<GeneratedPayload, StepError> {
        let seed = derive_seed(
            request.action_type,
            request.theme,
            request.industry,
            request.correlation.job_id,
            request.correlation.step_index,
        );
        let key = CacheKey {
            theme: request.theme.to_string(),
            industry: request.industry.to_string(),
            seed: seed.clone(),
            action: request.action_type,
        };

        if let Some(cached) = self.cache.fetch(&key) {
            match schema::validate(request.record_type, &cached, request.pipelines) {
                Ok(content) => {
                    tracing::debug!(correlation = %request.correlation, seed, "content cache hit");
                    return Ok(GeneratedPayload::Validated(content));
                }
                Err(error) => {
                    // Schema drift or corruption: the entry is useless now
                    tracing::warn!(
                        correlation = %request.correlation,
                        seed,
                        %error,
                        "cached content failed re-validation, evicting"
                    );
                    self.cache.evict(&key);
                }
            }
        }

        let prompt = build_prompt(request, &seed);
        let raw = match self
            .governor
            .execute(TEXTGEN_PROVIDER, || self.textgen.generate(&prompt))
            .await
        {
            Ok(raw) => raw,
            Err(error) => {
                if self.strict {
                    return Err(GenerationError::Service {
                        correlation: request.correlation,
                        message: error.to_string(),
                    }
                    .into());
                }
                tracing::warn!(correlation = %request.correlation, %error, "generation failed, using template fallback");
                return Ok(self.fallback(request));
            }
        };

        let parsed: Value = match serde_json::from_str(extract_json(&raw)) {
            Ok(value) => value,
            Err(error) => {
                if self.strict {
                    return Err(GenerationError::Parse {
                        correlation: request.correlation,
                        message: error.to_string(),
                    }
                    .into());
                }
                tracing::warn!(correlation = %request.correlation, %error, "unparseable generation, using template fallback");
                return Ok(self.fallback(request));
            }
        };

        match schema::validate(request.record_type, &parsed, request.pipelines) {
            Ok(content) => Ok(self.admit(key, content)),
            Err(first_error) => {
                let repaired = schema::repair(request.record_type, &parsed, request.pipelines);
                match schema::validate(request.record_type, &repaired, request.pipelines) {
                    Ok(content) => {
                        tracing::debug!(
                            correlation = %request.correlation,
                            error = %first_error,
                            "generated content auto-repaired"
                        );
                        Ok(self.admit(key, content))
                    }
                    Err(error) if self.strict => Err(GenerationError::InvalidAfterRepair {
                        correlation: request.correlation,
                        source: error,
                    }
                    .into()),
                    Err(error) => {
                        tracing::warn!(
                            correlation = %request.correlation,
                            %error,
                            "generated content invalid after repair, using template fallback"
                        );
                        Ok(self.fallback(request))
                    }
                }
            }
        }
    }

    fn admit(&self, key: CacheKey, content: GeneratedContent) -> GeneratedPayload {
        if let Ok(mut value) = serde_json::to_value(&content) {
            if let Value::Object(ref mut map) = value {
                map.remove("record_type");
            }
            self.cache.store(key, value);
        }
        GeneratedPayload::Validated(content)
    }

    fn fallback(&self, request: &GenerationRequest<'_>) -> GeneratedPayload {
        GeneratedPayload::Fallback(
            request
                .fallback
                .cloned()
                .unwrap_or(Value::Object(serde_json::Map::new())),
        )
    }
}

// ---------------------------------------------------------------------------
// Prompt construction
// ---------------------------------------------------------------------------

fn build_prompt(request: &GenerationRequest<'_>, seed: &str) -> String {
    let field_shape = match request.record_type {
        RecordType::Contact => {
            "\"first_name\" (string), \"last_name\" (string), \"email\" (string, valid address), \
             \"job_title\" (string, optional), \"phone\" (string, optional), \
             \"lifecycle_stage\" (string, optional)"
        }
        RecordType::Company => {
            "\"name\" (string), \"domain\" (string, bare domain like acme.example), \
             \"industry\" (string, optional), \"description\" (string, optional), \
             \"employee_count\" (integer, optional)"
        }
        RecordType::Deal => {
            "\"name\" (string), \"amount\" (non-negative number), \"pipeline\" (string, optional), \
             \"stage\" (string, optional), \"close_date\" (YYYY-MM-DD, optional)"
        }
        RecordType::Note => "\"body\" (string)",
        RecordType::Task => {
            "\"subject\" (string), \"body\" (string, optional), \"due_date\" (YYYY-MM-DD, optional)"
        }
    };

    let mut prompt = format!(
        "Generate realistic CRM field content for one {record} record ({action} action).\n\
         Theme: {theme}\n\
         Industry: {industry}\n\
         \n\
         Respond with a single JSON object containing exactly these fields:\n\
         {field_shape}\n",
        record = request.record_type,
        action = request.action_type.as_str(),
        theme = request.theme,
        industry = request.industry,
    );

    if !request.pipelines.is_empty() {
        prompt.push_str("\nValid pipeline and stage identifiers (use these exact ids):\n");
        for pipeline in request.pipelines {
            let stages: Vec<&str> = pipeline.stages.iter().map(|s| s.id.as_str()).collect();
            prompt.push_str(&format!(
                "- pipeline \"{}\": stages {}\n",
                pipeline.id,
                stages.join(", ")
            ));
        }
    }

    prompt.push_str(&format!(
        "\nReproducibility seed: {seed}. Given the same seed, produce byte-identical output.\n\
         Respond with JSON only, no commentary."
    ));
    prompt
}

/// Trim markdown fences or commentary around the JSON body.
fn extract_json(raw: &str) -> &str {
    let start = raw.find(['{', '[']);
    let end = raw.rfind(['}', ']']);
    match (start, end) {
        (Some(s), Some(e)) if e >= s => &raw[s..=e],
        _ => raw,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
