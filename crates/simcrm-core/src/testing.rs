//! In-memory fakes shared by the engine's unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use simcrm_types::crm::{
    AssociationRequest, CrmRecord, Pipeline, PropertyDefinition, PropertyType, RecordPayload,
    SearchQuery,
};
use simcrm_types::error::{CrmError, RepositoryError, TextGenError};
use simcrm_types::job::{Job, JobStatus, RecordType, Step, StepStatus};

use crate::crm::CrmApi;
use crate::repository::SimulationRepository;
use crate::textgen::TextGenerator;

// ---------------------------------------------------------------------------
// InMemoryRepository
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RepoState {
    jobs: HashMap<Uuid, Job>,
    steps: HashMap<Uuid, Step>,
    context: HashMap<Uuid, HashMap<String, String>>,
}

/// Hash-map-backed `SimulationRepository`.
#[derive(Default)]
pub struct InMemoryRepository {
    inner: Mutex<RepoState>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&self, id: &Uuid) -> Option<Step> {
        self.inner.lock().unwrap().steps.get(id).cloned()
    }

    pub fn job(&self, id: &Uuid) -> Option<Job> {
        self.inner.lock().unwrap().jobs.get(id).cloned()
    }
}

impl SimulationRepository for InMemoryRepository {
    async fn create_job_with_steps(
        &self,
        job: &Job,
        steps: &[Step],
    ) -> Result<(), RepositoryError> {
        let mut state = self.inner.lock().unwrap();
        state.jobs.insert(job.id, job.clone());
        for step in steps {
            state.steps.insert(step.id, step.clone());
        }
        Ok(())
    }

    async fn get_job(&self, id: &Uuid) -> Result<Option<Job>, RepositoryError> {
        Ok(self.inner.lock().unwrap().jobs.get(id).cloned())
    }

    async fn update_job_status(
        &self,
        id: &Uuid,
        status: JobStatus,
    ) -> Result<(), RepositoryError> {
        let mut state = self.inner.lock().unwrap();
        let job = state.jobs.get_mut(id).ok_or(RepositoryError::NotFound)?;
        job.status = status;
        Ok(())
    }

    async fn due_steps(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Step>, RepositoryError> {
        let state = self.inner.lock().unwrap();
        let mut due: Vec<Step> = state
            .steps
            .values()
            .filter(|step| {
                step.status == StepStatus::Pending
                    && step.scheduled_at <= now
                    && state
                        .jobs
                        .get(&step.job_id)
                        .is_some_and(|job| job.status.is_executable())
            })
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.scheduled_at
                .cmp(&b.scheduled_at)
                .then(a.step_index.cmp(&b.step_index))
        });
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn claim_step(&self, step_id: &Uuid) -> Result<bool, RepositoryError> {
        let mut state = self.inner.lock().unwrap();
        let step = state.steps.get_mut(step_id).ok_or(RepositoryError::NotFound)?;
        if step.status != StepStatus::Pending {
            return Ok(false);
        }
        step.status = StepStatus::Processing;
        step.attempt += 1;
        Ok(true)
    }

    async fn complete_step(&self, step_id: &Uuid, result: &Value) -> Result<(), RepositoryError> {
        let mut state = self.inner.lock().unwrap();
        let step = state.steps.get_mut(step_id).ok_or(RepositoryError::NotFound)?;
        step.status = StepStatus::Completed;
        step.result = Some(result.clone());
        Ok(())
    }

    async fn fail_step(
        &self,
        step_id: &Uuid,
        status: StepStatus,
        result: &Value,
    ) -> Result<(), RepositoryError> {
        let mut state = self.inner.lock().unwrap();
        let step = state.steps.get_mut(step_id).ok_or(RepositoryError::NotFound)?;
        step.status = status;
        step.result = Some(result.clone());
        Ok(())
    }

    async fn requeue_failed_step(
        &self,
        step_id: &Uuid,
        scheduled_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.inner.lock().unwrap();
        let step = state.steps.get_mut(step_id).ok_or(RepositoryError::NotFound)?;
        if step.status != StepStatus::Failed {
            return Ok(false);
        }
        step.status = StepStatus::Pending;
        step.scheduled_at = scheduled_at;
        Ok(true)
    }

    async fn list_steps(&self, job_id: &Uuid) -> Result<Vec<Step>, RepositoryError> {
        let state = self.inner.lock().unwrap();
        let mut steps: Vec<Step> = state
            .steps
            .values()
            .filter(|step| step.job_id == *job_id)
            .cloned()
            .collect();
        steps.sort_by_key(|step| step.step_index);
        Ok(steps)
    }

    async fn list_steps_by_status(
        &self,
        job_id: &Uuid,
        status: StepStatus,
    ) -> Result<Vec<Step>, RepositoryError> {
        let state = self.inner.lock().unwrap();
        let mut steps: Vec<Step> = state
            .steps
            .values()
            .filter(|step| step.job_id == *job_id && step.status == status)
            .cloned()
            .collect();
        steps.sort_by_key(|step| step.step_index);
        Ok(steps)
    }

    async fn bulk_transition_steps(
        &self,
        job_id: &Uuid,
        from: &[StepStatus],
        to: StepStatus,
    ) -> Result<u64, RepositoryError> {
        let mut state = self.inner.lock().unwrap();
        let mut changed = 0;
        for step in state.steps.values_mut() {
            if step.job_id == *job_id && from.contains(&step.status) {
                step.status = to;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn has_unsettled_steps(&self, job_id: &Uuid) -> Result<bool, RepositoryError> {
        let state = self.inner.lock().unwrap();
        Ok(state.steps.values().any(|step| {
            step.job_id == *job_id
                && matches!(
                    step.status,
                    StepStatus::Pending | StepStatus::Processing | StepStatus::Paused
                )
        }))
    }

    async fn put_context_entry(
        &self,
        job_id: &Uuid,
        symbol: &str,
        real_id: &str,
    ) -> Result<(), RepositoryError> {
        let mut state = self.inner.lock().unwrap();
        state
            .context
            .entry(*job_id)
            .or_default()
            .insert(symbol.to_string(), real_id.to_string());
        Ok(())
    }

    async fn get_context(
        &self,
        job_id: &Uuid,
    ) -> Result<HashMap<String, String>, RepositoryError> {
        let state = self.inner.lock().unwrap();
        Ok(state.context.get(job_id).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// FakeCrm
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CrmState {
    next_id: u64,
    created: Vec<CrmRecord>,
    updated: Vec<(String, RecordPayload)>,
    associations: Vec<AssociationRequest>,
    search_results: HashMap<(String, String), Vec<String>>,
    properties: HashMap<RecordType, Vec<PropertyDefinition>>,
    created_properties: Vec<(RecordType, PropertyDefinition)>,
    added_options: Vec<(RecordType, String, Vec<String>)>,
    pipelines: Vec<Pipeline>,
    search_calls: u32,
    fail_create: Option<CrmError>,
}

/// Scriptable in-memory `CrmApi`.
pub struct FakeCrm {
    inner: Mutex<CrmState>,
}

impl FakeCrm {
    /// A fake CRM pre-seeded with the canonical property vocabulary.
    pub fn new() -> Self {
        let mut properties: HashMap<RecordType, Vec<PropertyDefinition>> = HashMap::new();
        let seed = |names: &[&str]| -> Vec<PropertyDefinition> {
            names
                .iter()
                .map(|name| PropertyDefinition {
                    name: (*name).to_string(),
                    property_type: PropertyType::String,
                    options: Vec::new(),
                })
                .collect()
        };
        properties.insert(
            RecordType::Contact,
            seed(&["email", "firstname", "lastname", "phone", "jobtitle", "lifecyclestage"]),
        );
        properties.insert(
            RecordType::Company,
            seed(&["name", "domain", "industry", "description", "numberofemployees"]),
        );
        properties.insert(
            RecordType::Deal,
            seed(&["dealname", "amount", "pipeline", "dealstage", "closedate"]),
        );
        properties.insert(RecordType::Note, seed(&["note_body"]));
        properties.insert(
            RecordType::Task,
            seed(&["task_subject", "task_body", "task_due_date"]),
        );

        Self {
            inner: Mutex::new(CrmState {
                properties,
                ..CrmState::default()
            }),
        }
    }

    pub fn seed_search_result(&self, property: &str, value: &str, ids: &[&str]) {
        self.inner.lock().unwrap().search_results.insert(
            (property.to_string(), value.to_string()),
            ids.iter().map(|id| (*id).to_string()).collect(),
        );
    }

    pub fn seed_property(&self, record_type: RecordType, definition: PropertyDefinition) {
        self.inner
            .lock()
            .unwrap()
            .properties
            .entry(record_type)
            .or_default()
            .push(definition);
    }

    pub fn seed_pipelines(&self, pipelines: Vec<Pipeline>) {
        self.inner.lock().unwrap().pipelines = pipelines;
    }

    pub fn fail_next_create(&self, error: CrmError) {
        self.inner.lock().unwrap().fail_create = Some(error);
    }

    pub fn created_records(&self) -> Vec<CrmRecord> {
        self.inner.lock().unwrap().created.clone()
    }

    pub fn updated_records(&self) -> Vec<(String, RecordPayload)> {
        self.inner.lock().unwrap().updated.clone()
    }

    pub fn associations(&self) -> Vec<AssociationRequest> {
        self.inner.lock().unwrap().associations.clone()
    }

    pub fn created_properties(&self, record_type: RecordType) -> Vec<PropertyDefinition> {
        self.inner
            .lock()
            .unwrap()
            .created_properties
            .iter()
            .filter(|(rt, _)| *rt == record_type)
            .map(|(_, def)| def.clone())
            .collect()
    }

    pub fn added_options(&self, record_type: RecordType, property: &str) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .added_options
            .iter()
            .filter(|(rt, name, _)| *rt == record_type && name == property)
            .flat_map(|(_, _, options)| options.clone())
            .collect()
    }

    pub fn search_calls(&self) -> u32 {
        self.inner.lock().unwrap().search_calls
    }
}

impl Default for FakeCrm {
    fn default() -> Self {
        Self::new()
    }
}

impl CrmApi for FakeCrm {
    async fn create_record(
        &self,
        _record_type: RecordType,
        payload: &RecordPayload,
    ) -> Result<CrmRecord, CrmError> {
        let mut state = self.inner.lock().unwrap();
        if let Some(error) = state.fail_create.take() {
            return Err(error);
        }
        state.next_id += 1;
        let record = CrmRecord {
            id: format!("crm-{}", state.next_id),
            properties: payload.properties.clone(),
        };
        state.created.push(record.clone());
        Ok(record)
    }

    async fn update_record(
        &self,
        _record_type: RecordType,
        id: &str,
        payload: &RecordPayload,
    ) -> Result<CrmRecord, CrmError> {
        let mut state = self.inner.lock().unwrap();
        state.updated.push((id.to_string(), payload.clone()));
        Ok(CrmRecord {
            id: id.to_string(),
            properties: payload.properties.clone(),
        })
    }

    async fn search_records(
        &self,
        _record_type: RecordType,
        query: &SearchQuery,
    ) -> Result<Vec<CrmRecord>, CrmError> {
        let mut state = self.inner.lock().unwrap();
        state.search_calls += 1;
        let ids = state
            .search_results
            .get(&(query.property.clone(), query.value.clone()))
            .cloned()
            .unwrap_or_default();
        Ok(ids
            .into_iter()
            .map(|id| CrmRecord {
                id,
                properties: serde_json::Map::new(),
            })
            .collect())
    }

    async fn associate(&self, request: &AssociationRequest) -> Result<(), CrmError> {
        self.inner.lock().unwrap().associations.push(request.clone());
        Ok(())
    }

    async fn list_properties(
        &self,
        record_type: RecordType,
    ) -> Result<Vec<PropertyDefinition>, CrmError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .properties
            .get(&record_type)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_property(
        &self,
        record_type: RecordType,
        definition: &PropertyDefinition,
    ) -> Result<(), CrmError> {
        let mut state = self.inner.lock().unwrap();
        state
            .properties
            .entry(record_type)
            .or_default()
            .push(definition.clone());
        state
            .created_properties
            .push((record_type, definition.clone()));
        Ok(())
    }

    async fn add_property_options(
        &self,
        record_type: RecordType,
        property: &str,
        options: &[String],
    ) -> Result<(), CrmError> {
        let mut state = self.inner.lock().unwrap();
        if let Some(def) = state
            .properties
            .get_mut(&record_type)
            .and_then(|defs| defs.iter_mut().find(|d| d.name == property))
        {
            def.options.extend(options.iter().cloned());
        }
        state
            .added_options
            .push((record_type, property.to_string(), options.to_vec()));
        Ok(())
    }

    async fn list_pipelines(&self) -> Result<Vec<Pipeline>, CrmError> {
        Ok(self.inner.lock().unwrap().pipelines.clone())
    }
}

// ---------------------------------------------------------------------------
// ScriptedTextGenerator
// ---------------------------------------------------------------------------

/// Text generator that replays a scripted sequence of responses.
pub struct ScriptedTextGenerator {
    responses: Mutex<VecDeque<Result<String, TextGenError>>>,
}

impl ScriptedTextGenerator {
    pub fn ok(response: &str) -> Self {
        Self::sequence(vec![Ok(response.to_string())])
    }

    pub fn err(error: TextGenError) -> Self {
        Self::sequence(vec![Err(error)])
    }

    pub fn sequence(items: Vec<Result<String, TextGenError>>) -> Self {
        Self {
            responses: Mutex::new(items.into()),
        }
    }
}

impl TextGenerator for ScriptedTextGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, TextGenError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TextGenError::Permanent("no scripted response".to_string())))
    }
}
