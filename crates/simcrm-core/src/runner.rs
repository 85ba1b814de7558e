//! Due-step runner and step state machine.
//!
//! A fixed-interval poll loop (immediate first tick) selects due steps --
//! status `pending`, schedule reached, owning job actively executable -- and
//! drives each through claim, content generation, reference resolution, and
//! execution. The atomic `pending -> processing` claim makes overlapping
//! poll passes safe: a step can only ever be claimed once.
//!
//! Failed steps are never requeued automatically. The explicit
//! `retry_failed_steps` operation re-queues `failed` (never
//! `failed_non_retryable`) steps with a bounded per-step attempt counter
//! and a backoff-shifted schedule.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use simcrm_types::config::EngineConfig;
use simcrm_types::error::{RepositoryError, StepError};
use simcrm_types::job::{ActionType, CorrelationId, Job, JobStatus, RecordType, Step, StepStatus};

use crate::clock::Clock;
use crate::context::JobContext;
use crate::crm::CrmApi;
use crate::executor::{CRM_PROVIDER, ExecutionOutcome, RecordExecutor};
use crate::generator::cache::ContentCache;
use crate::generator::{ContentGenerator, GeneratedPayload, GenerationRequest};
use crate::governor::RateGovernor;
use crate::repository::SimulationRepository;
use crate::resolver::ReferenceResolver;
use crate::textgen::TextGenerator;

/// Counters from one due-step pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Steps successfully claimed this pass.
    pub claimed: u32,
    /// Claimed steps that completed.
    pub completed: u32,
    /// Claimed steps that failed (either failure status).
    pub failed: u32,
    /// Due steps another pass claimed first.
    pub lost_claims: u32,
}

/// Drives step execution for all jobs.
pub struct StepRunner<R, C: CrmApi, G: TextGenerator, K> {
    repo: Arc<R>,
    crm: Arc<C>,
    governor: Arc<RateGovernor>,
    cache: Arc<ContentCache>,
    resolver: ReferenceResolver<C>,
    generator: ContentGenerator<G>,
    executor: RecordExecutor<C>,
    clock: Arc<K>,
    config: EngineConfig,
}

impl<R, C, G, K> StepRunner<R, C, G, K>
where
    R: SimulationRepository,
    C: CrmApi,
    G: TextGenerator,
    K: Clock + 'static,
{
    pub fn new(
        repo: Arc<R>,
        crm: Arc<C>,
        textgen: Arc<G>,
        clock: Arc<K>,
        config: EngineConfig,
    ) -> Self {
        let governor = Arc::new(RateGovernor::new(config.governor.clone()));
        let cache = Arc::new(ContentCache::new(
            config.cache_ttl_secs,
            clock.clone() as Arc<dyn Clock>,
        ));
        let resolver =
            ReferenceResolver::new(crm.clone(), governor.clone(), config.strict_references);
        let generator = ContentGenerator::new(
            textgen,
            cache.clone(),
            governor.clone(),
            config.strict_generation,
        );
        let executor = RecordExecutor::new(crm.clone(), governor.clone(), config.deduplicate_creates);
        Self {
            repo,
            crm,
            governor,
            cache,
            resolver,
            generator,
            executor,
            clock,
            config,
        }
    }

    /// Shared governor (stats inspection, test isolation).
    pub fn governor(&self) -> &Arc<RateGovernor> {
        &self.governor
    }

    /// Shared content cache (test isolation).
    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    // -----------------------------------------------------------------------
    // Poll loop
    // -----------------------------------------------------------------------

    /// Spawn the fixed-interval poll loop. The first pass runs immediately;
    /// the loop stops when `cancel` fires. Cancellation only prevents new
    /// claims -- an in-flight pass finishes its current step.
    pub fn spawn_poll_loop(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()>
    where
        R: 'static,
        C: 'static,
        G: 'static,
    {
        let runner = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                runner.config.poll_interval_secs.max(1),
            ));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("due-step poll loop stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        match runner.run_due_pass().await {
                            Ok(summary) if summary.claimed > 0 => {
                                tracing::info!(
                                    claimed = summary.claimed,
                                    completed = summary.completed,
                                    failed = summary.failed,
                                    "due-step pass finished"
                                );
                            }
                            Ok(_) => {}
                            Err(error) => {
                                tracing::error!(%error, "due-step pass failed");
                            }
                        }
                    }
                }
            }
        })
    }

    /// Run one due-step pass: select, claim, execute.
    pub async fn run_due_pass(&self) -> Result<PassSummary, RepositoryError> {
        let now = self.clock.now();
        let due = self.repo.due_steps(now, self.config.poll_batch_size).await?;
        let mut summary = PassSummary::default();

        for step in due {
            if !self.repo.claim_step(&step.id).await? {
                // Another pass got there first; nothing to undo.
                summary.lost_claims += 1;
                continue;
            }
            summary.claimed += 1;
            if self.execute_claimed_step(&step).await? {
                summary.completed += 1;
            } else {
                summary.failed += 1;
            }
        }
        Ok(summary)
    }

    /// Execute a claimed step and persist its terminal status. Returns
    /// whether the step completed. Only storage errors propagate.
    async fn execute_claimed_step(&self, step: &Step) -> Result<bool, RepositoryError> {
        let correlation = CorrelationId::new(step.job_id, step.step_index);

        let Some(job) = self.repo.get_job(&step.job_id).await? else {
            let result = json!({ "error": "owning job not found" });
            self.repo
                .fail_step(&step.id, StepStatus::FailedNonRetryable, &result)
                .await?;
            tracing::error!(correlation = %correlation, "step has no owning job");
            return Ok(false);
        };

        if job.status == JobStatus::Pending {
            self.repo
                .update_job_status(&job.id, JobStatus::Processing)
                .await?;
        }

        match self.run_step_pipeline(&job, step).await {
            Ok(outcome) => {
                // A freshly created record's real id enters the job context
                // under the step's symbolic id.
                if step.action_type == ActionType::Create {
                    if let (Some(symbol), Some(record_id)) =
                        (&step.record_id_template, &outcome.record_id)
                    {
                        self.repo
                            .put_context_entry(&step.job_id, symbol, record_id)
                            .await?;
                    }
                }
                self.repo.complete_step(&step.id, &outcome.summary).await?;
                tracing::info!(
                    correlation = %correlation,
                    record_id = outcome.record_id.as_deref().unwrap_or("-"),
                    deduplicated = outcome.deduplicated,
                    "step completed"
                );

                if !self.repo.has_unsettled_steps(&step.job_id).await? {
                    self.repo
                        .update_job_status(&step.job_id, JobStatus::Completed)
                        .await?;
                    tracing::info!(job_id = %step.job_id, "job completed");
                }
                Ok(true)
            }
            Err(error) => {
                let status = if error.is_retryable() {
                    StepStatus::Failed
                } else {
                    StepStatus::FailedNonRetryable
                };
                let result = json!({
                    "error": error.to_string(),
                    "retryable": error.is_retryable(),
                });
                self.repo.fail_step(&step.id, status, &result).await?;
                tracing::warn!(
                    correlation = %correlation,
                    %error,
                    status = status.as_str(),
                    "step failed"
                );
                Ok(false)
            }
        }
    }

    /// Generate content, resolve references, and execute one step.
    async fn run_step_pipeline(
        &self,
        job: &Job,
        step: &Step,
    ) -> Result<ExecutionOutcome, StepError> {
        let correlation = CorrelationId::new(step.job_id, step.step_index);

        // Valid pipeline/stage ids keep generated deals honest
        let pipelines = if step.record_type == RecordType::Deal {
            self.governor
                .execute(CRM_PROVIDER, || self.crm.list_pipelines())
                .await?
        } else {
            Vec::new()
        };

        // Associate actions carry no generated fields; their payload is the
        // raw template (used at most for fallback search keys).
        let payload = if step.action_type == ActionType::Associate {
            GeneratedPayload::Fallback(
                step.action_template
                    .clone()
                    .unwrap_or(Value::Object(serde_json::Map::new())),
            )
        } else {
            self.generator
                .generate(&GenerationRequest {
                    correlation,
                    action_type: step.action_type,
                    record_type: step.record_type,
                    theme: &job.theme,
                    industry: &job.industry,
                    pipelines: &pipelines,
                    fallback: step.action_template.as_ref(),
                })
                .await?
        };

        let entries = self.repo.get_context(&step.job_id).await?;
        let context = JobContext::new(step.job_id, entries);
        let resolved = self.resolver.resolve(step, &payload, &context).await?;

        // Ids discovered through search fallback go into the context right
        // away so later steps reuse them without re-searching.
        for (symbol, real_id) in &resolved.discovered {
            self.repo
                .put_context_entry(&step.job_id, symbol, real_id)
                .await?;
        }

        self.executor.execute(step, &payload, &resolved).await
    }

    // -----------------------------------------------------------------------
    // Control surface
    // -----------------------------------------------------------------------

    /// Pause a job: all `pending` steps become `paused`; steps already
    /// `processing` or terminal are untouched.
    pub async fn pause_job(&self, job_id: &Uuid) -> Result<u64, RepositoryError> {
        let moved = self
            .repo
            .bulk_transition_steps(job_id, &[StepStatus::Pending], StepStatus::Paused)
            .await?;
        self.repo.update_job_status(job_id, JobStatus::Paused).await?;
        tracing::info!(%job_id, moved, "job paused");
        Ok(moved)
    }

    /// Resume a paused job: exactly reverses `pause_job`.
    pub async fn resume_job(&self, job_id: &Uuid) -> Result<u64, RepositoryError> {
        let moved = self
            .repo
            .bulk_transition_steps(job_id, &[StepStatus::Paused], StepStatus::Pending)
            .await?;
        self.repo
            .update_job_status(job_id, JobStatus::Processing)
            .await?;
        tracing::info!(%job_id, moved, "job resumed");
        Ok(moved)
    }

    /// Stop a job: `pending` and `paused` steps become `cancelled`, the job
    /// is marked `stopped`. In-flight steps are not aborted; the due-step
    /// query stops selecting the job's steps the moment its status changes.
    pub async fn stop_job(&self, job_id: &Uuid) -> Result<u64, RepositoryError> {
        let moved = self
            .repo
            .bulk_transition_steps(
                job_id,
                &[StepStatus::Pending, StepStatus::Paused],
                StepStatus::Cancelled,
            )
            .await?;
        self.repo.update_job_status(job_id, JobStatus::Stopped).await?;
        tracing::info!(%job_id, moved, "job stopped");
        Ok(moved)
    }

    /// Re-queue a job's `failed` steps whose attempt counter has not passed
    /// `step_retry_limit`, shifting each schedule forward by
    /// `step_retry_backoff_secs * 2^(attempt-1)`. `failed_non_retryable`
    /// steps are never eligible. Re-activates the job when anything was
    /// requeued.
    pub async fn retry_failed_steps(&self, job_id: &Uuid) -> Result<u32, RepositoryError> {
        let failed = self
            .repo
            .list_steps_by_status(job_id, StepStatus::Failed)
            .await?;
        let now = self.clock.now();
        let mut requeued = 0;

        for step in failed {
            if step.attempt > self.config.step_retry_limit {
                tracing::debug!(
                    correlation = %CorrelationId::new(step.job_id, step.step_index),
                    attempt = step.attempt,
                    "retry limit reached, leaving step failed"
                );
                continue;
            }
            let shift = self.config.step_retry_backoff_secs
                * 2u64.saturating_pow(step.attempt.saturating_sub(1));
            let scheduled_at = now + chrono::Duration::seconds(shift as i64);
            if self.repo.requeue_failed_step(&step.id, scheduled_at).await? {
                requeued += 1;
            }
        }

        if requeued > 0 {
            self.repo
                .update_job_status(job_id, JobStatus::Processing)
                .await?;
            tracing::info!(%job_id, requeued, "failed steps requeued");
        }
        Ok(requeued)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
