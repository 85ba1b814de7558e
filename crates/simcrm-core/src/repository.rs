//! Simulation repository trait definition.
//!
//! Covers three entity families:
//! - **Jobs:** atomic job+steps creation, status updates, lookups.
//! - **Steps:** the due-step poll query, the atomic claim, terminal
//!   transitions, bulk control-surface mutations.
//! - **Context:** the per-job symbolic id -> real id map.
//!
//! The infrastructure layer implements this trait with SQLite persistence.
//! Uses native async fn in traits (Rust 2024 edition, no async_trait macro).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use simcrm_types::error::RepositoryError;
use simcrm_types::job::{Job, JobStatus, Step, StepStatus};
use uuid::Uuid;

pub trait SimulationRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Jobs
    // -----------------------------------------------------------------------

    /// Persist a job together with all of its steps atomically.
    fn create_job_with_steps(
        &self,
        job: &Job,
        steps: &[Step],
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a job by its UUID.
    fn get_job(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Job>, RepositoryError>> + Send;

    /// Set a job's status.
    fn update_job_status(
        &self,
        id: &Uuid,
        status: JobStatus,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    /// Select up to `limit` due steps: status `pending`, `scheduled_at <=
    /// now`, and owning job in an actively-executable status. The job-status
    /// filter is part of the query itself, not a post-fetch check, so a
    /// concurrent stop cannot race a poll pass into picking up its steps.
    fn due_steps(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Step>, RepositoryError>> + Send;

    /// Atomically claim a step: `pending -> processing`, incrementing its
    /// attempt counter. Returns `false` without any state change when the
    /// step is no longer `pending` (another poll pass got there first).
    fn claim_step(
        &self,
        step_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Record a successful step: status `completed` plus the result payload.
    fn complete_step(
        &self,
        step_id: &Uuid,
        result: &Value,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Record a failed step under `failed` or `failed_non_retryable`.
    fn fail_step(
        &self,
        step_id: &Uuid,
        status: StepStatus,
        result: &Value,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Re-queue a `failed` step for another run at `scheduled_at`. Guarded on
    /// the current status being `failed`; returns `false` otherwise.
    fn requeue_failed_step(
        &self,
        step_id: &Uuid,
        scheduled_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// List all steps of a job ordered by step index.
    fn list_steps(
        &self,
        job_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Step>, RepositoryError>> + Send;

    /// List a job's steps currently in `status`, ordered by step index.
    fn list_steps_by_status(
        &self,
        job_id: &Uuid,
        status: StepStatus,
    ) -> impl std::future::Future<Output = Result<Vec<Step>, RepositoryError>> + Send;

    /// Move every step of a job whose status is in `from` to `to`, returning
    /// the number of steps changed. Used by pause/resume/stop; never touches
    /// `processing` or terminal steps because callers never name them in
    /// `from`.
    fn bulk_transition_steps(
        &self,
        job_id: &Uuid,
        from: &[StepStatus],
        to: StepStatus,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Whether the job still has steps in `pending`, `processing`, or
    /// `paused`.
    fn has_unsettled_steps(
        &self,
        job_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Context
    // -----------------------------------------------------------------------

    /// Upsert one symbolic id -> real id entry. Writing the same symbol
    /// twice overwrites; entries are never removed.
    fn put_context_entry(
        &self,
        job_id: &Uuid,
        symbol: &str,
        real_id: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Fetch the full context map of a job.
    fn get_context(
        &self,
        job_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<HashMap<String, String>, RepositoryError>> + Send;
}
