//! Job and step domain types.
//!
//! A `Job` is one simulation run: an ordered set of `Step`s plus a context
//! map from symbolic record ids to real CRM ids. Steps are created by the
//! planner with absolute schedule times and driven through their status
//! lifecycle by the runner.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// UUIDv7 assigned at planning time.
    pub id: Uuid,
    /// Outcome tag for the simulated narrative (e.g. "closed_won").
    pub outcome: String,
    /// Content theme (e.g. "enterprise software evaluation").
    pub theme: String,
    /// Industry label woven into generated content.
    pub industry: String,
    /// Sequence number of this job within its owning simulation series.
    pub sequence: u32,
    /// Identifier of the timing template this job was planned from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    /// Owning user id, substituted into template placeholders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// Ratio applied to the template's relative days (target / base cycle).
    pub scaling_factor: f64,
    /// The template's base cycle length in days.
    pub base_cycle_days: f64,
    /// Absolute start of the job's schedule.
    pub started_at: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

/// Lifecycle status of a job.
///
/// `Pending` and `Processing` are the actively-executable states: only steps
/// whose owning job is in one of them are eligible for the due-step poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Paused,
    Stopped,
    Completed,
}

impl JobStatus {
    /// Whether steps of a job in this status may be picked up for execution.
    pub fn is_executable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }

    /// Stable string form used in persistence and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Paused => "paused",
            JobStatus::Stopped => "stopped",
            JobStatus::Completed => "completed",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "paused" => Ok(JobStatus::Paused),
            "stopped" => Ok(JobStatus::Stopped),
            "completed" => Ok(JobStatus::Completed),
            other => Err(format!("invalid job status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// One scheduled action within a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// UUIDv7 assigned at planning time.
    pub id: Uuid,
    /// Owning job.
    pub job_id: Uuid,
    /// Execution order within the job, assigned after scaled-day sorting.
    pub step_index: u32,
    /// Relative day from the source template row.
    pub template_day: f64,
    /// Day offset after scaling; steps are stored sorted by this field.
    pub scaled_day: f64,
    /// Absolute time the step becomes due.
    pub scheduled_at: DateTime<Utc>,
    /// What the step does.
    pub action_type: ActionType,
    /// The CRM record type the step operates on.
    pub record_type: RecordType,
    /// Symbolic id this step mints when it creates a record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id_template: Option<String>,
    /// Nested target-type -> symbolic id(s) structure, resolved at run time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associations_template: Option<Value>,
    /// Raw content hints passed to the generator as a fallback payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_template: Option<Value>,
    /// Free-text rationale for the action, substituted at planning time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_template: Option<String>,
    /// Current lifecycle status.
    pub status: StepStatus,
    /// Number of execution attempts so far (first run is attempt 1).
    pub attempt: u32,
    /// Outcome payload or error info, set when the step leaves `processing`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// What a step does against the CRM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Create,
    Update,
    Associate,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Create => "create",
            ActionType::Update => "update",
            ActionType::Associate => "associate",
        }
    }
}

impl std::str::FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(ActionType::Create),
            "update" => Ok(ActionType::Update),
            "associate" => Ok(ActionType::Associate),
            other => Err(format!("invalid action type: '{other}'")),
        }
    }
}

/// CRM record families the simulator works with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Contact,
    Company,
    Deal,
    Note,
    Task,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Contact => "contact",
            RecordType::Company => "company",
            RecordType::Deal => "deal",
            RecordType::Note => "note",
            RecordType::Task => "task",
        }
    }
}

impl std::str::FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contact" => Ok(RecordType::Contact),
            "company" => Ok(RecordType::Company),
            "deal" => Ok(RecordType::Deal),
            "note" => Ok(RecordType::Note),
            "task" => Ok(RecordType::Task),
            other => Err(format!("invalid record type: '{other}'")),
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a step.
///
/// Forward-only: `pending -> processing -> {completed, failed,
/// failed_non_retryable}`, plus the explicit control transitions
/// `pending <-> paused` and `pending|paused -> cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    FailedNonRetryable,
    Paused,
    Cancelled,
}

impl StepStatus {
    /// Whether the step has reached a state it will never leave.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed
                | StepStatus::Failed
                | StepStatus::FailedNonRetryable
                | StepStatus::Cancelled
        )
    }

    /// Stable string form used in persistence and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Processing => "processing",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::FailedNonRetryable => "failed_non_retryable",
            StepStatus::Paused => "paused",
            StepStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StepStatus::Pending),
            "processing" => Ok(StepStatus::Processing),
            "completed" => Ok(StepStatus::Completed),
            "failed" => Ok(StepStatus::Failed),
            "failed_non_retryable" => Ok(StepStatus::FailedNonRetryable),
            "paused" => Ok(StepStatus::Paused),
            "cancelled" => Ok(StepStatus::Cancelled),
            other => Err(format!("invalid step status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Correlation id
// ---------------------------------------------------------------------------

/// Correlation id attached to every step-level log line and error:
/// the owning job id plus the step index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationId {
    pub job_id: Uuid,
    pub step_index: u32,
}

impl CorrelationId {
    pub fn new(job_id: Uuid, step_index: u32) -> Self {
        Self { job_id, step_index }
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.job_id, self.step_index)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
