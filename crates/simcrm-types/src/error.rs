//! Error taxonomy for the simulation engine.
//!
//! The split matters operationally: errors that will never succeed on blind
//! retry (planning, reference, generation, validation, permanent CRM
//! rejections) are kept distinct from transient external failures, and the
//! runner persists them under `failed_non_retryable` so outside retry logic
//! can tell the two apart.

use thiserror::Error;

use crate::job::CorrelationId;

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Fatal planning failures. A job is never created when one of these occurs.
#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("timing template is empty")]
    EmptyTemplate,

    #[error("invalid base cycle length: {0} days")]
    InvalidBaseCycle(f64),

    #[error("invalid relative day: {0}")]
    InvalidRelativeDay(f64),

    #[error("invalid target cycle length: {0} days")]
    InvalidTargetCycle(f64),

    #[error("template parse error at line {line}: {message}")]
    TemplateParse { line: usize, message: String },

    #[error("invalid record count target: {0}")]
    InvalidRecordCount(u32),
}

// ---------------------------------------------------------------------------
// Reference resolution
// ---------------------------------------------------------------------------

/// Failures resolving a symbolic id to a real CRM id. Non-retryable.
#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("[{correlation}] unresolved reference '{token}'")]
    NotFound {
        correlation: CorrelationId,
        token: String,
    },

    /// More than one CRM record matched the inferred natural key. Distinct
    /// from `NotFound`: the resolver must not pick a candidate silently.
    #[error("[{correlation}] ambiguous reference '{token}': {candidates} matches")]
    Ambiguous {
        correlation: CorrelationId,
        token: String,
        candidates: usize,
    },
}

// ---------------------------------------------------------------------------
// Content generation and validation
// ---------------------------------------------------------------------------

/// Failures in the generate/parse/validate pipeline. Non-retryable.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("[{correlation}] text generation failed: {message}")]
    Service {
        correlation: CorrelationId,
        message: String,
    },

    #[error("[{correlation}] generated output is not valid JSON: {message}")]
    Parse {
        correlation: CorrelationId,
        message: String,
    },

    #[error("[{correlation}] generated output failed validation after repair: {source}")]
    InvalidAfterRepair {
        correlation: CorrelationId,
        source: ValidationError,
    },
}

/// Structural/field validation failures, independent of generation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("missing required field '{field}'")]
    MissingField { field: String },

    #[error("field '{field}' is invalid: {message}")]
    InvalidField { field: String, message: String },

    #[error("unknown record type tag '{tag}'")]
    UnknownRecordType { tag: String },

    #[error("stage '{stage}' is not a valid stage of pipeline '{pipeline}'")]
    UnknownStage { pipeline: String, stage: String },
}

// ---------------------------------------------------------------------------
// External CRM API
// ---------------------------------------------------------------------------

/// Failures from the external CRM API, classified for the governor.
#[derive(Debug, Error)]
pub enum CrmError {
    /// The provider signalled a rate limit, optionally with a Retry-After.
    #[error("rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    /// Server-side or network trouble that may succeed on retry.
    #[error("transient CRM error: {0}")]
    Transient(String),

    /// Malformed request, permission denial, or another failure that will
    /// not change on retry.
    #[error("permanent CRM error: {0}")]
    Permanent(String),
}

/// Failures from the generative text service, same classification.
#[derive(Debug, Error)]
pub enum TextGenError {
    #[error("rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("transient text service error: {0}")]
    Transient(String),

    #[error("permanent text service error: {0}")]
    Permanent(String),
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Errors from repository operations (trait definitions live in simcrm-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

// ---------------------------------------------------------------------------
// Step-level umbrella
// ---------------------------------------------------------------------------

/// Any failure while executing one step. The runner uses `is_retryable`
/// to decide between `failed` and `failed_non_retryable`.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Crm(#[from] CrmError),

    #[error(transparent)]
    TextGen(#[from] TextGenError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl StepError {
    /// Whether a blind retry of the step could ever succeed.
    ///
    /// Reference, generation, and validation failures are deterministic, and
    /// permanent external rejections will repeat; everything else (rate
    /// limits, transient faults, storage trouble) may clear up.
    pub fn is_retryable(&self) -> bool {
        match self {
            StepError::Reference(_) | StepError::Generation(_) | StepError::Validation(_) => false,
            StepError::Crm(CrmError::Permanent(_)) => false,
            StepError::TextGen(TextGenError::Permanent(_)) => false,
            StepError::Crm(_) | StepError::TextGen(_) | StepError::Repository(_) => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
