//! Engine configuration.
//!
//! `EngineConfig` is loaded from `simcrm.toml` by the infrastructure layer.
//! All fields have defaults so a missing or partial file still yields a
//! runnable engine.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the simulation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Due-step poll interval in seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Maximum steps claimed per poll pass.
    #[serde(default = "default_poll_batch_size")]
    pub poll_batch_size: u32,

    /// Fail reference resolution instead of falling back to search.
    #[serde(default)]
    pub strict_references: bool,

    /// Fail content generation on parse/validation trouble instead of
    /// falling back to the step's template payload.
    #[serde(default)]
    pub strict_generation: bool,

    /// Search the CRM for an existing record before creating one.
    #[serde(default = "default_true")]
    pub deduplicate_creates: bool,

    /// Maximum re-queues of a `failed` step via `retry_failed_steps`.
    #[serde(default = "default_step_retry_limit")]
    pub step_retry_limit: u32,

    /// Base backoff in seconds applied when re-queueing a failed step.
    #[serde(default = "default_step_retry_backoff_secs")]
    pub step_retry_backoff_secs: u64,

    /// Rate limiter / concurrency governor settings.
    #[serde(default)]
    pub governor: GovernorConfig,

    /// Content cache time-to-live in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

/// Settings for the rate limiter / concurrency governor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// Global ceiling on concurrent external calls, shared across providers.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Maximum attempts per governed call (shared by rate-limit and
    /// transient retries).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay for exponential backoff, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on any computed delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Jitter fraction added to delays (0.25 = up to +25%).
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Timeout applied to each individual external call, in seconds.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_poll_batch_size() -> u32 {
    25
}

fn default_true() -> bool {
    true
}

fn default_step_retry_limit() -> u32 {
    3
}

fn default_step_retry_backoff_secs() -> u64 {
    300
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_max_concurrency() -> usize {
    8
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter() -> f64 {
    0.25
}

fn default_call_timeout_secs() -> u64 {
    60
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            poll_batch_size: default_poll_batch_size(),
            strict_references: false,
            strict_generation: false,
            deduplicate_creates: true,
            step_retry_limit: default_step_retry_limit(),
            step_retry_backoff_secs: default_step_retry_backoff_secs(),
            governor: GovernorConfig::default(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}
