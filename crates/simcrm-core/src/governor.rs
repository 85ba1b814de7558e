//! Rate limiter / concurrency governor for external calls.
//!
//! Every CRM and text-service call goes through [`RateGovernor::execute`]:
//! - a single global concurrency ceiling shared across all providers
//!   (waiting tasks park on the semaphore, no busy spin),
//! - per-provider bookkeeping (in-flight, totals, rate-limit hits,
//!   consecutive errors, last rate-limit reset),
//! - exponential backoff with jitter, honoring provider-supplied
//!   Retry-After durations, capped at a maximum delay,
//! - one retry budget shared by rate-limit and transient failures,
//! - a per-call timeout.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use tokio::sync::Semaphore;

use simcrm_types::config::GovernorConfig;
use simcrm_types::error::{CrmError, TextGenError};

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// How a provider failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The provider asked us to slow down; retry after a delay.
    RateLimit,
    /// May succeed on retry (5xx, network trouble, timeout).
    Transient,
    /// Will not change on retry; propagate immediately.
    Permanent,
}

/// Errors the governor can classify and retry.
pub trait GovernedError: std::fmt::Display {
    fn classify(&self) -> FailureClass;

    /// Provider-supplied delay hint, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }

    /// The error to report when the per-call timeout fires.
    fn timed_out() -> Self;
}

impl GovernedError for CrmError {
    fn classify(&self) -> FailureClass {
        match self {
            CrmError::RateLimited { .. } => FailureClass::RateLimit,
            CrmError::Transient(_) => FailureClass::Transient,
            CrmError::Permanent(_) => FailureClass::Permanent,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CrmError::RateLimited {
                retry_after_ms: Some(ms),
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }

    fn timed_out() -> Self {
        CrmError::Transient("call timed out".to_string())
    }
}

impl GovernedError for TextGenError {
    fn classify(&self) -> FailureClass {
        match self {
            TextGenError::RateLimited { .. } => FailureClass::RateLimit,
            TextGenError::Transient(_) => FailureClass::Transient,
            TextGenError::Permanent(_) => FailureClass::Permanent,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            TextGenError::RateLimited {
                retry_after_ms: Some(ms),
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }

    fn timed_out() -> Self {
        TextGenError::Transient("call timed out".to_string())
    }
}

// ---------------------------------------------------------------------------
// Provider stats
// ---------------------------------------------------------------------------

/// Per-provider bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct ProviderStats {
    /// Requests currently in flight.
    pub active: u32,
    /// Total requests attempted.
    pub total_requests: u64,
    /// Rate-limit signals received.
    pub rate_limit_hits: u64,
    /// Consecutive failed attempts; reset on success.
    pub consecutive_errors: u32,
    /// When the most recent rate-limit window is expected to reset.
    pub last_rate_limit_reset: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// RateGovernor
// ---------------------------------------------------------------------------

/// Constructed once and shared (`Arc`) by everything that talks to the
/// outside world.
pub struct RateGovernor {
    slots: Semaphore,
    stats: DashMap<String, ProviderStats>,
    config: GovernorConfig,
}

impl RateGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            slots: Semaphore::new(config.max_concurrency),
            stats: DashMap::new(),
            config,
        }
    }

    /// Snapshot of a provider's stats.
    pub fn stats(&self, provider: &str) -> ProviderStats {
        self.stats
            .get(provider)
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Clear all per-provider counters (test isolation).
    pub fn reset(&self) {
        self.stats.clear();
    }

    /// Number of currently free slots under the global ceiling.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Compute the delay before retry attempt `attempt` (0-based).
    ///
    /// With a provider hint the delay is `hint + jitter*hint`; otherwise
    /// `base * 2^attempt + jitter * that`. Both are capped at
    /// `max_delay_ms`.
    pub fn backoff_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let base_ms = match retry_after {
            Some(hint) => hint.as_millis() as u64,
            None => self
                .config
                .base_delay_ms
                .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX)),
        };
        let jitter_fraction = rand::thread_rng().gen_range(0.0..=self.config.jitter);
        let jittered = base_ms as f64 * (1.0 + jitter_fraction);
        Duration::from_millis((jittered as u64).min(self.config.max_delay_ms))
    }

    /// Run `op` under the global concurrency ceiling with retries.
    ///
    /// The slot is held for the whole attempt sequence and released exactly
    /// once on every exit path (permit drop). Rate-limit and transient
    /// failures share the `max_attempts` budget; permanent failures
    /// propagate immediately; exhausting the budget propagates the last
    /// error.
    pub async fn execute<T, E, F, Fut>(&self, provider: &str, op: F) -> Result<T, E>
    where
        E: GovernedError,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _permit = self
            .slots
            .acquire()
            .await
            .expect("governor semaphore is never closed");

        let timeout = Duration::from_secs(self.config.call_timeout_secs);
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error: Option<E> = None;

        for attempt in 0..max_attempts {
            self.on_attempt_start(provider);
            let outcome = match tokio::time::timeout(timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(E::timed_out()),
            };
            self.on_attempt_end(provider);

            let error = match outcome {
                Ok(value) => {
                    self.on_success(provider);
                    return Ok(value);
                }
                Err(e) => e,
            };

            let class = error.classify();
            if class == FailureClass::Permanent {
                tracing::warn!(provider, error = %error, "permanent provider error");
                return Err(error);
            }

            let delay = self.backoff_delay(attempt, error.retry_after());
            self.on_failure(provider, class, delay);

            tracing::debug!(
                provider,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "provider call failed, backing off"
            );
            last_error = Some(error);

            // Don't sleep after the final attempt
            if attempt + 1 < max_attempts {
                tokio::time::sleep(delay).await;
            }
        }

        tracing::warn!(provider, attempts = max_attempts, "retry budget exhausted");
        Err(last_error.expect("at least one attempt always runs"))
    }

    fn on_attempt_start(&self, provider: &str) {
        let mut stats = self.stats.entry(provider.to_string()).or_default();
        stats.active += 1;
        stats.total_requests += 1;
    }

    fn on_attempt_end(&self, provider: &str) {
        if let Some(mut stats) = self.stats.get_mut(provider) {
            stats.active = stats.active.saturating_sub(1);
        }
    }

    fn on_success(&self, provider: &str) {
        if let Some(mut stats) = self.stats.get_mut(provider) {
            stats.consecutive_errors = 0;
        }
    }

    fn on_failure(&self, provider: &str, class: FailureClass, delay: Duration) {
        let mut stats = self.stats.entry(provider.to_string()).or_default();
        stats.consecutive_errors += 1;
        if class == FailureClass::RateLimit {
            stats.rate_limit_hits += 1;
            stats.last_rate_limit_reset =
                Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config() -> GovernorConfig {
        GovernorConfig {
            max_concurrency: 4,
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            jitter: 0.25,
            call_timeout_secs: 5,
        }
    }

    // -------------------------------------------------------------------
    // Backoff bounds
    // -------------------------------------------------------------------

    #[test]
    fn test_backoff_within_bounds() {
        let governor = RateGovernor::new(config());
        for attempt in 0..5u32 {
            for _ in 0..50 {
                let delay = governor.backoff_delay(attempt, None).as_millis() as u64;
                let base = 100u64 << attempt;
                let upper = (base as f64 * 1.25).ceil() as u64;
                assert!(
                    delay >= base && delay <= upper.min(10_000),
                    "attempt {attempt}: delay {delay} outside [{base}, {upper}]"
                );
            }
        }
    }

    #[test]
    fn test_backoff_uses_retry_after_hint() {
        let governor = RateGovernor::new(config());
        let delay = governor
            .backoff_delay(0, Some(Duration::from_millis(2000)))
            .as_millis() as u64;
        assert!(delay >= 2000 && delay <= 2500, "delay {delay}");
    }

    #[test]
    fn test_backoff_capped_at_max() {
        let governor = RateGovernor::new(config());
        // 100 * 2^10 = 102_400 > cap of 10_000
        let delay = governor.backoff_delay(10, None);
        assert_eq!(delay.as_millis() as u64, 10_000);
    }

    // -------------------------------------------------------------------
    // Retry behavior
    // -------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let governor = RateGovernor::new(config());
        let calls = Arc::new(AtomicU32::new(0));

        let calls_clone = calls.clone();
        let result: Result<(), CrmError> = governor
            .execute("crm", move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(CrmError::Permanent("403 forbidden".to_string()))
                }
            })
            .await;

        assert!(matches!(result, Err(CrmError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_retried_until_success() {
        let governor = RateGovernor::new(config());
        let calls = Arc::new(AtomicU32::new(0));

        let calls_clone = calls.clone();
        let result: Result<u32, CrmError> = governor
            .execute("crm", move || {
                let calls = calls_clone.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(CrmError::Transient("503".to_string()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_returns_last_error() {
        let governor = RateGovernor::new(config());
        let calls = Arc::new(AtomicU32::new(0));

        let calls_clone = calls.clone();
        let result: Result<(), CrmError> = governor
            .execute("crm", move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(CrmError::RateLimited {
                        retry_after_ms: Some(50),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(CrmError::RateLimited { .. })));
        // max_attempts, shared budget
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_converted_to_transient_and_retried() {
        let mut cfg = config();
        cfg.call_timeout_secs = 1;
        let governor = RateGovernor::new(cfg);
        let calls = Arc::new(AtomicU32::new(0));

        let calls_clone = calls.clone();
        let result: Result<u32, CrmError> = governor
            .execute("crm", move || {
                let calls = calls_clone.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        // First attempt hangs past the 1s call timeout
                        tokio::time::sleep(Duration::from_secs(10)).await;
                    }
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    // -------------------------------------------------------------------
    // Concurrency ceiling
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_global_ceiling_bounds_parallelism() {
        let mut cfg = config();
        cfg.max_concurrency = 2;
        let governor = Arc::new(RateGovernor::new(cfg));

        let active = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let governor = governor.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let result: Result<(), CrmError> = governor
                    .execute("crm", move || {
                        let active = active.clone();
                        let peak = peak.clone();
                        async move {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        }
                    })
                    .await;
                result.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(
            peak.load(Ordering::SeqCst) <= 2,
            "ceiling exceeded: {}",
            peak.load(Ordering::SeqCst)
        );
        // All slots returned
        assert_eq!(governor.available_slots(), 2);
    }

    // -------------------------------------------------------------------
    // Stats
    // -------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_stats_tracking() {
        let governor = RateGovernor::new(config());
        let calls = Arc::new(AtomicU32::new(0));

        let calls_clone = calls.clone();
        let _result: Result<(), CrmError> = governor
            .execute("crm", move || {
                let calls = calls_clone.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        Err(CrmError::RateLimited {
                            retry_after_ms: None,
                        })
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        let stats = governor.stats("crm");
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.rate_limit_hits, 1);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.consecutive_errors, 0);
        assert!(stats.last_rate_limit_reset.is_some());

        governor.reset();
        assert_eq!(governor.stats("crm").total_requests, 0);
    }
}
