//! Retry/backoff for external-dependency and persistent-storage calls.
//! Retries a plain `Future<Output = Result<T>>` rather than an HTTP
//! response, so it covers LLM client calls, embedding calls, and storage
//! calls uniformly. Uses the §7 defaults (base 100 ms, factor 2, cap 5
//! attempts, jitter ±20%).

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            jitter_fraction: 0.2,
        }
    }
}

impl RetryConfig {
    pub fn from_notification_config(config: &coach_core::NotificationConfig) -> Self {
        Self {
            max_attempts: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            backoff_factor: config.retry_backoff_factor,
            jitter_fraction: config.retry_jitter_fraction,
        }
    }
}

/// Retry `operation` with exponential backoff and jitter until it succeeds
/// or `max_attempts` is exhausted. The closure decides per-error whether a
/// failure is retryable via `is_retryable`; non-retryable errors return
/// immediately.
pub async fn with_retry<T, E, F, Fut>(
    config: &RetryConfig,
    label: &str,
    is_retryable: impl Fn(&E) -> bool,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = config.base_delay;
    let mut last_error = None;

    for attempt in 1..=config.max_attempts {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(label, attempt, "retry succeeded");
                }
                return Ok(value);
            }
            Err(e) if !is_retryable(&e) => return Err(e),
            Err(e) => {
                tracing::warn!(label, attempt, max_attempts = config.max_attempts, error = %e, "retryable failure");
                last_error = Some(e);
            }
        }

        if attempt < config.max_attempts {
            let jitter_range = (delay.as_secs_f64() * config.jitter_fraction).max(0.0);
            let jitter_secs = rand::rng().random_range(-jitter_range..=jitter_range);
            let sleep_secs = (delay.as_secs_f64() + jitter_secs).max(0.0);
            tokio::time::sleep(Duration::from_secs_f64(sleep_secs)).await;
            delay = Duration::from_secs_f64(
                (delay.as_secs_f64() * config.backoff_factor).min(config.max_delay.as_secs_f64()),
            );
        }
    }

    Err(last_error.expect("at least one attempt always runs"))
}
