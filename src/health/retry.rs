use super::classify::classify_error;
use super::tracker::ServiceHealthTracker;
use super::{ErrorCategory, HealthError};
use serde_json::json;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_millis(2_000),
        }
    }
}

/// Delay before retrying after failed attempt `attempt` (1-based): the base
/// delay doubled per attempt, capped at the policy maximum.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let factor = 1u32 << exponent;
    policy
        .base_delay
        .checked_mul(factor)
        .unwrap_or(policy.max_delay)
        .min(policy.max_delay)
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("service `{service}` is unavailable")]
    Unavailable { service: String },
    #[error("service `{service}` failed with a {category} error: {message}")]
    NonRetryable {
        service: String,
        category: ErrorCategory,
        message: String,
    },
    #[error("service `{service}` still failing after {attempts} attempts: {last_error}")]
    Exhausted {
        service: String,
        attempts: u32,
        last_error: String,
    },
    #[error(transparent)]
    Health(#[from] HealthError),
}

/// Calls `operation` until it succeeds, recording each outcome against
/// `service_name`. Only transient failures are retried; the loop also stops
/// as soon as the service is marked down.
pub fn retry_with_backoff<T, F>(
    tracker: &mut ServiceHealthTracker,
    service_name: &str,
    policy: &RetryPolicy,
    sleep: &mut dyn FnMut(Duration),
    mut operation: F,
) -> Result<T, RetryError>
where
    F: FnMut(u32) -> Result<T, String>,
{
    if tracker.get(service_name).is_none() {
        return Err(HealthError::NotRegistered {
            service: service_name.to_string(),
        }
        .into());
    }
    if !tracker.is_available(service_name) {
        return Err(RetryError::Unavailable {
            service: service_name.to_string(),
        });
    }

    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let message = match operation(attempt) {
            Ok(value) => {
                tracker.record_success(service_name)?;
                return Ok(value);
            }
            Err(message) => message,
        };
        tracker.record_failure(service_name, &message)?;

        let category = classify_error(&message);
        if category != ErrorCategory::Transient {
            return Err(RetryError::NonRetryable {
                service: service_name.to_string(),
                category,
                message,
            });
        }
        if attempt >= max_attempts || !tracker.is_available(service_name) {
            return Err(RetryError::Exhausted {
                service: service_name.to_string(),
                attempts: attempt,
                last_error: message,
            });
        }

        let delay = backoff_delay(policy, attempt);
        tracker.events().info(
            "health.retry",
            json!({
                "service": service_name,
                "attempt": attempt,
                "delayMs": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            }),
        );
        sleep(delay);
        attempt += 1;
    }
}
