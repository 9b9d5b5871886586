//! Retry utilities with exponential backoff for outbound HTTP calls.

use std::fmt::Display;
use std::time::Duration;
use tokio::time::sleep;

/// Configuration for retry behavior
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// `retries` extra attempts after the first, starting at `delay`
    pub fn new(retries: u32, delay: Duration) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            initial_delay: delay,
            ..Self::default()
        }
    }

    /// Backoff before the attempt following attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powf(attempt.saturating_sub(1) as f64);
        Duration::from_secs_f64(exp.min(self.max_delay.as_secs_f64()))
    }
}

/// Transient errors that should trigger a retry
#[derive(Debug, Clone, PartialEq)]
pub enum TransientError {
    /// Network connectivity issues
    Network,
    /// Rate limit exceeded (with optional retry-after seconds)
    RateLimit(Option<u64>),
    /// Server error (5xx)
    ServerError,
    /// Request timeout
    Timeout,
}

impl TransientError {
    /// Check if a reqwest error represents a transient error
    pub fn from_reqwest_error(err: &reqwest::Error) -> Option<Self> {
        if err.is_timeout() {
            return Some(TransientError::Timeout);
        }
        if err.is_connect() {
            return Some(TransientError::Network);
        }

        let status = err.status()?;
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Some(TransientError::RateLimit(None))
        } else if status.is_server_error() {
            Some(TransientError::ServerError)
        } else {
            None
        }
    }

    /// Minimum wait this error asks for
    pub fn recommended_delay(&self) -> Duration {
        match self {
            TransientError::RateLimit(Some(seconds)) => Duration::from_secs(*seconds),
            _ => Duration::ZERO,
        }
    }
}

/// Errors that can tell whether retrying may help
pub trait Transient {
    fn transient(&self) -> Option<TransientError>;
}

impl Transient for reqwest::Error {
    fn transient(&self) -> Option<TransientError> {
        TransientError::from_reqwest_error(self)
    }
}

/// Execute an async operation, retrying transient failures with backoff.
///
/// Permanent errors are returned immediately; the last transient error is
/// returned once `max_attempts` is reached.
pub async fn with_retry<T, E, F, Fut>(config: RetryConfig, mut operation: F) -> Result<T, E>
where
    E: Transient + Display,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    tracing::info!(attempts, "Operation succeeded after transient failures");
                }
                return Ok(result);
            }
            Err(error) => {
                let Some(transient) = error.transient() else {
                    return Err(error);
                };

                if attempts >= config.max_attempts {
                    tracing::warn!(attempts, error = %error, "Giving up after retries");
                    return Err(error);
                }

                let delay = config.delay_for(attempts).max(transient.recommended_delay());
                tracing::debug!(
                    attempt = attempts,
                    kind = ?transient,
                    delay_ms = delay.as_millis() as u64,
                    "Transient error, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}
