//! Backoff policy for envelope delivery.
//!
//! A failed send is tried again only when the error says it may succeed later
//! (see [`RetryableError`]). Waits grow geometrically from `base_delay` and
//! never exceed `max_delay`; a server-requested wait takes precedence but is
//! held to the same ceiling.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::FaultlineError;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one. Must be at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Growth of the wait per failed attempt. Must be finite and non-negative.
    pub backoff_factor: f64,
    /// Scale each wait by a random factor in `0.5..1.5`.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// A policy that tries exactly once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Reject policies the delivery worker cannot follow.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.max_attempts == 0 {
            return Err(FaultlineError::ConfigError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 0.0 {
            return Err(FaultlineError::ConfigError(format!(
                "retry.backoff_factor must be a finite, non-negative number, got {}",
                self.backoff_factor
            )));
        }
        Ok(())
    }

    /// Wait after the `failures`-th consecutive failure (1-based).
    ///
    /// Never panics: a wait that cannot be represented falls back to `max_delay`.
    pub(crate) fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let mut secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        secs = secs.min(self.max_delay.as_secs_f64());
        if self.jitter {
            secs *= 0.5 + rand::random::<f64>();
        }
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
    }

    fn wait_after<E: RetryableError>(&self, error: &E, failures: u32) -> Duration {
        match error.retry_after() {
            Some(requested) => requested.min(self.max_delay),
            None => self.backoff(failures),
        }
    }
}

/// Classifies delivery errors for [`retry`].
pub trait RetryableError {
    /// Whether another attempt could succeed.
    fn is_retryable(&self) -> bool;

    /// Server-requested wait before the next attempt.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl RetryableError for FaultlineError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::TransportError { retryable, .. } => *retryable,
            Self::HttpError(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::TransportError { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Call `send` until it succeeds, fails permanently, or `policy` runs out of attempts.
///
/// # Arguments
///
/// * `policy` - Attempt limit and backoff settings
/// * `send` - Produces one delivery attempt per call
pub async fn retry<F, Fut, T, E>(policy: &RetryConfig, mut send: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + std::fmt::Debug,
{
    let mut failures: u32 = 0;

    loop {
        let error = match send().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        failures += 1;

        if !error.is_retryable() {
            debug!("Delivery rejected, not retrying: {:?}", error);
            return Err(error);
        }
        if failures >= policy.max_attempts {
            warn!("Delivery still failing after {} attempts: {:?}", failures, error);
            return Err(error);
        }

        let wait = policy.wait_after(&error, failures);
        warn!(
            "Delivery attempt {}/{} failed, next try in {}ms: {:?}",
            failures,
            policy.max_attempts,
            wait.as_millis(),
            error
        );
        tokio::time::sleep(wait).await;
    }
}
