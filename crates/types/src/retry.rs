use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::DataSourceError;

const DEFAULT_ATTEMPTS: u32 = 10;
const DEFAULT_BACKOFF_FACTOR: f64 = 0.5;
const DEFAULT_RETRYABLE_STATUSES: [u16; 4] = [500, 502, 503, 504];
const DEFAULT_MAX_BACKOFF_SECS: f64 = 120.0;

/// Bounded retry configuration shared by every call a client makes.
///
/// `attempts` counts total tries, so `attempts = 1` disables retrying. Delays
/// follow an exponential schedule without jitter: the first retry is
/// immediate, the n-th retry (n >= 2) waits `backoff_factor * 2^(n - 1)`
/// seconds, capped at `max_backoff_secs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff_factor: f64,
    pub retryable_statuses: Vec<u16>,
    pub max_backoff_secs: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
            max_backoff_secs: DEFAULT_MAX_BACKOFF_SECS,
        }
    }
}

impl RetryPolicy {
    /// Reject configurations that cannot drive a retry loop.
    pub fn validate(&self) -> Result<(), DataSourceError> {
        if self.attempts == 0 {
            return Err(DataSourceError::configuration("retry attempts must be at least 1"));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 0.0 {
            return Err(DataSourceError::configuration(format!(
                "retry backoff factor must be a non-negative number; received {}",
                self.backoff_factor
            )));
        }
        if !self.max_backoff_secs.is_finite() || self.max_backoff_secs < 0.0 {
            return Err(DataSourceError::configuration(format!(
                "maximum backoff must be a non-negative number; received {}",
                self.max_backoff_secs
            )));
        }
        if let Some(status) = self.retryable_statuses.iter().find(|status| !(100..=599).contains(*status)) {
            return Err(DataSourceError::configuration(format!(
                "retryable status {status} is not a valid HTTP status code"
            )));
        }
        Ok(())
    }

    pub fn is_retryable(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Delay to wait before the given retry (1-based).
    pub fn delay_for_retry(&self, retry_number: u32) -> Duration {
        if retry_number <= 1 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry_number - 1).unwrap_or(i32::MAX);
        let seconds = (self.backoff_factor * 2f64.powi(exponent)).min(self.max_backoff_secs);
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO)
    }
}
