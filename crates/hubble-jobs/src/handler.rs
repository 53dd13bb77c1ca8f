//! Job handler trait and retry policy.

use std::time::Duration;

use async_trait::async_trait;

use hubble_core::defaults::{
    EMBEDDING_JOB_TIMEOUT, EMBEDDING_RETRY_DELAY, EMBEDDING_RETRY_MAX, EMBEDDING_RETRY_MIN,
    ENTRY_JOB_TIMEOUT, ENTRY_RETRY_DELAY, ENTRY_RETRY_MAX, ENTRY_RETRY_MIN, JOB_MAX_RETRIES,
};
use hubble_core::Error;

/// Result of job execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    /// Job completed successfully.
    Success,
    /// Job failed permanently.
    Failed(String),
    /// Job should be retried after a delay.
    Retry(String),
}

impl JobResult {
    /// Classify an error by whether another attempt could succeed.
    pub fn from_error(err: &Error) -> Self {
        if err.is_retryable() {
            JobResult::Retry(err.to_string())
        } else {
            JobResult::Failed(err.to_string())
        }
    }
}

/// Handles one kind of job payload.
#[async_trait]
pub trait JobHandler<J: Send + Sync>: Send + Sync {
    /// Job kind, for logs.
    fn kind(&self) -> &'static str;

    /// Execute the job.
    async fn execute(&self, job: &J) -> JobResult;
}

/// Backoff window and deadline of a pool's jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry_delay: Duration,
    pub retry_min: Duration,
    pub retry_max: Duration,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn entries() -> Self {
        Self {
            retry_delay: ENTRY_RETRY_DELAY,
            retry_min: ENTRY_RETRY_MIN,
            retry_max: ENTRY_RETRY_MAX,
            timeout: ENTRY_JOB_TIMEOUT,
            max_retries: JOB_MAX_RETRIES,
        }
    }

    pub fn embeddings() -> Self {
        Self {
            retry_delay: EMBEDDING_RETRY_DELAY,
            retry_min: EMBEDDING_RETRY_MIN,
            retry_max: EMBEDDING_RETRY_MAX,
            timeout: EMBEDDING_JOB_TIMEOUT,
            max_retries: JOB_MAX_RETRIES,
        }
    }

    /// Wait before retry `attempt` (1-based): `retry_delay * 2^(attempt-1)`
    /// clamped to `[retry_min, retry_max]`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let max = self.retry_max.max(self.retry_min);
        self.retry_delay
            .saturating_mul(factor)
            .clamp(self.retry_min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_backoff_window() {
        let policy = RetryPolicy::entries();
        // 120s is below the 5m floor.
        assert_eq!(policy.backoff(1), Duration::from_secs(5 * 60));
        assert_eq!(policy.backoff(2), Duration::from_secs(5 * 60));
        assert_eq!(policy.backoff(3), Duration::from_secs(8 * 60));
        assert_eq!(policy.backoff(4), Duration::from_secs(16 * 60));
        assert_eq!(policy.backoff(5), Duration::from_secs(20 * 60));
        assert_eq!(policy.backoff(40), Duration::from_secs(20 * 60));
    }

    #[test]
    fn test_embedding_backoff_window() {
        let policy = RetryPolicy::embeddings();
        assert_eq!(policy.backoff(1), Duration::from_secs(2 * 60));
        assert_eq!(policy.backoff(2), Duration::from_secs(4 * 60));
        assert_eq!(policy.backoff(3), Duration::from_secs(8 * 60));
        assert_eq!(policy.backoff(4), Duration::from_secs(10 * 60));
    }

    #[test]
    fn test_policy_timeouts() {
        assert_eq!(RetryPolicy::entries().timeout, Duration::from_secs(5 * 60));
        assert_eq!(RetryPolicy::embeddings().timeout, Duration::from_secs(2 * 60));
        assert_eq!(RetryPolicy::entries().max_retries, 3);
    }

    #[test]
    fn test_result_from_error() {
        assert!(matches!(
            JobResult::from_error(&Error::Embedding("503".into())),
            JobResult::Retry(_)
        ));
        assert!(matches!(
            JobResult::from_error(&Error::EntryNotFound(4)),
            JobResult::Failed(_)
        ));
    }
}
