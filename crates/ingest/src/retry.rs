//! Task-level retry for extraction.
//!
//! A whole extraction (every page of it) is re-run on a transient failure,
//! a fixed number of times with a fixed delay. Upserts being idempotent is
//! what makes re-running safe; nothing below this layer knows about retries.

use std::future::Future;
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};

use repomirror_types::{MirrorError, Result};

pub const DEFAULT_RETRIES: usize = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retries: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: usize, delay: Duration) -> Self {
        Self { retries, delay }
    }

    fn backoff(&self) -> ConstantBuilder {
        ConstantBuilder::default()
            .with_delay(self.delay)
            .with_max_times(self.retries)
    }
}

/// Run `operation`, re-running it on transient errors per `policy`.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, task: &str, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    operation
        .retry(policy.backoff())
        .when(MirrorError::is_transient)
        .notify(|err: &MirrorError, delay: Duration| {
            tracing::warn!(task, error = %err, ?delay, "transient failure, retrying");
        })
        .await
}
