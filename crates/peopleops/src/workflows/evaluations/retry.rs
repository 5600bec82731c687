use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use super::repository::RepositoryError;
use crate::config::EvaluationLinkConfig;

const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Bounded timeout-and-retry wrapper for store calls. Only transient failures are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EvaluationLinkConfig) -> Self {
        Self {
            max_attempts: config.persist_max_attempts.max(1),
            initial_backoff: config.persist_backoff,
            call_timeout: config.store_timeout,
        }
    }

    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RepositoryError>>,
    {
        let mut backoff = self.initial_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.call_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(RepositoryError::Timeout(self.call_timeout)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    warn!(operation, attempt, error = %err, "store call failed, retrying");
                    tokio::time::sleep(backoff + jitter(backoff)).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(last) => {
                    return Err(RetryError {
                        operation,
                        attempts: attempt,
                        last,
                    })
                }
            }
        }
    }
}

fn jitter(backoff: Duration) -> Duration {
    let ceiling = u64::try_from(backoff.as_millis() / 2).unwrap_or(u64::MAX);
    Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} failed after {attempts} attempt(s): {last}")]
pub struct RetryError {
    pub operation: &'static str,
    pub attempts: u32,
    #[source]
    pub last: RepositoryError,
}
