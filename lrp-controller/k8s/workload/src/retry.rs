use crate::{Error, Result};
use std::future::Future;
use tokio::time;
use tracing::debug;

/// Bounds how a read-modify-write cycle is repeated on optimistic-concurrency
/// conflicts.
///
/// The whole cycle is re-run so that each attempt starts from a fresh read.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub backoff: time::Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 16,
            backoff: time::Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub async fn on_conflict<T, F, Fut>(&self, context: &'static str, mut cycle: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);
        for attempt in 1..=attempts {
            match cycle().await {
                Err(error) if error.is_conflict() && attempt < attempts => {
                    debug!(%error, attempt, "Conflicting write; retrying");
                    if !self.backoff.is_zero() {
                        time::sleep(self.backoff).await;
                    }
                }
                Err(error) if error.is_conflict() => {
                    debug!(%error, attempt, "Conflicting write; giving up");
                    break;
                }
                res => return res,
            }
        }
        Err(Error::Retries { context, attempts })
    }
}
