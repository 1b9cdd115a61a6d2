//! Shared deadline bounding every transport operation of one invocation

use crate::error::{OrchestratorError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One overall budget plus a cancellation switch, cloned into every stage
#[derive(Debug, Clone)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
    cancel: CancellationToken,
}

impl Deadline {
    /// Start a budget of `budget` from now
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort every in-flight and future operation bound to this deadline
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `fut`, failing with `Timeout` or `Cancelled` if the deadline wins the race
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(OrchestratorError::Cancelled {
                operation: operation.to_string(),
            }),
            _ = tokio::time::sleep_until(self.at) => Err(OrchestratorError::Timeout {
                operation: operation.to_string(),
                timeout_ms: self.budget.as_millis() as u64,
            }),
            result = fut => result,
        }
    }
}
