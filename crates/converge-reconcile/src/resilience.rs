//! Retry with exponential backoff under a deadline.
//!
//! [`RetryExecutor`] runs a fallible remote call, classifies each failure with
//! the [`ErrorClassifier`] and keeps retrying transient failures until the
//! policy's deadline elapses. Deadline exhaustion is reported as
//! [`ExecuteError::Timeout`], never as a remote failure.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use converge_core::AttemptId;

use crate::classify::ErrorClassifier;
use crate::clock::{Clock, TokioClock};
use crate::error::{ExecuteError, RemoteError};
use crate::types::{ErrorVerdict, OperationKind};

/// Largest share of a backoff delay removed by jitter.
const JITTER_FRACTION: f64 = 0.25;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total time budget measured from the first attempt.
    pub deadline: Duration,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Whether to randomize delays downwards.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::write()
    }
}

impl RetryPolicy {
    /// Policy for mutating calls.
    #[must_use]
    pub fn write() -> Self {
        Self {
            deadline: Duration::from_secs(300),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            jitter: true,
        }
    }

    /// Policy for reads.
    #[must_use]
    pub fn read() -> Self {
        Self {
            deadline: Duration::from_secs(180),
            ..Self::write()
        }
    }

    /// Set the deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Set the backoff bounds.
    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Copy of this policy whose deadline does not exceed `remaining`.
    #[must_use]
    pub fn clamped_to(&self, remaining: Duration) -> Self {
        Self {
            deadline: self.deadline.min(remaining),
            ..self.clone()
        }
    }

    /// Un-jittered delay after the given failed attempt (0-indexed).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.initial_backoff.checked_mul(factor))
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }
}

/// Retry executor with exponential backoff.
#[derive(Clone)]
pub struct RetryExecutor {
    clock: Arc<dyn Clock>,
    classifier: ErrorClassifier,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("classifier", &self.classifier)
            .finish_non_exhaustive()
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(Arc::new(TokioClock), ErrorClassifier::default())
    }
}

impl RetryExecutor {
    /// Create a new retry executor.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, classifier: ErrorClassifier) -> Self {
        Self { clock, classifier }
    }

    /// The clock used for deadlines and sleeps.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The classifier deciding which failures are retried.
    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    fn calculate_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
        let delay = policy.backoff(attempt);
        if policy.jitter {
            delay.mul_f64(1.0 - rand::random::<f64>() * JITTER_FRACTION)
        } else {
            delay
        }
    }

    /// Execute an operation with retries.
    ///
    /// Returns the first success. Stops early on a non-retryable or fatal
    /// failure, or when `cancel` fires. A retryable failure observed after the
    /// deadline ends the loop with [`ExecuteError::Timeout`].
    pub async fn execute<F, Fut, T>(
        &self,
        operation: &str,
        kind: OperationKind,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<T, ExecuteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let attempt_id = AttemptId::new();
        let started = self.clock.now();
        let mut attempts: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(ExecuteError::Cancelled {
                    operation: operation.to_string(),
                });
            }

            attempts += 1;
            let error = match call().await {
                Ok(result) => {
                    if attempts > 1 {
                        debug!(%attempt_id, operation, attempts, "Succeeded after retries");
                    }
                    return Ok(result);
                }
                Err(e) => e,
            };

            match self.classifier.classify(&error, kind) {
                ErrorVerdict::Retryable => {}
                ErrorVerdict::NonRetryable => {
                    debug!(%attempt_id, operation, attempts, error = %error, "Non-retryable error");
                    return Err(ExecuteError::NonRetryable {
                        operation: operation.to_string(),
                        source: error,
                    });
                }
                ErrorVerdict::Fatal => {
                    warn!(%attempt_id, operation, attempts, error = %error, "Fatal remote error");
                    return Err(ExecuteError::Fatal {
                        operation: operation.to_string(),
                        source: error,
                    });
                }
            }

            let elapsed = self.clock.now().saturating_duration_since(started);
            if elapsed >= policy.deadline {
                warn!(
                    %attempt_id,
                    operation,
                    attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %error,
                    "Retry deadline exceeded"
                );
                return Err(ExecuteError::Timeout {
                    operation: operation.to_string(),
                    attempts,
                    elapsed,
                    last_error: Some(error),
                });
            }

            let delay =
                Self::calculate_delay(policy, attempts - 1).min(policy.deadline - elapsed);
            debug!(
                %attempt_id,
                operation,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after transient error"
            );

            if self.clock.sleep(delay, cancel).await.is_err() {
                return Err(ExecuteError::Cancelled {
                    operation: operation.to_string(),
                });
            }
        }
    }
}
