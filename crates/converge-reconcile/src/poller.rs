//! State polling.
//!
//! Mutations on the remote side complete asynchronously. [`StatePoller`]
//! reads the resource status at a fixed interval until it lands in the
//! target set, lands in the failure set, or the deadline passes.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ExecuteError, PollError, RemoteResult};
use crate::operation::ObservedStatus;
use crate::resilience::{RetryExecutor, RetryPolicy};
use crate::types::OperationKind;

/// Timing of a poll loop.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    /// Pause between two status reads.
    pub interval: Duration,
    /// Total time budget, measured from the first read.
    pub deadline: Duration,
    /// Retry policy for each individual read.
    pub read: RetryPolicy,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            deadline: Duration::from_secs(1800),
            read: RetryPolicy::read(),
        }
    }
}

impl PollPolicy {
    /// Create a poll policy with the default read policy.
    #[must_use]
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self {
            interval,
            deadline,
            read: RetryPolicy::read(),
        }
    }

    /// Set the per-read retry policy.
    #[must_use]
    pub fn with_read_policy(mut self, read: RetryPolicy) -> Self {
        self.read = read;
        self
    }
}

/// What a status read means for the poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollDecision {
    /// The status is one of the targets; stop polling successfully.
    Reached,
    /// The status is a known failure; stop polling with this status.
    Failed(String),
    /// Keep polling.
    Pending,
}

/// Which observed statuses end a poll loop, and how.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateTarget {
    targets: BTreeSet<String>,
    failures: BTreeSet<String>,
    absent_is_target: bool,
}

impl StateTarget {
    /// Succeed on any of the given statuses.
    pub fn statuses<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: targets.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Succeed as soon as the resource can be read, whatever its status.
    #[must_use]
    pub fn exists() -> Self {
        Self::default()
    }

    /// Succeed once the resource is gone.
    #[must_use]
    pub fn absent() -> Self {
        Self {
            absent_is_target: true,
            ..Self::default()
        }
    }

    /// Also succeed on `status`.
    #[must_use]
    pub fn with_target(mut self, status: impl Into<String>) -> Self {
        self.targets.insert(status.into());
        self
    }

    /// Fail immediately on any of the given statuses.
    #[must_use]
    pub fn with_failures<I, S>(mut self, failures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failures.extend(failures.into_iter().map(Into::into));
        self
    }

    /// Whether absence counts as success.
    #[must_use]
    pub fn absent_is_target(&self) -> bool {
        self.absent_is_target
    }

    /// Classify one observed status.
    #[must_use]
    pub fn evaluate(&self, status: &ObservedStatus) -> PollDecision {
        match status {
            ObservedStatus::Absent if self.absent_is_target => PollDecision::Reached,
            ObservedStatus::Absent => PollDecision::Pending,
            ObservedStatus::Present(s) if self.failures.contains(s) => {
                PollDecision::Failed(s.clone())
            }
            ObservedStatus::Present(s) if self.targets.contains(s) => PollDecision::Reached,
            ObservedStatus::Present(_) if self.targets.is_empty() && !self.absent_is_target => {
                PollDecision::Reached
            }
            ObservedStatus::Present(_) => PollDecision::Pending,
        }
    }
}

/// Successful end of a poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalStatus {
    /// The status that satisfied the target.
    pub status: ObservedStatus,
    /// Number of status reads performed.
    pub polls: u32,
    /// Time from the start of polling until the target was seen.
    pub elapsed: Duration,
}

/// Waits for a remote resource to reach a target status.
#[derive(Debug, Clone, Default)]
pub struct StatePoller {
    executor: RetryExecutor,
}

impl StatePoller {
    /// Create a poller that reads through the given executor.
    #[must_use]
    pub fn new(executor: RetryExecutor) -> Self {
        Self { executor }
    }

    /// Poll `read_status` until `target` decides the loop is over.
    ///
    /// A `ResourceNotFound` read error is treated as [`ObservedStatus::Absent`].
    pub async fn await_state<F, Fut>(
        &self,
        operation: &str,
        target: &StateTarget,
        policy: &PollPolicy,
        cancel: &CancellationToken,
        mut read_status: F,
    ) -> Result<FinalStatus, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<ObservedStatus>>,
    {
        let clock = self.executor.clock();
        let started = clock.now();
        let mut polls: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(PollError::Cancelled {
                    operation: operation.to_string(),
                });
            }

            let elapsed = clock.now().saturating_duration_since(started);
            let read_policy = policy
                .read
                .clamped_to(policy.deadline.saturating_sub(elapsed));
            let read = self
                .executor
                .execute(operation, OperationKind::Read, &read_policy, cancel, &mut read_status)
                .await;
            polls += 1;

            let status = match read {
                Ok(status) => status,
                Err(e) if e.is_not_found() => ObservedStatus::Absent,
                Err(ExecuteError::Cancelled { .. }) => {
                    return Err(PollError::Cancelled {
                        operation: operation.to_string(),
                    });
                }
                Err(ExecuteError::Timeout { last_error, .. }) => {
                    let elapsed = clock.now().saturating_duration_since(started);
                    warn!(operation, polls, "Status reads kept failing until the deadline");
                    return Err(PollError::Timeout {
                        operation: operation.to_string(),
                        polls,
                        elapsed,
                        last_status: last_error.map(|e| format!("read error: {e}")),
                    });
                }
                Err(source) => {
                    return Err(PollError::Read {
                        operation: operation.to_string(),
                        source,
                    });
                }
            };

            let elapsed = clock.now().saturating_duration_since(started);
            match target.evaluate(&status) {
                PollDecision::Reached => {
                    info!(operation, polls, status = %status, "Target status reached");
                    return Ok(FinalStatus {
                        status,
                        polls,
                        elapsed,
                    });
                }
                PollDecision::Failed(status) => {
                    warn!(operation, polls, status = %status, "Terminal failure status");
                    return Err(PollError::TerminalFailure {
                        operation: operation.to_string(),
                        status,
                    });
                }
                PollDecision::Pending => {}
            }

            if elapsed >= policy.deadline {
                warn!(operation, polls, status = %status, "Poll deadline exceeded");
                return Err(PollError::Timeout {
                    operation: operation.to_string(),
                    polls,
                    elapsed,
                    last_status: Some(status.to_string()),
                });
            }

            let delay = policy.interval.min(policy.deadline - elapsed);
            debug!(
                operation,
                polls,
                status = %status,
                delay_ms = delay.as_millis() as u64,
                "Waiting for target status"
            );
            if clock.sleep(delay, cancel).await.is_err() {
                return Err(PollError::Cancelled {
                    operation: operation.to_string(),
                });
            }
        }
    }
}
