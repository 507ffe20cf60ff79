//! Reconciliation type definitions
//!
//! Enums shared by the classifier, executor and orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a remote call is doing, as far as error classification cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Create, update, delete or tag mutation.
    Write,
    /// Read used to track convergence or observe state.
    Read,
    /// Read that only decides whether the resource still exists.
    ExistenceCheck,
}

impl OperationKind {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Write => "write",
            OperationKind::Read => "read",
            OperationKind::ExistenceCheck => "existence_check",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How an error should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorVerdict {
    /// Try again after a backoff.
    Retryable,
    /// Surface immediately; the local record stays usable.
    NonRetryable,
    /// Surface immediately and mark the local record unusable.
    Fatal,
}

impl ErrorVerdict {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorVerdict::Retryable => "retryable",
            ErrorVerdict::NonRetryable => "non_retryable",
            ErrorVerdict::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorVerdict {
    type Err = ParseVerdictError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "retryable" => Ok(ErrorVerdict::Retryable),
            "non_retryable" | "nonretryable" => Ok(ErrorVerdict::NonRetryable),
            "fatal" => Ok(ErrorVerdict::Fatal),
            _ => Err(ParseVerdictError(s.to_string())),
        }
    }
}

/// Error parsing an error verdict from string.
#[derive(Debug, Clone)]
pub struct ParseVerdictError(String);

impl fmt::Display for ParseVerdictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid error verdict '{}', expected one of: retryable, non_retryable, fatal",
            self.0
        )
    }
}

impl std::error::Error for ParseVerdictError {}

/// The mutation whose effect is being awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Waiting for a new resource to become ready.
    Create,
    /// Waiting for field updates to settle.
    Update,
    /// Waiting for the resource to disappear.
    Delete,
}

impl Phase {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Create => "create",
            Phase::Update => "update",
            Phase::Delete => "delete",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a local resource record.
///
/// ```text
/// Absent -> Creating -> Polling(Create) -> Observing -> Steady
/// Steady -> Diffing -> Observing -> Diffing -> Updating -> Polling(Update) -> Observing -> Steady
/// any (with id) -> Deleting -> Polling(Delete) -> Absent
/// ```
///
/// Failure states keep the record's identifier so a later pass can resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// No remote resource is known.
    #[default]
    Absent,
    /// The create call is in flight.
    Creating,
    /// Waiting for a mutation to take effect remotely.
    Polling(Phase),
    /// Reading the remote state.
    Observing,
    /// Remote state matches the last applied desired state.
    Steady,
    /// Comparing desired state with observed state.
    Diffing,
    /// Field update calls are in flight.
    Updating,
    /// The delete call is in flight.
    Deleting,
    CreateFailed,
    UpdateFailed,
    DeleteFailed,
}

impl RecordState {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordState::Absent => "absent",
            RecordState::Creating => "creating",
            RecordState::Polling(Phase::Create) => "polling_create",
            RecordState::Polling(Phase::Update) => "polling_update",
            RecordState::Polling(Phase::Delete) => "polling_delete",
            RecordState::Observing => "observing",
            RecordState::Steady => "steady",
            RecordState::Diffing => "diffing",
            RecordState::Updating => "updating",
            RecordState::Deleting => "deleting",
            RecordState::CreateFailed => "create_failed",
            RecordState::UpdateFailed => "update_failed",
            RecordState::DeleteFailed => "delete_failed",
        }
    }

    /// Check if the state is a failure state.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            RecordState::CreateFailed | RecordState::UpdateFailed | RecordState::DeleteFailed
        )
    }

    /// Whether a remote mutation may be in flight or unconfirmed.
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            RecordState::Creating
                | RecordState::Polling(_)
                | RecordState::Updating
                | RecordState::Deleting
        )
    }

    /// Check if transition to the target state is valid.
    ///
    /// Staying in the same state is always allowed, which is how an
    /// interrupted step is resumed.
    #[must_use]
    pub fn can_transition_to(&self, target: RecordState) -> bool {
        use RecordState as S;

        if *self == target {
            return true;
        }
        // Deleting can start from anything that may have a remote counterpart.
        if target == S::Deleting {
            return !matches!(self, S::Absent | S::Polling(Phase::Delete));
        }

        match (self, target) {
            (S::Absent, S::Creating) => true,
            (S::Creating, S::Polling(Phase::Create) | S::CreateFailed) => true,
            (S::Polling(Phase::Create), S::Observing | S::CreateFailed) => true,
            (
                S::Observing,
                S::Steady | S::Diffing | S::Absent | S::CreateFailed | S::UpdateFailed,
            ) => true,
            (S::Steady, S::Diffing | S::Observing) => true,
            (S::Diffing, S::Observing | S::Updating | S::Steady) => true,
            (
                S::Updating,
                S::Polling(Phase::Update) | S::Observing | S::UpdateFailed | S::Diffing,
            ) => true,
            (S::Polling(Phase::Update), S::Observing | S::UpdateFailed) => true,
            (S::Deleting, S::Polling(Phase::Delete) | S::DeleteFailed) => true,
            (S::Polling(Phase::Delete), S::Absent | S::DeleteFailed) => true,
            (S::CreateFailed, S::Creating | S::Polling(Phase::Create)) => true,
            (S::UpdateFailed, S::Diffing | S::Observing) => true,
            (S::DeleteFailed, S::Polling(Phase::Delete) | S::Diffing | S::Observing) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
