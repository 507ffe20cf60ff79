//! Reconciliation error types
//!
//! Layered errors, leaf-first: what the remote said ([`RemoteError`]), what
//! the retry executor concluded ([`ExecuteError`]), what the state poller
//! concluded ([`PollError`]), plus local precondition failures
//! ([`DiffError`], identifier errors) and the umbrella [`ReconcileError`].
//!
//! The layering keeps three outcomes apart for callers: nothing happened
//! remotely, something happened but the end state is unknown (timeout or
//! cancellation), and the remote definitely failed.

use std::time::Duration;
use thiserror::Error;

use converge_core::IdError;

/// Error returned by a call to the remote control plane.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The remote API answered with a machine-readable error code.
    #[error("remote error [{code}]: {message}")]
    Api {
        code: String,
        message: String,
        request_id: Option<String>,
    },

    /// The request never produced an API answer (connection reset, DNS, TLS).
    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The remote answered but the response could not be interpreted.
    #[error("unexpected response: {message}")]
    Decode { message: String },
}

impl RemoteError {
    /// Create an API error.
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        RemoteError::Api {
            code: code.into(),
            message: message.into(),
            request_id: None,
        }
    }

    /// Create an API error carrying the remote request id.
    pub fn api_with_request_id(
        code: impl Into<String>,
        message: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        RemoteError::Api {
            code: code.into(),
            message: message.into(),
            request_id: Some(request_id.into()),
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        RemoteError::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport error with source.
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        RemoteError::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        RemoteError::Decode {
            message: message.into(),
        }
    }

    /// The remote error code, if the remote produced one.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            RemoteError::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Whether the remote reported that the addressed resource does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.code().is_some_and(|code| {
            code == "ResourceNotFound" || code.starts_with("ResourceNotFound.")
        })
    }
}

/// Result type for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Why the retry executor stopped without a successful result.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The remote rejected the operation and retrying will not help.
    #[error("{operation} failed: {source}")]
    NonRetryable {
        operation: String,
        #[source]
        source: RemoteError,
    },

    /// The remote rejected the operation in a way that makes the local record
    /// unusable.
    #[error("{operation} failed fatally: {source}")]
    Fatal {
        operation: String,
        #[source]
        source: RemoteError,
    },

    /// Gave up waiting: every attempt failed transiently until the deadline.
    #[error("{operation} timed out after {attempts} attempt(s) in {elapsed:?}")]
    Timeout {
        operation: String,
        attempts: u32,
        elapsed: Duration,
        #[source]
        last_error: Option<RemoteError>,
    },

    /// The caller cancelled the operation.
    #[error("{operation} cancelled")]
    Cancelled { operation: String },
}

impl ExecuteError {
    /// The remote error behind this failure, if any.
    #[must_use]
    pub fn remote_error(&self) -> Option<&RemoteError> {
        match self {
            ExecuteError::NonRetryable { source, .. } | ExecuteError::Fatal { source, .. } => {
                Some(source)
            }
            ExecuteError::Timeout { last_error, .. } => last_error.as_ref(),
            ExecuteError::Cancelled { .. } => None,
        }
    }

    /// Whether the remote reported the resource as missing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, ExecuteError::NonRetryable { source, .. } if source.is_not_found())
    }

    /// Whether this failure should taint the local record.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExecuteError::Fatal { .. })
    }

    /// Whether the caller may retry the surrounding step later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecuteError::Timeout { .. } | ExecuteError::Cancelled { .. }
        )
    }

    /// Get an error code for classification.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            ExecuteError::NonRetryable { .. } => "NON_RETRYABLE",
            ExecuteError::Fatal { .. } => "FATAL",
            ExecuteError::Timeout { .. } => "TIMEOUT",
            ExecuteError::Cancelled { .. } => "CANCELLED",
        }
    }
}

/// Why the state poller stopped without reaching a target status.
#[derive(Debug, Error)]
pub enum PollError {
    /// The deadline elapsed before a target or failure status was observed.
    #[error(
        "{operation} did not converge after {polls} poll(s) in {elapsed:?} (last status: {})",
        last_status.as_deref().unwrap_or("unknown")
    )]
    Timeout {
        operation: String,
        polls: u32,
        elapsed: Duration,
        last_status: Option<String>,
    },

    /// The remote reported a status from the terminal-failure set.
    #[error("{operation} reached terminal failure status '{status}'")]
    TerminalFailure { operation: String, status: String },

    /// The caller cancelled while waiting.
    #[error("{operation} cancelled while polling")]
    Cancelled { operation: String },

    /// A status read failed with a non-transient error.
    #[error("{operation} status read failed: {source}")]
    Read {
        operation: String,
        #[source]
        source: ExecuteError,
    },
}

impl PollError {
    /// Whether the failure should taint the local record.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, PollError::Read { source, .. } if source.is_fatal())
    }

    /// Get an error code for classification.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            PollError::Timeout { .. } => "POLL_TIMEOUT",
            PollError::TerminalFailure { .. } => "TERMINAL_FAILURE",
            PollError::Cancelled { .. } => "CANCELLED",
            PollError::Read { .. } => "POLL_READ_FAILED",
        }
    }
}

/// Local configuration error found while diffing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiffError {
    /// The desired state sets a field the resource schema does not declare.
    #[error("field '{field}' is not declared in the schema of '{resource_type}'")]
    UnknownField {
        resource_type: String,
        field: String,
    },
}

/// Failure while applying a tag delta.
#[derive(Debug, Error)]
pub enum TagSyncError {
    /// Reading the currently attached tags failed.
    #[error("describing tags of {resource} failed: {source}")]
    Describe {
        resource: String,
        #[source]
        source: ExecuteError,
    },

    /// The replace call failed; nothing was applied.
    #[error("replacing tags of {resource} failed: {source}")]
    Replace {
        resource: String,
        #[source]
        source: ExecuteError,
    },

    /// Tags were replaced but removing stale keys failed.
    #[error("tags of {resource} partially applied ({replaced} replaced, delete failed): {source}")]
    PartiallyApplied {
        resource: String,
        replaced: usize,
        #[source]
        source: ExecuteError,
    },
}

impl TagSyncError {
    /// Whether the surrounding update may be retried.
    ///
    /// A partial application is always retryable: re-running the diff against
    /// the new remote tags yields exactly the part that is still missing.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            TagSyncError::PartiallyApplied { .. } => true,
            TagSyncError::Describe { source, .. } | TagSyncError::Replace { source, .. } => {
                source.is_retryable()
            }
        }
    }

    /// Whether the failure should taint the local record.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.execute_error().is_fatal()
    }

    /// The executor error behind the failed tag call.
    #[must_use]
    pub fn execute_error(&self) -> &ExecuteError {
        match self {
            TagSyncError::Describe { source, .. }
            | TagSyncError::Replace { source, .. }
            | TagSyncError::PartiallyApplied { source, .. } => source,
        }
    }
}

/// Error carried by a failed reconciliation outcome.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A remote call failed.
    #[error(transparent)]
    Execute(#[from] ExecuteError),

    /// Waiting for convergence failed.
    #[error(transparent)]
    Poll(#[from] PollError),

    /// Tag reconciliation failed.
    #[error(transparent)]
    Tags(#[from] TagSyncError),

    /// The local identifier is malformed.
    #[error("invalid local identifier: {0}")]
    Id(#[from] IdError),

    /// The desired state does not fit the resource schema.
    #[error(transparent)]
    Diff(#[from] DiffError),

    /// A response could not be turned into local state.
    #[error("{operation}: {source}")]
    Response {
        operation: String,
        #[source]
        source: RemoteError,
    },

    /// No schema is registered for the resource type.
    #[error("no schema registered for resource type '{resource_type}'")]
    UnknownResourceType { resource_type: String },

    /// The resource was confirmed converged but a follow-up read found nothing.
    #[error("resource {id} vanished right after reaching its target status")]
    Vanished { id: String },

    /// The record is in a state that does not accept the requested action.
    #[error("record in state '{state}' cannot {action}")]
    InvalidState { state: String, action: String },
}

impl ReconcileError {
    /// Whether the caller may retry the whole reconciliation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::Execute(e) => e.is_retryable(),
            ReconcileError::Poll(e) => matches!(
                e,
                PollError::Timeout { .. } | PollError::Cancelled { .. }
            ) || matches!(e, PollError::Read { source, .. } if source.is_retryable()),
            ReconcileError::Tags(e) => e.is_retryable(),
            ReconcileError::Vanished { .. } => true,
            ReconcileError::Id(_)
            | ReconcileError::Diff(_)
            | ReconcileError::Response { .. }
            | ReconcileError::UnknownResourceType { .. }
            | ReconcileError::InvalidState { .. } => false,
        }
    }

    /// Whether the step gave up waiting, leaving the remote end state unknown.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            ReconcileError::Execute(e) => matches!(e, ExecuteError::Timeout { .. }),
            ReconcileError::Poll(e) => matches!(e, PollError::Timeout { .. }),
            ReconcileError::Tags(e) => matches!(e.execute_error(), ExecuteError::Timeout { .. }),
            _ => false,
        }
    }

    /// Whether the step stopped because the caller cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            ReconcileError::Execute(e) => matches!(e, ExecuteError::Cancelled { .. }),
            ReconcileError::Poll(e) => matches!(e, PollError::Cancelled { .. }),
            ReconcileError::Tags(e) => {
                matches!(e.execute_error(), ExecuteError::Cancelled { .. })
            }
            _ => false,
        }
    }

    /// Whether the failure should taint the local record.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            ReconcileError::Execute(e) => e.is_fatal(),
            ReconcileError::Poll(e) => e.is_fatal(),
            ReconcileError::Tags(e) => e.is_fatal(),
            _ => false,
        }
    }

    /// Get an error code for classification.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            ReconcileError::Execute(e) => e.error_code(),
            ReconcileError::Poll(e) => e.error_code(),
            ReconcileError::Tags(_) => "TAG_SYNC_FAILED",
            ReconcileError::Id(e) => e.error_code(),
            ReconcileError::Diff(_) => "UNKNOWN_FIELD",
            ReconcileError::Response { .. } => "UNEXPECTED_RESPONSE",
            ReconcileError::UnknownResourceType { .. } => "UNKNOWN_RESOURCE_TYPE",
            ReconcileError::Vanished { .. } => "RESOURCE_VANISHED",
            ReconcileError::InvalidState { .. } => "INVALID_STATE",
        }
    }
}

/// Result type for reconciliation steps.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Invalid reconciliation settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A setting has an unusable value.
    #[error("invalid setting '{field}': {message}")]
    Invalid { field: &'static str, message: String },

    /// An environment variable could not be parsed.
    #[error("environment variable {var}='{value}' is not a valid {expected}")]
    Env {
        var: String,
        value: String,
        expected: &'static str,
    },

    /// The settings document is not valid JSON for the settings shape.
    #[error("settings parse error: {0}")]
    Parse(#[from] serde_json::Error),
}
