//! Error classification
//!
//! Maps a [`RemoteError`] and the kind of operation that produced it to an
//! [`ErrorVerdict`]. The classifier is the only place that knows which remote
//! error codes are transient.
//!
//! Codes are dotted (`FailedOperation.ResourceInOperating`). Lookup walks from
//! the full code towards its first segment, so a rule on `ResourceNotFound`
//! covers `ResourceNotFound.InstanceNotExist` unless a more specific rule
//! exists.

use std::collections::HashMap;

use crate::error::RemoteError;
use crate::types::{ErrorVerdict, OperationKind};

/// Codes that indicate a transient condition on the remote side.
const RETRYABLE_CODES: &[&str] = &[
    "RequestLimitExceeded",
    "ResourceBusy",
    "InternalError",
    "ResourceInUse",
    "FailedOperation.ResourceInOperating",
];

/// Codes that will fail the same way on every attempt.
const NON_RETRYABLE_CODES: &[&str] = &[
    "ResourceAlreadyExists",
    "InvalidParameterValue.NameDuplicated",
    "InvalidParameter",
    "InvalidParameterValue",
    "MissingParameter",
    "UnknownParameter",
    "ResourceNotFound",
];

/// Codes after which the local record can no longer be trusted.
const FATAL_CODES: &[&str] = &["AuthFailure", "UnauthorizedOperation", "OperationDenied"];

/// Table-driven classifier for remote errors.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: HashMap<String, ErrorVerdict>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        let mut rules = HashMap::new();
        for code in RETRYABLE_CODES {
            rules.insert((*code).to_string(), ErrorVerdict::Retryable);
        }
        for code in NON_RETRYABLE_CODES {
            rules.insert((*code).to_string(), ErrorVerdict::NonRetryable);
        }
        for code in FATAL_CODES {
            rules.insert((*code).to_string(), ErrorVerdict::Fatal);
        }
        Self { rules }
    }
}

impl ErrorClassifier {
    /// Create a classifier with the built-in rule table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a classifier with no code rules at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// Add or override the verdict for a code (or code prefix).
    #[must_use]
    pub fn with_rule(mut self, code: impl Into<String>, verdict: ErrorVerdict) -> Self {
        self.rules.insert(code.into(), verdict);
        self
    }

    /// Classify an error produced by an operation of the given kind.
    ///
    /// - transport failures are always retryable;
    /// - undecodable responses are never retryable;
    /// - an unrecognized code is retryable for writes and reads, and
    ///   non-retryable for existence checks.
    #[must_use]
    pub fn classify(&self, error: &RemoteError, kind: OperationKind) -> ErrorVerdict {
        match error {
            RemoteError::Transport { .. } => ErrorVerdict::Retryable,
            RemoteError::Decode { .. } => ErrorVerdict::NonRetryable,
            RemoteError::Api { code, .. } => self
                .lookup(code)
                .unwrap_or_else(|| Self::fallback(kind)),
        }
    }

    fn lookup(&self, code: &str) -> Option<ErrorVerdict> {
        let mut candidate = code;
        loop {
            if let Some(verdict) = self.rules.get(candidate) {
                return Some(*verdict);
            }
            match candidate.rfind('.') {
                Some(pos) => candidate = &candidate[..pos],
                None => return None,
            }
        }
    }

    fn fallback(kind: OperationKind) -> ErrorVerdict {
        match kind {
            OperationKind::Write | OperationKind::Read => ErrorVerdict::Retryable,
            OperationKind::ExistenceCheck => ErrorVerdict::NonRetryable,
        }
    }
}
