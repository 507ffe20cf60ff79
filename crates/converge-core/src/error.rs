//! Error Types
//!
//! Errors raised by the shared value types, chiefly the composite identifier
//! codec.
//!
//! # Example
//!
//! ```
//! use converge_core::{CompositeId, IdError};
//!
//! let err = CompositeId::decode("ins-1#alice", 3).unwrap_err();
//! assert!(matches!(err, IdError::Arity { expected: 3, actual: 2, .. }));
//! ```

use thiserror::Error;

/// Malformed composite identifier.
///
/// Raised when a local identifier cannot be built from its components or
/// cannot be split back into the number of components a resource expects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// The identifier splits into a different number of components than the
    /// resource needs to address itself remotely.
    #[error("identifier '{id}' has {actual} component(s), expected {expected}")]
    Arity {
        /// The encoded identifier that was rejected
        id: String,
        /// Number of components the caller required
        expected: usize,
        /// Number of components actually present
        actual: usize,
    },

    /// A component contains the separator and would produce an ambiguous id.
    #[error("component '{component}' contains the reserved separator '{separator}'")]
    SeparatorInComponent {
        /// The offending component
        component: String,
        /// The reserved separator character
        separator: char,
    },

    /// A component is empty.
    #[error("component {index} of identifier is empty")]
    EmptyComponent {
        /// Zero-based position of the empty component
        index: usize,
    },

    /// No components were supplied.
    #[error("identifier must have at least one component")]
    NoComponents,
}

impl IdError {
    /// Get an error code for classification.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            IdError::Arity { .. } => "ID_ARITY_MISMATCH",
            IdError::SeparatorInComponent { .. } => "ID_SEPARATOR_IN_COMPONENT",
            IdError::EmptyComponent { .. } => "ID_EMPTY_COMPONENT",
            IdError::NoComponents => "ID_NO_COMPONENTS",
        }
    }

    /// Whether this error came from decoding a stored identifier, as opposed
    /// to encoding fresh components.
    #[must_use]
    pub fn is_arity(&self) -> bool {
        matches!(self, IdError::Arity { .. })
    }
}

/// Type alias for Results using `IdError`.
pub type IdResult<T> = std::result::Result<T, IdError>;
