//! Strongly Typed Identifiers
//!
//! Two families of identifiers live here:
//!
//! - UUID newtypes ([`ReconcileId`], [`AttemptId`]) used to correlate log
//!   lines of one reconciliation or one remote call.
//! - [`CompositeId`], the local identifier of a remote resource. Some remote
//!   resources are addressed by several keys (a parent instance and a child
//!   user, a zone and a VPC). The local record stores them as one string,
//!   joined by [`CompositeId::SEPARATOR`]. This module is the only place that
//!   knows that format.
//!
//! # Example
//!
//! ```
//! use converge_core::CompositeId;
//!
//! let id = CompositeId::encode(["ins-8a2f", "alice"]).unwrap();
//! assert_eq!(id.as_str(), "ins-8a2f#alice");
//!
//! let decoded = CompositeId::decode(id.as_str(), 2).unwrap();
//! assert_eq!(decoded.part(0), Some("ins-8a2f"));
//! assert_eq!(decoded.part(1), Some("alice"));
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{IdError, IdResult};

/// Error type for UUID identifier parsing failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse
    pub id_type: &'static str,
    /// The underlying UUID parse error message
    pub message: String,
}

impl Display for ParseIdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to parse {}: {}", self.id_type, self.message)
    }
}

impl std::error::Error for ParseIdError {}

/// Macro to define a strongly-typed UUID identifier
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random ID using UUID v4.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an ID from an existing UUID.
            #[must_use]
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns a reference to the underlying UUID.
            #[must_use]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| ParseIdError {
                        id_type: stringify!($name),
                        message: e.to_string(),
                    })
            }
        }
    };
}

define_id!(
    /// Correlation id for one reconciliation pass over one record.
    ///
    /// Attached to the tracing span of `reconcile`/`delete` so every retry,
    /// poll and remote call of a pass can be grepped together.
    ReconcileId
);

define_id!(
    /// Correlation id for one executor run (all attempts of one operation).
    AttemptId
);

/// Local identifier of a remote resource, made of one or more components.
///
/// Invariants:
/// - at least one component, none empty, none containing the separator;
/// - `CompositeId::decode(id.as_str(), id.arity())` returns `id` again.
///
/// The encoded form is never sent to a remote API. Callers address remote
/// resources through the decoded [`parts`](CompositeId::parts).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeId {
    encoded: String,
    parts: Vec<String>,
}

impl CompositeId {
    /// Separator between components of the encoded form.
    pub const SEPARATOR: char = '#';

    /// Join components into an identifier.
    ///
    /// Fails loud rather than producing an ambiguous id: a component holding
    /// the separator, an empty component, or an empty component list are all
    /// rejected.
    pub fn encode<I, S>(components: I) -> IdResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let parts: Vec<String> = components.into_iter().map(Into::into).collect();
        Self::validate_parts(&parts)?;

        let encoded = parts.join(&Self::SEPARATOR.to_string());
        Ok(Self { encoded, parts })
    }

    /// Join components of any displayable type (numeric ids, for instance).
    pub fn from_parts<I, T>(components: I) -> IdResult<Self>
    where
        I: IntoIterator<Item = T>,
        T: ToString,
    {
        Self::encode(components.into_iter().map(|c| c.to_string()))
    }

    /// Split a stored identifier into exactly `expected_arity` components.
    ///
    /// Returns [`IdError::Arity`] when the count differs; the result is never
    /// truncated or padded.
    pub fn decode(id: &str, expected_arity: usize) -> IdResult<Self> {
        let parts: Vec<String> = id.split(Self::SEPARATOR).map(str::to_string).collect();
        if parts.len() != expected_arity {
            return Err(IdError::Arity {
                id: id.to_string(),
                expected: expected_arity,
                actual: parts.len(),
            });
        }
        Self::validate_parts(&parts)?;

        Ok(Self {
            encoded: id.to_string(),
            parts,
        })
    }

    /// Identifier with a single opaque component.
    pub fn single(value: impl Into<String>) -> IdResult<Self> {
        Self::encode([value.into()])
    }

    fn validate_parts(parts: &[String]) -> IdResult<()> {
        if parts.is_empty() {
            return Err(IdError::NoComponents);
        }
        for (index, part) in parts.iter().enumerate() {
            if part.is_empty() {
                return Err(IdError::EmptyComponent { index });
            }
            if part.contains(Self::SEPARATOR) {
                return Err(IdError::SeparatorInComponent {
                    component: part.clone(),
                    separator: Self::SEPARATOR,
                });
            }
        }
        Ok(())
    }

    /// The encoded form, suitable for durable storage.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// All components in order.
    #[must_use]
    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// Component at `index`, if present.
    #[must_use]
    pub fn part(&self, index: usize) -> Option<&str> {
        self.parts.get(index).map(String::as_str)
    }

    /// Number of components.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.parts.len()
    }

    /// Consume the id and return its components.
    #[must_use]
    pub fn into_parts(self) -> Vec<String> {
        self.parts
    }
}

impl Display for CompositeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encoded)
    }
}

impl FromStr for CompositeId {
    type Err = IdError;

    /// Parse without an arity check. Use [`CompositeId::decode`] when the
    /// resource type fixes the number of components.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let arity = s.split(Self::SEPARATOR).count();
        Self::decode(s, arity)
    }
}

impl Serialize for CompositeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encoded)
    }
}

impl<'de> Deserialize<'de> for CompositeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
