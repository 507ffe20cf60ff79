//! converge Core Library
//!
//! Shared types for the converge reconciliation core.
//!
//! # Modules
//!
//! - [`ids`] - Composite resource identifiers and correlation ids
//! - [`value`] - Typed attribute values (`Value`, `AttributeMap`)
//! - [`error`] - Identifier errors (`IdError`)
//!
//! # Example
//!
//! ```
//! use converge_core::{AttributeMap, CompositeId, Value};
//!
//! let id = CompositeId::encode(["ins-1", "readonly"]).unwrap();
//! assert_eq!(id.to_string(), "ins-1#readonly");
//!
//! let desired = AttributeMap::new()
//!     .with("instance_name", "analytics")
//!     .with("node_count", 3);
//! assert_eq!(desired.get("node_count"), Some(&Value::Int(3)));
//! ```

pub mod error;
pub mod ids;
pub mod value;

// Re-export main types for convenient access
pub use error::{IdError, IdResult};
pub use ids::{AttemptId, CompositeId, ParseIdError, ReconcileId};
pub use value::{AttributeMap, CompareMode, Value};
