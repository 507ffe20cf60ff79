//! # Reconciliation Core
//!
//! Drives remote cloud resources towards a declared state against an
//! eventually-consistent control plane that throttles, answers
//! asynchronously and drifts out-of-band.
//!
//! ## Architecture
//!
//! Components, leaf first:
//!
//! - [`ErrorClassifier`] - remote error code + operation kind to verdict
//! - [`RetryExecutor`] - exponential backoff under a deadline
//! - [`StatePoller`] - waits for a target status
//! - [`diff`](diff::diff) - minimal field updates and frozen-field violations
//! - [`TagSynchronizer`] - tag set difference applied in two calls
//! - [`Reconciler`] - the create / update / delete state machine
//!
//! The outside world is reached only through [`RemoteClient`], [`TagClient`],
//! [`SchemaProvider`] and a per-resource [`ResourceAdapter`].
//!
//! ## Example
//!
//! ```ignore
//! use converge_reconcile::prelude::*;
//!
//! let reconciler = Reconciler::new(client, tag_client, schemas, ReconcileSettings::default());
//!
//! let desired = DesiredState::new(
//!     AttributeMap::new()
//!         .with("instance_name", "analytics")
//!         .with("zone", "ap-guangzhou-3"),
//! );
//! let (record, outcome) = reconciler
//!     .reconcile(&adapter, ResourceRecord::new(), desired, &CancellationToken::new())
//!     .await;
//! assert!(outcome.is_success());
//! ```
//!
//! ## Crate Organization
//!
//! - [`types`] - Operation kinds, verdicts and record states
//! - [`error`] - Error types for each layer
//! - [`classify`] - Error classification
//! - [`clock`] - Time source (`TokioClock`, `ManualClock`)
//! - [`resilience`] - Retry policy and executor
//! - [`poller`] - State poller
//! - [`schema`] - Field classification
//! - [`diff`] - Drift detection
//! - [`tags`] - Tag reconciliation
//! - [`operation`] - Desired / observed state and requests
//! - [`record`] - Persistent resource record
//! - [`traits`] - Collaborator traits
//! - [`config`] - Settings
//! - [`orchestrator`] - The reconciler

pub mod classify;
pub mod clock;
pub mod config;
pub mod diff;
pub mod error;
pub mod operation;
pub mod orchestrator;
pub mod poller;
pub mod record;
pub mod resilience;
pub mod schema;
pub mod tags;
pub mod traits;
pub mod types;

pub use classify::ErrorClassifier;
pub use orchestrator::{Outcome, Reconciler};
pub use poller::StatePoller;
pub use resilience::RetryExecutor;
pub use schema::SchemaProvider;
pub use tags::TagSynchronizer;
pub use traits::{RemoteClient, ResourceAdapter, TagClient};

/// Prelude module for convenient imports.
///
/// ```
/// use converge_reconcile::prelude::*;
/// ```
pub mod prelude {
    // Shared value types
    pub use converge_core::{AttributeMap, CompareMode, CompositeId, ReconcileId, Value};

    // Types and enums
    pub use crate::types::{ErrorVerdict, OperationKind, Phase, RecordState};

    // Error handling
    pub use crate::error::{
        ConfigError, DiffError, ExecuteError, PollError, ReconcileError, ReconcileResult,
        RemoteError, RemoteResult, TagSyncError,
    };

    // Retry and polling
    pub use crate::classify::ErrorClassifier;
    pub use crate::clock::{Clock, ManualClock, TokioClock};
    pub use crate::poller::{FinalStatus, PollPolicy, StatePoller, StateTarget};
    pub use crate::resilience::{RetryExecutor, RetryPolicy};

    // Drift
    pub use crate::diff::{
        diff, diff_against, Baseline, FieldDiff, FieldUpdate, FrozenFieldViolation,
    };
    pub use crate::schema::{
        FieldClassification, FieldSchema, ResourceSchema, SchemaProvider, StaticSchemaProvider,
    };
    pub use crate::tags::{
        diff_tags, RemoteTagClient, TagDelta, TagResource, TagSet, TagSynchronizer,
    };

    // State and records
    pub use crate::operation::{DesiredState, ObservedState, ObservedStatus, RemoteRequest};
    pub use crate::record::ResourceRecord;

    // Collaborators
    pub use crate::traits::{RemoteClient, ResourceAdapter, TagClient};

    // Configuration
    pub use crate::config::ReconcileSettings;

    // Orchestration
    pub use crate::orchestrator::{Outcome, Reconciler};

    pub use tokio_util::sync::CancellationToken;
}

// Re-export async_trait for collaborator implementors
pub use async_trait::async_trait;
