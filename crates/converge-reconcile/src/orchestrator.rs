//! Reconciliation orchestrator.
//!
//! [`Reconciler`] drives one resource record towards a desired state:
//!
//! - **create**: create call, poll until the target status, attach tags,
//!   read back;
//! - **update**: check frozen fields against the last known state, refresh,
//!   diff, send field updates, poll, reconcile tags, read back;
//! - **delete**: delete call, poll until the resource is gone.
//!
//! Every mutation is followed by a poll, and `Converged` is only reported
//! after the poller saw the target status and a read confirmed it. Records
//! left mid-poll by a timeout or cancellation resume polling on the next
//! pass instead of repeating the mutation.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use converge_core::{CompositeId, ReconcileId};

use crate::classify::ErrorClassifier;
use crate::clock::Clock;
use crate::config::ReconcileSettings;
use crate::diff::{diff_against, Baseline, FieldDiff, FrozenFieldViolation};
use crate::error::{ExecuteError, PollError, ReconcileError, ReconcileResult, RemoteError};
use crate::operation::{DesiredState, ObservedState, ObservedStatus, RemoteRequest};
use crate::poller::{FinalStatus, StatePoller, StateTarget};
use crate::record::ResourceRecord;
use crate::resilience::{RetryExecutor, RetryPolicy};
use crate::schema::{ResourceSchema, SchemaProvider};
use crate::tags::{diff_tags, TagDelta, TagSet, TagSynchronizer};
use crate::traits::{RemoteClient, ResourceAdapter, TagClient};
use crate::types::{OperationKind, Phase, RecordState};

/// Result of one reconciliation pass.
#[derive(Debug)]
pub enum Outcome {
    /// Remote state matches the desired state.
    Converged,
    /// The resource no longer exists remotely.
    Deleted,
    /// The desired state changes fields that can only be set at creation.
    /// Nothing was sent.
    FrozenFieldViolation(Vec<FrozenFieldViolation>),
    CreateFailed(ReconcileError),
    UpdateFailed(ReconcileError),
    DeleteFailed(ReconcileError),
    /// A deadline passed; the remote end state is unknown.
    TimedOut {
        phase: Phase,
        error: ReconcileError,
    },
    /// The caller cancelled; the remote end state is unknown.
    Cancelled { phase: Phase },
    /// The request or record is unusable as given. Nothing was sent.
    Invalid(ReconcileError),
    /// The record was tainted by an earlier fatal error.
    Unusable,
}

impl Outcome {
    /// Check if the pass reached its goal.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Converged | Outcome::Deleted)
    }

    /// Whether running the same pass again may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Outcome::TimedOut { .. } | Outcome::Cancelled { .. } => true,
            Outcome::CreateFailed(e) | Outcome::UpdateFailed(e) | Outcome::DeleteFailed(e) => {
                e.is_retryable()
            }
            _ => false,
        }
    }

    /// The error behind a failed outcome.
    #[must_use]
    pub fn error(&self) -> Option<&ReconcileError> {
        match self {
            Outcome::CreateFailed(e)
            | Outcome::UpdateFailed(e)
            | Outcome::DeleteFailed(e)
            | Outcome::Invalid(e)
            | Outcome::TimedOut { error: e, .. } => Some(e),
            _ => None,
        }
    }

    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Converged => "converged",
            Outcome::Deleted => "deleted",
            Outcome::FrozenFieldViolation(_) => "frozen_field_violation",
            Outcome::CreateFailed(_) => "create_failed",
            Outcome::UpdateFailed(_) => "update_failed",
            Outcome::DeleteFailed(_) => "delete_failed",
            Outcome::TimedOut { .. } => "timed_out",
            Outcome::Cancelled { .. } => "cancelled",
            Outcome::Invalid(_) => "invalid",
            Outcome::Unusable => "unusable",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::FrozenFieldViolation(violations) => {
                let fields: Vec<_> = violations.iter().map(|v| v.field.as_str()).collect();
                write!(f, "frozen fields changed: {}", fields.join(", "))
            }
            Outcome::TimedOut { phase, error } => write!(f, "{phase} timed out: {error}"),
            Outcome::Cancelled { phase } => write!(f, "{phase} cancelled"),
            Outcome::CreateFailed(e)
            | Outcome::UpdateFailed(e)
            | Outcome::DeleteFailed(e)
            | Outcome::Invalid(e) => write!(f, "{}: {e}", self.as_str()),
            _ => write!(f, "{}", self.as_str()),
        }
    }
}

/// Reconciles resource records against a remote control plane.
///
/// Collaborators are shared and immutable; one `Reconciler` can serve many
/// records concurrently, each pass being sequential.
#[derive(Clone)]
pub struct Reconciler {
    client: Arc<dyn RemoteClient>,
    tag_client: Arc<dyn TagClient>,
    schemas: Arc<dyn SchemaProvider>,
    executor: RetryExecutor,
    settings: ReconcileSettings,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("executor", &self.executor)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Create a reconciler using the tokio clock and the default classifier.
    pub fn new(
        client: Arc<dyn RemoteClient>,
        tag_client: Arc<dyn TagClient>,
        schemas: Arc<dyn SchemaProvider>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            client,
            tag_client,
            schemas,
            executor: RetryExecutor::default(),
            settings,
        }
    }

    /// Use a different clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.executor = RetryExecutor::new(clock, self.executor.classifier().clone());
        self
    }

    /// Use a different error classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.executor = RetryExecutor::new(self.executor.clock().clone(), classifier);
        self
    }

    /// The settings in use.
    pub fn settings(&self) -> &ReconcileSettings {
        &self.settings
    }

    /// Drive `record` towards `desired`.
    ///
    /// Returns the updated record, which the caller should persist whatever
    /// the outcome, together with the outcome of the pass.
    #[instrument(
        skip_all,
        fields(
            reconcile_id = %ReconcileId::new(),
            resource_type = adapter.resource_type(),
            local_id = ?record.local_id,
            state = %record.state,
        )
    )]
    pub async fn reconcile(
        &self,
        adapter: &dyn ResourceAdapter,
        mut record: ResourceRecord,
        desired: DesiredState,
        cancel: &CancellationToken,
    ) -> (ResourceRecord, Outcome) {
        let outcome = self.run_reconcile(adapter, &mut record, &desired, cancel).await;
        log_outcome(&record, &outcome);
        (record, outcome)
    }

    /// Delete the remote resource behind `record` and wait until it is gone.
    #[instrument(
        skip_all,
        fields(
            reconcile_id = %ReconcileId::new(),
            resource_type = adapter.resource_type(),
            local_id = ?record.local_id,
            state = %record.state,
        )
    )]
    pub async fn delete(
        &self,
        adapter: &dyn ResourceAdapter,
        mut record: ResourceRecord,
        cancel: &CancellationToken,
    ) -> (ResourceRecord, Outcome) {
        let outcome = self.run_delete(adapter, &mut record, cancel).await;
        log_outcome(&record, &outcome);
        (record, outcome)
    }

    async fn run_reconcile(
        &self,
        adapter: &dyn ResourceAdapter,
        record: &mut ResourceRecord,
        desired: &DesiredState,
        cancel: &CancellationToken,
    ) -> Outcome {
        if record.tainted {
            return Outcome::Unusable;
        }
        let Some(schema) = self.schemas.field_classification(adapter.resource_type()) else {
            return Outcome::Invalid(ReconcileError::UnknownResourceType {
                resource_type: adapter.resource_type().to_string(),
            });
        };
        let id = match checked_id(adapter, record) {
            Ok(id) => id,
            Err(e) => return Outcome::Invalid(e),
        };

        match (record.state, id) {
            (RecordState::Deleting | RecordState::Polling(Phase::Delete), _) => {
                Outcome::Invalid(ReconcileError::InvalidState {
                    state: record.state.to_string(),
                    action: "be reconciled while a delete is pending".to_string(),
                })
            }
            (_, None) => {
                // Validate the desired fields before anything is created.
                if let Err(e) = diff_against(
                    &desired.attributes,
                    &Baseline::observed(&record.last_observed.attributes),
                    &schema,
                ) {
                    return Outcome::Invalid(e.into());
                }
                self.create(adapter, record, desired, cancel).await
            }
            (
                RecordState::Creating
                | RecordState::Polling(Phase::Create)
                | RecordState::CreateFailed,
                Some(id),
            ) => self.finish_create(adapter, record, &id, cancel).await,
            (RecordState::Polling(Phase::Update), Some(id)) => {
                self.finish_update(adapter, record, &id, cancel).await
            }
            (_, Some(id)) => self.update(adapter, &schema, record, desired, &id, cancel).await,
        }
    }

    async fn create(
        &self,
        adapter: &dyn ResourceAdapter,
        record: &mut ResourceRecord,
        desired: &DesiredState,
        cancel: &CancellationToken,
    ) -> Outcome {
        if let Err(e) = record.transition(RecordState::Creating) {
            return Outcome::Invalid(e);
        }

        let request = adapter.create_request(desired);
        let response = match self
            .call(&request, OperationKind::Write, &self.settings.write_policy(), cancel)
            .await
        {
            Ok(response) => response,
            Err(e) => return self.fail(record, Phase::Create, e.into()),
        };

        let id = match adapter
            .parse_create_response(&response, desired)
            .map_err(|source| ReconcileError::Response {
                operation: request.action.clone(),
                source,
            })
            .and_then(|parts| CompositeId::encode(parts).map_err(ReconcileError::from))
        {
            Ok(id) => id,
            Err(e) => return self.fail(record, Phase::Create, e),
        };

        info!(id = %id, "Resource created");
        record.local_id = Some(id.clone());
        record.desired = desired.clone();
        self.finish_create(adapter, record, &id, cancel).await
    }

    async fn finish_create(
        &self,
        adapter: &dyn ResourceAdapter,
        record: &mut ResourceRecord,
        id: &CompositeId,
        cancel: &CancellationToken,
    ) -> Outcome {
        if let Err(e) = record.transition(RecordState::Polling(Phase::Create)) {
            return Outcome::Invalid(e);
        }
        if let Err(e) = self
            .poll(adapter, id, &adapter.create_target(), "await create", cancel)
            .await
        {
            return self.fail(record, Phase::Create, e.into());
        }
        if let Err(e) = self.apply_tags(adapter, record, id, cancel).await {
            return self.fail(record, Phase::Create, e);
        }
        self.observe(adapter, record, id, Phase::Create, cancel).await
    }

    async fn update(
        &self,
        adapter: &dyn ResourceAdapter,
        schema: &ResourceSchema,
        record: &mut ResourceRecord,
        desired: &DesiredState,
        id: &CompositeId,
        cancel: &CancellationToken,
    ) -> Outcome {
        if let Err(e) = record.transition(RecordState::Diffing) {
            return Outcome::Invalid(e);
        }

        // Frozen fields are checked against the last known state before any
        // remote call is made.
        match self.field_diff(record, desired, schema) {
            Ok(diff) if !diff.is_applicable() => {
                return Outcome::FrozenFieldViolation(diff.violations);
            }
            Ok(_) => {}
            Err(e) => return Outcome::Invalid(e),
        }

        if let Err(e) = record.transition(RecordState::Observing) {
            return Outcome::Invalid(e);
        }
        match self.refresh(adapter, id, cancel).await {
            Ok(Some(observed)) => {
                record.tags = observed.tags.clone();
                record.last_observed = observed;
            }
            Ok(None) => {
                info!(id = %id, "Resource disappeared remotely, re-creating");
                if let Err(e) = record.transition(RecordState::Absent) {
                    return Outcome::Invalid(e);
                }
                record.clear_remote();
                return self.create(adapter, record, desired, cancel).await;
            }
            Err(e) => return self.fail(record, Phase::Update, e),
        }

        if let Err(e) = record.transition(RecordState::Diffing) {
            return Outcome::Invalid(e);
        }
        let diff = match self.field_diff(record, desired, schema) {
            Ok(diff) if !diff.is_applicable() => {
                return Outcome::FrozenFieldViolation(diff.violations);
            }
            Ok(diff) => diff,
            Err(e) => return Outcome::Invalid(e),
        };
        let tag_delta = self.tag_delta(adapter, id, &desired.tags, record);

        if diff.updates.is_empty() && tag_delta.is_empty() {
            record.desired = desired.clone();
            if let Err(e) = record.transition(RecordState::Steady) {
                return Outcome::Invalid(e);
            }
            return Outcome::Converged;
        }

        if let Err(e) = record.transition(RecordState::Updating) {
            return Outcome::Invalid(e);
        }
        let write_policy = self.settings.write_policy();
        for request in adapter.update_requests(id, &diff.updates) {
            if let Err(e) = self
                .call(&request, OperationKind::Write, &write_policy, cancel)
                .await
            {
                return self.fail(record, Phase::Update, e.into());
            }
        }
        info!(
            id = %id,
            fields = ?diff.updated_fields().collect::<Vec<_>>(),
            "Field updates sent"
        );
        record.desired = desired.clone();

        if diff.updates.is_empty() {
            // Only tags changed; the primary resource has nothing to settle.
            if let Err(e) = self.apply_tags(adapter, record, id, cancel).await {
                return self.fail(record, Phase::Update, e);
            }
            return self.observe(adapter, record, id, Phase::Update, cancel).await;
        }
        self.finish_update(adapter, record, id, cancel).await
    }

    async fn finish_update(
        &self,
        adapter: &dyn ResourceAdapter,
        record: &mut ResourceRecord,
        id: &CompositeId,
        cancel: &CancellationToken,
    ) -> Outcome {
        if let Err(e) = record.transition(RecordState::Polling(Phase::Update)) {
            return Outcome::Invalid(e);
        }
        if let Err(e) = self
            .poll(adapter, id, &adapter.update_target(), "await update", cancel)
            .await
        {
            return self.fail(record, Phase::Update, e.into());
        }
        if let Err(e) = self.apply_tags(adapter, record, id, cancel).await {
            return self.fail(record, Phase::Update, e);
        }
        self.observe(adapter, record, id, Phase::Update, cancel).await
    }

    async fn run_delete(
        &self,
        adapter: &dyn ResourceAdapter,
        record: &mut ResourceRecord,
        cancel: &CancellationToken,
    ) -> Outcome {
        let id = match checked_id(adapter, record) {
            Ok(Some(id)) => id,
            Ok(None) => {
                // Nothing was ever created, or its id was never learned.
                record.clear_remote();
                record.state = RecordState::Absent;
                return Outcome::Deleted;
            }
            Err(e) => return Outcome::Invalid(e),
        };

        if record.state != RecordState::Polling(Phase::Delete) {
            if let Err(e) = record.transition(RecordState::Deleting) {
                return Outcome::Invalid(e);
            }
            let request = adapter.delete_request(&id);
            match self
                .call(&request, OperationKind::Write, &self.settings.write_policy(), cancel)
                .await
            {
                Ok(_) => info!(id = %id, "Delete requested"),
                Err(e) if e.is_not_found() => info!(id = %id, "Resource already deleted"),
                Err(e) => return self.fail(record, Phase::Delete, e.into()),
            }
        }

        if let Err(e) = record.transition(RecordState::Polling(Phase::Delete)) {
            return Outcome::Invalid(e);
        }
        if let Err(e) = self
            .poll(adapter, &id, &adapter.delete_target(), "await delete", cancel)
            .await
        {
            return self.fail(record, Phase::Delete, e.into());
        }

        if let Err(e) = record.transition(RecordState::Absent) {
            return Outcome::Invalid(e);
        }
        record.clear_remote();
        record.desired = DesiredState::default();
        record.tainted = false;
        Outcome::Deleted
    }

    /// Read the resource and its tags, then settle in `Steady`.
    async fn observe(
        &self,
        adapter: &dyn ResourceAdapter,
        record: &mut ResourceRecord,
        id: &CompositeId,
        phase: Phase,
        cancel: &CancellationToken,
    ) -> Outcome {
        if let Err(e) = record.transition(RecordState::Observing) {
            return Outcome::Invalid(e);
        }
        let observed = match self.read(adapter, id, OperationKind::Read, cancel).await {
            Ok(Some(observed)) => observed,
            Ok(None) => {
                let error = ReconcileError::Vanished { id: id.to_string() };
                return self.fail(record, phase, error);
            }
            Err(e) => return self.fail(record, phase, e),
        };

        record.tags = observed.tags.clone();
        record.last_observed = observed;
        if let Err(e) = record.transition(RecordState::Steady) {
            return Outcome::Invalid(e);
        }
        Outcome::Converged
    }

    /// Existence-checked read used before diffing.
    async fn refresh(
        &self,
        adapter: &dyn ResourceAdapter,
        id: &CompositeId,
        cancel: &CancellationToken,
    ) -> ReconcileResult<Option<ObservedState>> {
        self.read(adapter, id, OperationKind::ExistenceCheck, cancel)
            .await
    }

    /// Read the resource, including its tags; `None` when it does not exist.
    async fn read(
        &self,
        adapter: &dyn ResourceAdapter,
        id: &CompositeId,
        kind: OperationKind,
        cancel: &CancellationToken,
    ) -> ReconcileResult<Option<ObservedState>> {
        let request = adapter.read_request(id);
        let read_policy = self.settings.read_policy();
        let response = match self.call(&request, kind, &read_policy, cancel).await {
            Ok(response) => response,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let parsed = adapter
            .parse_read_response(&response)
            .map_err(|source| ReconcileError::Response {
                operation: request.action.clone(),
                source,
            })?;
        let Some(mut observed) = parsed else {
            return Ok(None);
        };

        if let Some(resource) = adapter.tag_resource(id) {
            observed.tags = self
                .tag_synchronizer()
                .describe(&resource, &read_policy, cancel)
                .await?;
        }
        Ok(Some(observed))
    }

    /// Bring remote tags to `record.desired.tags`, starting from `record.tags`.
    async fn apply_tags(
        &self,
        adapter: &dyn ResourceAdapter,
        record: &ResourceRecord,
        id: &CompositeId,
        cancel: &CancellationToken,
    ) -> ReconcileResult<()> {
        let Some(resource) = adapter.tag_resource(id) else {
            return Ok(());
        };
        self.tag_synchronizer()
            .sync(
                &resource,
                &record.desired.tags,
                &record.tags,
                &self.settings.write_policy(),
                cancel,
            )
            .await?;
        Ok(())
    }

    fn tag_delta(
        &self,
        adapter: &dyn ResourceAdapter,
        id: &CompositeId,
        desired: &TagSet,
        record: &ResourceRecord,
    ) -> TagDelta {
        match adapter.tag_resource(id) {
            Some(_) => diff_tags(desired, &record.tags),
            None => TagDelta::default(),
        }
    }

    fn field_diff(
        &self,
        record: &ResourceRecord,
        desired: &DesiredState,
        schema: &ResourceSchema,
    ) -> ReconcileResult<FieldDiff> {
        let baseline = Baseline::with_applied(
            &record.last_observed.attributes,
            &record.desired.attributes,
        );
        Ok(diff_against(&desired.attributes, &baseline, schema)?)
    }

    async fn call(
        &self,
        request: &RemoteRequest,
        kind: OperationKind,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, ExecuteError> {
        let client = &*self.client;
        self.executor
            .execute(&request.action, kind, policy, cancel, move || {
                client.call(&request.action, request.payload.clone())
            })
            .await
    }

    async fn poll(
        &self,
        adapter: &dyn ResourceAdapter,
        id: &CompositeId,
        target: &StateTarget,
        operation: &str,
        cancel: &CancellationToken,
    ) -> Result<FinalStatus, PollError> {
        let client = &*self.client;
        let request = adapter.read_request(id);
        let request = &request;

        StatePoller::new(self.executor.clone())
            .await_state(
                operation,
                target,
                &self.settings.poll_policy(),
                cancel,
                move || async move {
                    let response = client.call(&request.action, request.payload.clone()).await?;
                    Ok::<_, RemoteError>(
                        adapter
                            .parse_read_response(&response)?
                            .map_or(ObservedStatus::Absent, |observed| observed.observed_status()),
                    )
                },
            )
            .await
    }

    fn tag_synchronizer(&self) -> TagSynchronizer {
        TagSynchronizer::new(self.tag_client.clone(), self.executor.clone())
    }

    /// Record a failed step and turn it into an outcome.
    fn fail(&self, record: &mut ResourceRecord, phase: Phase, error: ReconcileError) -> Outcome {
        if error.is_fatal() {
            warn!(error = %error, "Fatal error, record is now unusable");
            record.tainted = true;
        }
        if error.is_cancelled() {
            return Outcome::Cancelled { phase };
        }
        if error.is_timeout() {
            return Outcome::TimedOut { phase, error };
        }

        let failed = match phase {
            Phase::Create => RecordState::CreateFailed,
            Phase::Update => RecordState::UpdateFailed,
            Phase::Delete => RecordState::DeleteFailed,
        };
        if let Err(e) = record.transition(failed) {
            warn!(error = %e, "Could not record failure state");
        }
        match phase {
            Phase::Create => Outcome::CreateFailed(error),
            Phase::Update => Outcome::UpdateFailed(error),
            Phase::Delete => Outcome::DeleteFailed(error),
        }
    }
}

/// The record's id, checked against the adapter's arity.
fn checked_id(
    adapter: &dyn ResourceAdapter,
    record: &ResourceRecord,
) -> ReconcileResult<Option<CompositeId>> {
    record
        .local_id
        .as_ref()
        .map(|id| CompositeId::decode(id.as_str(), adapter.id_arity()))
        .transpose()
        .map_err(ReconcileError::from)
}

fn log_outcome(record: &ResourceRecord, outcome: &Outcome) {
    match outcome {
        Outcome::Converged | Outcome::Deleted => {
            info!(state = %record.state, outcome = outcome.as_str(), "Reconciliation finished");
        }
        Outcome::Cancelled { .. } => {
            info!(state = %record.state, "Reconciliation cancelled");
        }
        _ => {
            warn!(state = %record.state, outcome = %outcome, "Reconciliation did not converge");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_outcome_retryability() {
        let timed_out = Outcome::TimedOut {
            phase: Phase::Create,
            error: ReconcileError::from(PollError::Timeout {
                operation: "await create".to_string(),
                polls: 3,
                elapsed: Duration::from_secs(30),
                last_status: Some("Creating".to_string()),
            }),
        };
        assert!(timed_out.is_retryable());
        assert!(!timed_out.is_success());
        assert!(timed_out.to_string().starts_with("create timed out"));

        let invalid = Outcome::Invalid(ReconcileError::UnknownResourceType {
            resource_type: "x".to_string(),
        });
        assert!(!invalid.is_retryable());
        assert!(invalid.error().is_some());
        assert!(Outcome::Converged.is_success());
        assert!(!Outcome::Unusable.is_retryable());
    }

    #[test]
    fn test_frozen_outcome_lists_fields() {
        let outcome = Outcome::FrozenFieldViolation(vec![FrozenFieldViolation {
            field: "zone".to_string(),
            current: "a".into(),
            desired: "b".into(),
        }]);
        assert_eq!(outcome.to_string(), "frozen fields changed: zone");
        assert!(!outcome.is_retryable());
    }
}
