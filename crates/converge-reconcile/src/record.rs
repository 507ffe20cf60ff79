//! Local resource records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use converge_core::CompositeId;

use crate::error::{ReconcileError, ReconcileResult};
use crate::operation::{DesiredState, ObservedState};
use crate::tags::TagSet;
use crate::types::RecordState;

/// Everything the caller keeps between reconciliations of one resource.
///
/// Only `local_id` is needed to address the resource again; the rest lets
/// drift be computed without an extra read and lets interrupted passes
/// resume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<CompositeId>,

    /// Desired state applied by the last successful pass.
    #[serde(default)]
    pub desired: DesiredState,

    #[serde(default)]
    pub last_observed: ObservedState,

    /// Tags observed after the last successful pass.
    #[serde(default)]
    pub tags: TagSet,

    #[serde(default)]
    pub state: RecordState,

    /// Set after a fatal error; the record must not be reconciled again.
    #[serde(default)]
    pub tainted: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ResourceRecord {
    /// Create a record for a resource that does not exist yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record for an existing resource known only by its id.
    ///
    /// The first pass reads the resource before diffing.
    #[must_use]
    pub fn import(id: CompositeId) -> Self {
        Self {
            local_id: Some(id),
            state: RecordState::Steady,
            ..Self::default()
        }
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, next: RecordState) -> ReconcileResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(ReconcileError::InvalidState {
                state: self.state.to_string(),
                action: format!("move to {next}"),
            });
        }
        if self.state != next {
            debug!(from = %self.state, to = %next, "Record state transition");
        }
        self.state = next;
        self.updated_at = Some(Utc::now());
        Ok(())
    }

    /// Forget the remote resource.
    pub fn clear_remote(&mut self) {
        self.local_id = None;
        self.last_observed = ObservedState::default();
        self.tags = TagSet::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Phase;
    use converge_core::AttributeMap;

    #[test]
    fn test_transition_updates_timestamp() {
        let mut record = ResourceRecord::new();
        assert!(record.updated_at.is_none());
        record.transition(RecordState::Creating).unwrap();
        assert_eq!(record.state, RecordState::Creating);
        assert!(record.updated_at.is_some());
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let mut record = ResourceRecord::new();
        let err = record.transition(RecordState::Steady).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_STATE");
        assert_eq!(record.state, RecordState::Absent);
    }

    #[test]
    fn test_import_starts_steady() {
        let id = CompositeId::encode(["cdwpg-1"]).unwrap();
        let record = ResourceRecord::import(id.clone());
        assert_eq!(record.local_id, Some(id));
        assert!(record.state.can_transition_to(RecordState::Diffing));
    }

    #[test]
    fn test_record_round_trips_through_json() {
        let mut record = ResourceRecord::import(CompositeId::encode(["ins-1", "db"]).unwrap());
        record.state = RecordState::Polling(Phase::Update);
        record.desired = DesiredState::new(AttributeMap::new().with("instance_name", "db"))
            .with_tags(TagSet::new().with("env", "prod"));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["local_id"], "ins-1#db");
        assert_eq!(json["state"], serde_json::json!({"polling": "update"}));

        let back: ResourceRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_minimal_record_deserializes() {
        let record: ResourceRecord =
            serde_json::from_str(r#"{"local_id": "ins-1"}"#).unwrap();
        assert_eq!(record.local_id.unwrap().as_str(), "ins-1");
        assert_eq!(record.state, RecordState::Absent);
        assert!(!record.tainted);
    }
}
