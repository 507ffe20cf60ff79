//! Reconciliation operation types
//!
//! Desired and observed resource state, remote request envelopes and the
//! status shape the poller works with.

use serde::{Deserialize, Serialize};
use std::fmt;

use converge_core::AttributeMap;

use crate::tags::TagSet;

/// What the caller wants the remote resource to look like.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredState {
    /// Field values, keyed by schema field name.
    #[serde(default)]
    pub attributes: AttributeMap,
    /// Tags to attach to the resource.
    #[serde(default)]
    pub tags: TagSet,
}

impl DesiredState {
    /// Create desired state from attributes, with no tags.
    #[must_use]
    pub fn new(attributes: AttributeMap) -> Self {
        Self {
            attributes,
            tags: TagSet::new(),
        }
    }

    /// Set tags using builder pattern.
    #[must_use]
    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags = tags;
        self
    }
}

/// What a read of the remote resource returned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedState {
    /// Field values as reported remotely.
    #[serde(default)]
    pub attributes: AttributeMap,
    /// Lifecycle status string, for resources that expose one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Tags currently attached.
    #[serde(default)]
    pub tags: TagSet,
}

impl ObservedState {
    /// Create observed state from attributes.
    #[must_use]
    pub fn new(attributes: AttributeMap) -> Self {
        Self {
            attributes,
            status: None,
            tags: TagSet::new(),
        }
    }

    /// Set status using builder pattern.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Whether nothing has been observed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.status.is_none() && self.tags.is_empty()
    }

    /// Status as seen by the poller.
    #[must_use]
    pub fn observed_status(&self) -> ObservedStatus {
        ObservedStatus::Present(self.status.clone().unwrap_or_default())
    }
}

/// Result of one status read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservedStatus {
    /// The resource does not exist remotely.
    Absent,
    /// The resource exists with the given status (empty when it has none).
    Present(String),
}

impl ObservedStatus {
    /// Create a present status.
    pub fn present(status: impl Into<String>) -> Self {
        ObservedStatus::Present(status.into())
    }

    /// Check if the resource was found.
    #[must_use]
    pub fn is_present(&self) -> bool {
        matches!(self, ObservedStatus::Present(_))
    }

    /// The status string, if present.
    #[must_use]
    pub fn status(&self) -> Option<&str> {
        match self {
            ObservedStatus::Absent => None,
            ObservedStatus::Present(s) => Some(s),
        }
    }
}

impl fmt::Display for ObservedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObservedStatus::Absent => write!(f, "<absent>"),
            ObservedStatus::Present(s) if s.is_empty() => write!(f, "<present>"),
            ObservedStatus::Present(s) => write!(f, "{s}"),
        }
    }
}

/// A single remote API call: action name plus JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRequest {
    pub action: String,
    pub payload: serde_json::Value,
}

impl RemoteRequest {
    /// Create a request with an empty object payload.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            payload: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Create a request with the given payload.
    pub fn with_payload(action: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            action: action.into(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_observed_status_from_state() {
        let observed = ObservedState::new(AttributeMap::new()).with_status("Running");
        assert_eq!(observed.observed_status(), ObservedStatus::present("Running"));

        let observed = ObservedState::new(AttributeMap::new().with("name", "a"));
        assert_eq!(observed.observed_status(), ObservedStatus::present(""));
        assert!(!observed.is_empty());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ObservedStatus::Absent.to_string(), "<absent>");
        assert_eq!(ObservedStatus::present("").to_string(), "<present>");
        assert_eq!(ObservedStatus::present("Serving").to_string(), "Serving");
    }

    #[test]
    fn test_desired_state_deserializes_without_tags() {
        let desired: DesiredState =
            serde_json::from_value(json!({"attributes": {"instance_name": "db"}})).unwrap();
        assert_eq!(desired.attributes.get_str("instance_name"), Some("db"));
        assert!(desired.tags.is_empty());
    }

    #[test]
    fn test_request_payload() {
        let req = RemoteRequest::with_payload("DeleteInstance", json!({"InstanceId": "ins-1"}));
        assert_eq!(req.action, "DeleteInstance");
        assert_eq!(req.payload["InstanceId"], "ins-1");
        assert_eq!(RemoteRequest::new("DescribeZones").payload, json!({}));
    }
}
