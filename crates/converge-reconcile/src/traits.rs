//! Collaborator traits
//!
//! The reconciliation core talks to the outside world only through these
//! seams: a generic remote call, the tag service, and a per-resource adapter
//! that knows how to phrase requests and read responses for one resource
//! type.

use std::collections::BTreeSet;

use async_trait::async_trait;

use converge_core::CompositeId;

use crate::diff::FieldUpdate;
use crate::error::RemoteResult;
use crate::operation::{DesiredState, ObservedState, RemoteRequest};
use crate::poller::StateTarget;
use crate::tags::{TagResource, TagSet};

/// Transport to the remote control plane.
///
/// Implementations sign, send and decode a single API call. They must not
/// retry; retrying is the executor's job.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Invoke `action` with a JSON payload and return the JSON response body.
    async fn call(
        &self,
        action: &str,
        payload: serde_json::Value,
    ) -> RemoteResult<serde_json::Value>;
}

/// Access to the tag service.
#[async_trait]
pub trait TagClient: Send + Sync {
    /// Read the tags attached to a resource.
    async fn describe_tags(&self, resource: &TagResource) -> RemoteResult<TagSet>;

    /// Upsert the given key/value pairs.
    async fn replace_tags(&self, resource: &TagResource, tags: &TagSet) -> RemoteResult<()>;

    /// Remove the given keys.
    async fn delete_tags(
        &self,
        resource: &TagResource,
        keys: &BTreeSet<String>,
    ) -> RemoteResult<()>;
}

/// Per-resource glue between the reconciliation core and one remote API.
///
/// Adapters are pure: they build requests and parse responses but never
/// perform I/O themselves.
pub trait ResourceAdapter: Send + Sync {
    /// Resource type name, used to look up the schema.
    fn resource_type(&self) -> &str;

    /// Number of components in this resource's local identifier.
    fn id_arity(&self) -> usize {
        1
    }

    /// Request that creates the resource.
    fn create_request(&self, desired: &DesiredState) -> RemoteRequest;

    /// Identifier components from the create response.
    ///
    /// Composite resources usually combine request fields with the id the
    /// remote assigned, which is why the desired state is passed along.
    fn parse_create_response(
        &self,
        response: &serde_json::Value,
        desired: &DesiredState,
    ) -> RemoteResult<Vec<String>>;

    /// Request that reads the resource.
    fn read_request(&self, id: &CompositeId) -> RemoteRequest;

    /// Observed state from a read response; `None` when the resource is gone.
    fn parse_read_response(&self, response: &serde_json::Value)
        -> RemoteResult<Option<ObservedState>>;

    /// Requests that apply the given field updates, in order.
    ///
    /// Several fields may share one request.
    fn update_requests(&self, id: &CompositeId, updates: &[FieldUpdate]) -> Vec<RemoteRequest>;

    /// Request that deletes the resource.
    fn delete_request(&self, id: &CompositeId) -> RemoteRequest;

    /// Status set that confirms a create.
    fn create_target(&self) -> StateTarget;

    /// Status set that confirms an update.
    fn update_target(&self) -> StateTarget {
        self.create_target()
    }

    /// Status set that confirms a delete.
    fn delete_target(&self) -> StateTarget {
        StateTarget::absent()
    }

    /// Address on the tag service, for resources that support tags.
    fn tag_resource(&self, _id: &CompositeId) -> Option<TagResource> {
        None
    }
}
