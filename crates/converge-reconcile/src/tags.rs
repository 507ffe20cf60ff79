//! Tag reconciliation.
//!
//! Tags live on a separate tag service and are changed with two independent
//! calls: one that upserts key/value pairs and one that removes keys. The two
//! calls are not atomic, so a failure between them is reported as
//! [`TagSyncError::PartiallyApplied`] and the next diff picks up the rest.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{RemoteError, RemoteResult, TagSyncError};
use crate::resilience::{RetryExecutor, RetryPolicy};
use crate::traits::{RemoteClient, TagClient};
use crate::types::OperationKind;

/// Tag key to value mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet {
    tags: BTreeMap<String, String>,
}

impl TagSet {
    /// Create a new empty tag set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a tag.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    /// Set a tag using builder pattern.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Get a tag value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Check if a key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.tags.contains_key(key)
    }

    /// All keys, in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.tags.keys().map(String::as_str)
    }

    /// Get the number of tags.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Check if there are no tags.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Iterate over key/value pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            tags: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Changes needed to turn the observed tags into the desired tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDelta {
    /// Pairs to upsert (new keys and keys whose value changed).
    pub to_replace: TagSet,
    /// Keys present remotely but not desired.
    pub to_delete: BTreeSet<String>,
}

impl TagDelta {
    /// Check if no tag call is needed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_replace.is_empty() && self.to_delete.is_empty()
    }
}

/// Compute the tag changes from `observed` to `desired`.
#[must_use]
pub fn diff_tags(desired: &TagSet, observed: &TagSet) -> TagDelta {
    let to_replace = desired
        .iter()
        .filter(|(key, value)| observed.get(key) != Some(*value))
        .collect();
    let to_delete = observed
        .keys()
        .filter(|key| !desired.contains_key(key))
        .map(str::to_string)
        .collect();

    TagDelta {
        to_replace,
        to_delete,
    }
}

/// Address of a resource on the tag service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagResource {
    pub service: String,
    pub resource_type: String,
    /// Empty for global resources.
    pub region: String,
    pub id: String,
}

impl TagResource {
    /// Create a tag resource address.
    pub fn new(
        service: impl Into<String>,
        resource_type: impl Into<String>,
        region: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            resource_type: resource_type.into(),
            region: region.into(),
            id: id.into(),
        }
    }

    /// Resource name understood by the tag service.
    #[must_use]
    pub fn resource_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TagResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}/{}",
            self.service, self.region, self.resource_type, self.id
        )
    }
}

/// Applies tag deltas through a [`TagClient`], with retries.
#[derive(Clone)]
pub struct TagSynchronizer {
    client: Arc<dyn TagClient>,
    executor: RetryExecutor,
}

impl fmt::Debug for TagSynchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagSynchronizer")
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl TagSynchronizer {
    /// Create a new synchronizer.
    pub fn new(client: Arc<dyn TagClient>, executor: RetryExecutor) -> Self {
        Self { client, executor }
    }

    /// Read the tags currently attached to `resource`.
    pub async fn describe(
        &self,
        resource: &TagResource,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<TagSet, TagSyncError> {
        let client = &*self.client;
        self.executor
            .execute("describe tags", OperationKind::Read, policy, cancel, move || {
                client.describe_tags(resource)
            })
            .await
            .map_err(|source| TagSyncError::Describe {
                resource: resource.resource_name(),
                source,
            })
    }

    /// Apply `delta`: replace first, then delete.
    ///
    /// An empty half of the delta makes no call.
    pub async fn apply(
        &self,
        resource: &TagResource,
        delta: &TagDelta,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<(), TagSyncError> {
        let client = &*self.client;
        let replace = &delta.to_replace;
        let delete = &delta.to_delete;

        if !replace.is_empty() {
            self.executor
                .execute("replace tags", OperationKind::Write, policy, cancel, move || {
                    client.replace_tags(resource, replace)
                })
                .await
                .map_err(|source| TagSyncError::Replace {
                    resource: resource.resource_name(),
                    source,
                })?;
            debug!(resource = %resource, count = replace.len(), "Replaced tags");
        }

        if !delete.is_empty() {
            self.executor
                .execute("delete tags", OperationKind::Write, policy, cancel, move || {
                    client.delete_tags(resource, delete)
                })
                .await
                .map_err(|source| TagSyncError::PartiallyApplied {
                    resource: resource.resource_name(),
                    replaced: replace.len(),
                    source,
                })?;
            debug!(resource = %resource, count = delete.len(), "Deleted tags");
        }

        Ok(())
    }

    /// Bring the tags of `resource` from `observed` to `desired`.
    ///
    /// Returns the delta that was applied.
    pub async fn sync(
        &self,
        resource: &TagResource,
        desired: &TagSet,
        observed: &TagSet,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<TagDelta, TagSyncError> {
        let delta = diff_tags(desired, observed);
        if delta.is_empty() {
            return Ok(delta);
        }
        self.apply(resource, &delta, policy, cancel).await?;
        info!(
            resource = %resource,
            replaced = delta.to_replace.len(),
            deleted = delta.to_delete.len(),
            "Tags reconciled"
        );
        Ok(delta)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TagEntry {
    tag_key: String,
    tag_value: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeTagsResponse {
    #[serde(default)]
    tags: Vec<TagEntry>,
}

/// [`TagClient`] that talks to the tag service through a [`RemoteClient`].
#[derive(Clone)]
pub struct RemoteTagClient {
    client: Arc<dyn RemoteClient>,
}

impl fmt::Debug for RemoteTagClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTagClient").finish_non_exhaustive()
    }
}

impl RemoteTagClient {
    pub const DESCRIBE_ACTION: &'static str = "DescribeResourceTags";
    pub const REPLACE_ACTION: &'static str = "TagResources";
    pub const DELETE_ACTION: &'static str = "UnTagResources";

    /// Create a tag client over a remote client.
    pub fn new(client: Arc<dyn RemoteClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TagClient for RemoteTagClient {
    async fn describe_tags(&self, resource: &TagResource) -> RemoteResult<TagSet> {
        let response = self
            .client
            .call(
                Self::DESCRIBE_ACTION,
                json!({ "ResourceName": resource.resource_name() }),
            )
            .await?;
        let parsed: DescribeTagsResponse = serde_json::from_value(response)
            .map_err(|e| RemoteError::decode(format!("tag list: {e}")))?;
        Ok(parsed
            .tags
            .into_iter()
            .map(|entry| (entry.tag_key, entry.tag_value))
            .collect())
    }

    async fn replace_tags(&self, resource: &TagResource, tags: &TagSet) -> RemoteResult<()> {
        let tags: Vec<_> = tags
            .iter()
            .map(|(k, v)| json!({ "TagKey": k, "TagValue": v }))
            .collect();
        self.client
            .call(
                Self::REPLACE_ACTION,
                json!({ "ResourceList": [resource.resource_name()], "Tags": tags }),
            )
            .await?;
        Ok(())
    }

    async fn delete_tags(
        &self,
        resource: &TagResource,
        keys: &BTreeSet<String>,
    ) -> RemoteResult<()> {
        self.client
            .call(
                Self::DELETE_ACTION,
                json!({ "ResourceList": [resource.resource_name()], "TagKeys": keys }),
            )
            .await?;
        Ok(())
    }
}
