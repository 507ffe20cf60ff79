//! Common test utilities for reconciliation tests.
//!
//! Provides an in-memory cloud that hosts a single kind of instance, an
//! in-memory tag service and the adapter that connects the two to the
//! reconciler. Time runs on a [`ManualClock`] unless a test says otherwise.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use serde_json::{json, Value as Json};

use converge_reconcile::prelude::*;

static INIT: Once = Once::new();

/// Initialize logging for tests (once).
pub fn init_test_logging() {
    INIT.call_once(|| {
        // Only initialize if RUST_LOG is set
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

pub const CREATE: &str = "CreateInstance";
pub const DESCRIBE: &str = "DescribeInstance";
pub const MODIFY: &str = "ModifyInstanceAttribute";
pub const DELETE: &str = "DeleteInstance";

pub const RESOURCE_TYPE: &str = "test_instance";
pub const ZONE: &str = "ap-guangzhou-3";

// =============================================================================
// Mock cloud
// =============================================================================

/// An injected failure.
#[derive(Debug, Clone)]
pub enum Failure {
    Api(&'static str),
    Transport,
}

impl Failure {
    fn to_error(&self) -> RemoteError {
        match self {
            Failure::Api(code) => RemoteError::api(*code, "injected failure"),
            Failure::Transport => RemoteError::transport("connection reset by peer"),
        }
    }
}

#[derive(Debug)]
struct Instance {
    id: String,
    attributes: serde_json::Map<String, Json>,
    pending: VecDeque<String>,
    status: String,
    deleting: bool,
}

#[derive(Debug, Default)]
struct CloudState {
    instance: Option<Instance>,
    next_id: u32,
    create_statuses: Vec<String>,
    delete_statuses: Vec<String>,
    failures: HashMap<String, VecDeque<Failure>>,
}

/// In-memory control plane hosting at most one instance.
///
/// Each describe pops the next scripted status; once the script is exhausted
/// the instance reports `Running`. Deleted instances report `Deleting` once
/// (or their scripted delete statuses) and then disappear.
#[derive(Debug, Default)]
pub struct MockCloud {
    state: Mutex<CloudState>,
    calls: Mutex<Vec<String>>,
    cancel_after_describes: Mutex<Option<(usize, CancellationToken)>>,
}

impl MockCloud {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Statuses reported by the describes following a create.
    pub fn with_create_statuses(self, statuses: &[&str]) -> Self {
        self.state.lock().unwrap().create_statuses =
            statuses.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Statuses reported by the describes following a delete.
    pub fn with_delete_statuses(self, statuses: &[&str]) -> Self {
        self.state.lock().unwrap().delete_statuses =
            statuses.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Cancel `token` while serving the `count`-th describe from now.
    pub fn cancel_on_describe(&self, token: CancellationToken, count: usize) {
        *self.cancel_after_describes.lock().unwrap() = Some((count, token));
    }

    /// Fail the next `times` calls to `action`.
    pub fn fail(&self, action: &str, failure: Failure, times: usize) {
        let mut state = self.state.lock().unwrap();
        let queue = state.failures.entry(action.to_string()).or_default();
        queue.extend(std::iter::repeat(failure).take(times));
    }

    /// Drop any scripted statuses of the current instance.
    pub fn settle(&self) {
        if let Some(instance) = self.state.lock().unwrap().instance.as_mut() {
            instance.pending.clear();
        }
    }

    /// Script the statuses of the current instance.
    pub fn script_statuses(&self, statuses: &[&str]) {
        if let Some(instance) = self.state.lock().unwrap().instance.as_mut() {
            instance.pending = statuses.iter().map(|s| s.to_string()).collect();
        }
    }

    /// Change a field behind the reconciler's back.
    pub fn drift(&self, field: &str, value: Json) {
        if let Some(instance) = self.state.lock().unwrap().instance.as_mut() {
            instance.attributes.insert(field.to_string(), value);
        }
    }

    /// Delete the instance behind the reconciler's back.
    pub fn remove_instance(&self) {
        self.state.lock().unwrap().instance = None;
    }

    pub fn has_instance(&self) -> bool {
        self.state.lock().unwrap().instance.is_some()
    }

    pub fn field(&self, name: &str) -> Option<Json> {
        self.state
            .lock()
            .unwrap()
            .instance
            .as_ref()
            .and_then(|i| i.attributes.get(name).cloned())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, action: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|a| *a == action).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl RemoteClient for MockCloud {
    async fn call(&self, action: &str, payload: Json) -> RemoteResult<Json> {
        self.calls.lock().unwrap().push(action.to_string());
        if action == DESCRIBE {
            let mut hook = self.cancel_after_describes.lock().unwrap();
            let fire = match hook.as_mut() {
                Some((remaining, _)) => {
                    *remaining = remaining.saturating_sub(1);
                    *remaining == 0
                }
                None => false,
            };
            if fire {
                if let Some((_, token)) = hook.take() {
                    token.cancel();
                }
            }
        }
        let mut state = self.state.lock().unwrap();

        if let Some(failure) = state
            .failures
            .get_mut(action)
            .and_then(VecDeque::pop_front)
        {
            return Err(failure.to_error());
        }

        match action {
            CREATE => {
                state.next_id += 1;
                let id = format!("ins-{}", state.next_id);
                let attributes = payload["Attributes"]
                    .as_object()
                    .cloned()
                    .unwrap_or_default();
                let pending = state.create_statuses.iter().cloned().collect();
                state.instance = Some(Instance {
                    id: id.clone(),
                    attributes,
                    pending,
                    status: "Running".to_string(),
                    deleting: false,
                });
                Ok(json!({ "InstanceId": id, "RequestId": "req-create" }))
            }
            DESCRIBE => {
                let wanted = payload["InstanceId"].as_str().unwrap_or_default();
                let Some(instance) = state.instance.as_mut().filter(|i| i.id == wanted) else {
                    return Ok(json!({ "Instance": null }));
                };
                let status = match instance.pending.pop_front() {
                    Some(status) => status,
                    None if instance.deleting => {
                        state.instance = None;
                        return Ok(json!({ "Instance": null }));
                    }
                    None => instance.status.clone(),
                };
                let mut attributes = instance.attributes.clone();
                attributes.remove("admin_password");
                Ok(json!({
                    "Instance": {
                        "InstanceId": instance.id,
                        "Status": status,
                        "Attributes": attributes,
                    }
                }))
            }
            MODIFY => {
                let wanted = payload["InstanceId"].as_str().unwrap_or_default();
                let Some(instance) = state.instance.as_mut().filter(|i| i.id == wanted) else {
                    return Err(not_found());
                };
                if let Some(changes) = payload["Changes"].as_object() {
                    for (field, value) in changes {
                        instance.attributes.insert(field.clone(), value.clone());
                    }
                }
                instance.pending = VecDeque::from(["Modifying".to_string()]);
                Ok(json!({ "RequestId": "req-modify" }))
            }
            DELETE => {
                let wanted = payload["InstanceId"].as_str().unwrap_or_default();
                let pending = if state.delete_statuses.is_empty() {
                    VecDeque::from(["Deleting".to_string()])
                } else {
                    state.delete_statuses.iter().cloned().collect()
                };
                let Some(instance) = state.instance.as_mut().filter(|i| i.id == wanted) else {
                    return Err(not_found());
                };
                instance.deleting = true;
                instance.pending = pending;
                Ok(json!({ "RequestId": "req-delete" }))
            }
            other => Err(RemoteError::api(
                "InvalidParameter",
                format!("unknown action {other}"),
            )),
        }
    }
}

fn not_found() -> RemoteError {
    RemoteError::api("ResourceNotFound.InstanceNotExist", "no such instance")
}

// =============================================================================
// Mock tag service
// =============================================================================

/// In-memory tag service with call counters.
#[derive(Debug, Default)]
pub struct MockTags {
    tags: Mutex<HashMap<String, TagSet>>,
    describe_count: AtomicUsize,
    replace_count: AtomicUsize,
    delete_count: AtomicUsize,
    delete_failures: AtomicUsize,
    cancel_on_delete: Mutex<Option<CancellationToken>>,
}

impl MockTags {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` delete calls with a validation error.
    pub fn fail_deletes(&self, times: usize) {
        self.delete_failures.store(times, Ordering::SeqCst);
    }

    /// Cancel `token` during the next delete call, which then fails with a
    /// throttling error.
    pub fn cancel_next_delete(&self, token: CancellationToken) {
        *self.cancel_on_delete.lock().unwrap() = Some(token);
    }

    /// Attach tags directly, as another tool would.
    pub fn set(&self, resource: &str, tags: TagSet) {
        self.tags.lock().unwrap().insert(resource.to_string(), tags);
    }

    pub fn get(&self, resource: &str) -> TagSet {
        self.tags
            .lock()
            .unwrap()
            .get(resource)
            .cloned()
            .unwrap_or_default()
    }

    pub fn describes(&self) -> usize {
        self.describe_count.load(Ordering::SeqCst)
    }

    pub fn replaces(&self) -> usize {
        self.replace_count.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.delete_count.load(Ordering::SeqCst)
    }

    pub fn mutations(&self) -> usize {
        self.replaces() + self.deletes()
    }
}

#[async_trait]
impl TagClient for MockTags {
    async fn describe_tags(&self, resource: &TagResource) -> RemoteResult<TagSet> {
        self.describe_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.get(&resource.resource_name()))
    }

    async fn replace_tags(&self, resource: &TagResource, tags: &TagSet) -> RemoteResult<()> {
        self.replace_count.fetch_add(1, Ordering::SeqCst);
        let mut all = self.tags.lock().unwrap();
        let current = all.entry(resource.resource_name()).or_default();
        for (key, value) in tags.iter() {
            current.insert(key, value);
        }
        Ok(())
    }

    async fn delete_tags(
        &self,
        resource: &TagResource,
        keys: &BTreeSet<String>,
    ) -> RemoteResult<()> {
        self.delete_count.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = self.cancel_on_delete.lock().unwrap().take() {
            token.cancel();
            return Err(RemoteError::api("RequestLimitExceeded", "too many requests"));
        }
        let remaining = self.delete_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.delete_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(RemoteError::api("InvalidParameter.TagKey", "tag key rejected"));
        }
        let mut all = self.tags.lock().unwrap();
        if let Some(current) = all.get(&resource.resource_name()) {
            let kept = current
                .iter()
                .filter(|(key, _)| !keys.contains(*key))
                .collect();
            all.insert(resource.resource_name(), kept);
        }
        Ok(())
    }
}

// =============================================================================
// Adapter
// =============================================================================

/// Adapter for the mock instance; ids are `zone#instance-id`.
#[derive(Debug, Default)]
pub struct InstanceAdapter;

impl InstanceAdapter {
    fn instance_id(id: &CompositeId) -> &str {
        id.part(1).unwrap_or_default()
    }
}

impl ResourceAdapter for InstanceAdapter {
    fn resource_type(&self) -> &str {
        RESOURCE_TYPE
    }

    fn id_arity(&self) -> usize {
        2
    }

    fn create_request(&self, desired: &DesiredState) -> RemoteRequest {
        RemoteRequest::with_payload(CREATE, json!({ "Attributes": desired.attributes.to_json() }))
    }

    fn parse_create_response(
        &self,
        response: &Json,
        desired: &DesiredState,
    ) -> RemoteResult<Vec<String>> {
        let zone = desired
            .attributes
            .get_str("zone")
            .ok_or_else(|| RemoteError::decode("desired state has no zone"))?;
        let id = response["InstanceId"]
            .as_str()
            .ok_or_else(|| RemoteError::decode("missing InstanceId"))?;
        Ok(vec![zone.to_string(), id.to_string()])
    }

    fn read_request(&self, id: &CompositeId) -> RemoteRequest {
        RemoteRequest::with_payload(DESCRIBE, json!({ "InstanceId": Self::instance_id(id) }))
    }

    fn parse_read_response(&self, response: &Json) -> RemoteResult<Option<ObservedState>> {
        let Some(instance) = response.get("Instance").filter(|v| !v.is_null()) else {
            return Ok(None);
        };
        let attributes = instance["Attributes"]
            .as_object()
            .ok_or_else(|| RemoteError::decode("missing Attributes"))?;
        let status = instance["Status"]
            .as_str()
            .ok_or_else(|| RemoteError::decode("missing Status"))?;
        let (attributes, dropped) = AttributeMap::from_json_object_checked(attributes);
        if !dropped.is_empty() {
            return Err(RemoteError::decode(format!("unsupported values for {dropped:?}")));
        }
        Ok(Some(ObservedState::new(attributes).with_status(status)))
    }

    fn update_requests(&self, id: &CompositeId, updates: &[FieldUpdate]) -> Vec<RemoteRequest> {
        if updates.is_empty() {
            return Vec::new();
        }
        let changes: serde_json::Map<String, Json> = updates
            .iter()
            .map(|u| (u.field.clone(), u.new.to_json()))
            .collect();
        vec![RemoteRequest::with_payload(
            MODIFY,
            json!({ "InstanceId": Self::instance_id(id), "Changes": changes }),
        )]
    }

    fn delete_request(&self, id: &CompositeId) -> RemoteRequest {
        RemoteRequest::with_payload(DELETE, json!({ "InstanceId": Self::instance_id(id) }))
    }

    fn create_target(&self) -> StateTarget {
        StateTarget::statuses(["Running"]).with_failures(["CreateFailed"])
    }

    fn update_target(&self) -> StateTarget {
        StateTarget::statuses(["Running"]).with_failures(["UpdateFailed"])
    }

    fn tag_resource(&self, id: &CompositeId) -> Option<TagResource> {
        Some(TagResource::new(
            "test",
            "instance",
            id.part(0).unwrap_or_default(),
            Self::instance_id(id),
        ))
    }
}

// =============================================================================
// Harness
// =============================================================================

pub fn schema() -> ResourceSchema {
    ResourceSchema::new(RESOURCE_TYPE)
        .mutable("instance_name")
        .mutable("node_count")
        .immutable("zone")
        .field("security_group_ids", FieldSchema::mutable().unordered())
        .field("admin_password", FieldSchema::immutable().write_only())
}

pub fn settings() -> ReconcileSettings {
    ReconcileSettings {
        read_deadline_secs: 10,
        write_deadline_secs: 20,
        initial_backoff_ms: 1_000,
        max_backoff_ms: 4_000,
        jitter: false,
        poll_interval_ms: 1_000,
        poll_deadline_secs: 60,
    }
}

pub fn desired() -> DesiredState {
    DesiredState::new(
        AttributeMap::new()
            .with("instance_name", "analytics")
            .with("zone", ZONE)
            .with("node_count", 3)
            .with("security_group_ids", vec!["sg-1", "sg-2"]),
    )
    .with_tags(TagSet::new().with("env", "prod").with("team", "data"))
}

pub fn tag_resource_name(record: &ResourceRecord) -> String {
    let id = record.local_id.as_ref().expect("record has an id");
    InstanceAdapter
        .tag_resource(id)
        .expect("instances are taggable")
        .resource_name()
}

/// Reconciler wired to the mocks, running on virtual time.
pub struct Harness {
    pub cloud: Arc<MockCloud>,
    pub tags: Arc<MockTags>,
    pub clock: Arc<ManualClock>,
    pub reconciler: Reconciler,
    pub adapter: InstanceAdapter,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_cloud(MockCloud::new())
    }

    pub fn with_cloud(cloud: MockCloud) -> Self {
        Self::build(cloud, settings())
    }

    pub fn build(cloud: MockCloud, settings: ReconcileSettings) -> Self {
        init_test_logging();
        let cloud = Arc::new(cloud);
        let tags = Arc::new(MockTags::new());
        let clock = Arc::new(ManualClock::new());
        let schemas = Arc::new(StaticSchemaProvider::new().with(schema()));
        let reconciler = Reconciler::new(cloud.clone(), tags.clone(), schemas, settings)
            .with_clock(clock.clone());
        Self {
            cloud,
            tags,
            clock,
            reconciler,
            adapter: InstanceAdapter,
        }
    }

    pub async fn reconcile(
        &self,
        record: ResourceRecord,
        desired: DesiredState,
    ) -> (ResourceRecord, Outcome) {
        self.reconcile_with(record, desired, &CancellationToken::new())
            .await
    }

    pub async fn delete(&self, record: ResourceRecord) -> (ResourceRecord, Outcome) {
        self.delete_with(record, &CancellationToken::new()).await
    }

    pub async fn reconcile_with(
        &self,
        record: ResourceRecord,
        desired: DesiredState,
        cancel: &CancellationToken,
    ) -> (ResourceRecord, Outcome) {
        self.reconciler
            .reconcile(&self.adapter, record, desired, cancel)
            .await
    }

    pub async fn delete_with(
        &self,
        record: ResourceRecord,
        cancel: &CancellationToken,
    ) -> (ResourceRecord, Outcome) {
        self.reconciler.delete(&self.adapter, record, cancel).await
    }

    /// Create the default instance and return its converged record.
    pub async fn converged(&self) -> ResourceRecord {
        let (record, outcome) = self.reconcile(ResourceRecord::new(), desired()).await;
        assert!(matches!(outcome, Outcome::Converged), "setup failed: {outcome}");
        record
    }
}
