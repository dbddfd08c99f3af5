//! In-process simulated control plane.
//!
//! Behaves like the real APIs where ordering and failure handling matter:
//!
//! - creating an object whose referenced objects do not exist fails with a
//!   precondition error, and so does creating a database cluster on a
//!   network without a private service access connection;
//! - deleting an object still referenced by another fails the same way;
//! - creating something that already exists is a declaration conflict, as
//!   is an incompatible table schema update;
//! - IAM grants live in one project policy and are added or removed one
//!   (role, member) pair at a time.
//!
//! Every call is appended to an ordered event log so tests can assert on
//! what happened and in which order. Failures can be injected per resource
//! and operation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

use super::{CloudProvider, ObservedResource, ProviderError, ProviderResult, TableRef, Warehouse};
use crate::error::FailureKind;
use crate::plan::AttributeChange;
use crate::resources::{
    classify_schema_change, Attributes, Dependency, EdgeKind, Resource, ResourceId, ResourceKind,
    ResourceSpec, UpdateMode,
};
use crate::state::{AppliedState, ResourceRecord};

/// Kind of call made against the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Read,
    /// Row count of a warehouse table.
    Query,
    /// Removal of every row of a warehouse table.
    Truncate,
}

impl Operation {
    pub fn is_mutation(self) -> bool {
        !matches!(self, Self::Read | Self::Query)
    }
}

/// One entry of the event log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloudEvent {
    pub sequence: u64,
    pub at: DateTime<Utc>,
    pub operation: Operation,
    pub id: ResourceId,
    /// `None` on success.
    pub failure: Option<FailureKind>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    provider_id: String,
    attributes: Attributes,
    dependencies: Vec<Dependency>,
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    kind: FailureKind,
    message: String,
    remaining: u32,
}

/// Simulated cloud control plane.
#[derive(Debug, Default)]
pub struct SimulatedCloud {
    objects: DashMap<ResourceId, StoredObject>,
    iam_policy: Mutex<BTreeMap<String, BTreeSet<String>>>,
    credentials: DashMap<ResourceId, String>,
    rows: DashMap<ResourceId, u64>,
    failures: DashMap<(ResourceId, Operation), InjectedFailure>,
    events: Mutex<Vec<CloudEvent>>,
    sequence: AtomicU64,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl SimulatedCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call take `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// A cloud in which everything recorded in `state` exists.
    pub fn from_state(state: &AppliedState) -> Self {
        let cloud = Self::new();
        for record in state.resources() {
            match record.id.kind {
                ResourceKind::IamBinding => {
                    let role = record.attributes.get("role").and_then(Value::as_str);
                    let member = record.attributes.get("member").and_then(Value::as_str);
                    if let (Some(role), Some(member)) = (role, member) {
                        cloud.grant(role, member);
                    }
                }
                ResourceKind::DatabaseCluster => {
                    if let Some(hash) = record
                        .attributes
                        .get("initial_user")
                        .and_then(|u| u.get("password_hash"))
                        .and_then(Value::as_str)
                    {
                        cloud.credentials.insert(record.id.clone(), hash.to_string());
                    }
                }
                _ => {}
            }
            cloud.objects.insert(
                record.id.clone(),
                StoredObject {
                    provider_id: record.provider_id.clone(),
                    attributes: record.attributes.clone(),
                    dependencies: record.dependencies.clone(),
                },
            );
        }
        cloud
    }

    /// Fail the next `times` calls of `operation` on `id`.
    pub fn inject_failure(
        &self,
        id: ResourceId,
        operation: Operation,
        kind: FailureKind,
        message: impl Into<String>,
        times: u32,
    ) {
        self.failures.insert(
            (id, operation),
            InjectedFailure {
                kind,
                message: message.into(),
                remaining: times,
            },
        );
    }

    /// Add a grant that was not made by this tool.
    pub fn seed_iam_binding(&self, role: &str, member: &str) {
        self.iam_policy
            .lock()
            .entry(role.to_string())
            .or_default()
            .insert(member.to_string());
    }

    /// Members granted `role` in the project policy.
    pub fn iam_members(&self, role: &str) -> BTreeSet<String> {
        self.iam_policy.lock().get(role).cloned().unwrap_or_default()
    }

    /// Change a live attribute behind the tool's back.
    pub fn drift(&self, id: &ResourceId, key: &str, value: Value) -> bool {
        match self.objects.get_mut(id) {
            Some(mut object) => {
                object.attributes.insert(key.to_string(), value);
                true
            }
            None => false,
        }
    }

    /// Delete an object behind the tool's back.
    pub fn remove_out_of_band(&self, id: &ResourceId) -> bool {
        self.objects.remove(id).is_some()
    }

    pub fn exists(&self, id: &ResourceId) -> bool {
        self.objects.contains_key(id)
    }

    pub fn attributes(&self, id: &ResourceId) -> Option<Attributes> {
        self.objects.get(id).map(|o| o.attributes.clone())
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Salted hash of the password a cluster was created or updated with.
    pub fn credential_hash(&self, id: &ResourceId) -> Option<String> {
        self.credentials.get(id).map(|c| c.value().clone())
    }

    /// Append `count` rows to a table, as a loader would.
    pub fn load_rows(&self, table: &TableRef, count: u64) {
        *self.rows.entry(table.resource_id()).or_insert(0) += count;
    }

    fn existing_table(&self, table: &TableRef) -> ProviderResult<ResourceId> {
        let id = table.resource_id();
        if self.objects.contains_key(&id) {
            Ok(id)
        } else {
            Err(ProviderError::precondition(format!("Not found: Table {}", table)))
        }
    }

    /// The event log, in call order.
    pub fn events(&self) -> Vec<CloudEvent> {
        self.events.lock().clone()
    }

    /// Number of successful create/update/delete calls.
    pub fn mutation_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.operation.is_mutation() && e.failure.is_none())
            .count()
    }

    /// Sequence number of the first successful `operation` on `id`.
    pub fn first_success(&self, id: &ResourceId, operation: Operation) -> Option<u64> {
        self.events
            .lock()
            .iter()
            .find(|e| &e.id == id && e.operation == operation && e.failure.is_none())
            .map(|e| e.sequence)
    }

    /// Highest number of calls observed in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Append to the event log. Timestamps strictly increase with sequence.
    fn record(&self, operation: Operation, id: &ResourceId, failure: Option<FailureKind>) {
        let mut events = self.events.lock();
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        trace!(sequence, ?operation, resource = %id, ?failure, "simulated call");
        let now = Utc::now();
        let at = match events.last() {
            Some(last) if last.at >= now => last.at + chrono::Duration::microseconds(1),
            _ => now,
        };
        events.push(CloudEvent {
            sequence,
            at,
            operation,
            id: id.clone(),
            failure,
        });
    }

    fn injected(&self, id: &ResourceId, operation: Operation) -> Option<ProviderError> {
        let key = (id.clone(), operation);
        let mut entry = self.failures.get_mut(&key)?;
        if entry.remaining == 0 {
            return None;
        }
        entry.remaining -= 1;
        Some(ProviderError::new(entry.kind, entry.message.clone()))
    }

    async fn call<T>(
        &self,
        operation: Operation,
        id: &ResourceId,
        f: impl FnOnce() -> ProviderResult<T>,
    ) -> ProviderResult<T> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let result = match self.injected(id, operation) {
            Some(err) => Err(err),
            None => f(),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.record(operation, id, result.as_ref().err().map(|e| e.kind));
        result
    }

    fn check_references(&self, resource: &Resource) -> ProviderResult<()> {
        for dep in resource.spec.references() {
            if !self.objects.contains_key(&dep.target) {
                return Err(ProviderError::precondition(format!(
                    "{} references {} which does not exist",
                    resource.id, dep.target
                )));
            }
        }
        Ok(())
    }

    fn check_service_access(&self, network: &str) -> ProviderResult<()> {
        let peered = self.objects.iter().any(|entry| {
            entry.key().kind == ResourceKind::PeeringConnection
                && entry.value().attributes.get("network").and_then(Value::as_str) == Some(network)
        });
        if peered {
            Ok(())
        } else {
            Err(ProviderError::precondition(format!(
                "network '{}' has no private service access connection",
                network
            )))
        }
    }

    fn grant(&self, role: &str, member: &str) {
        self.seed_iam_binding(role, member);
    }

    fn revoke(&self, attributes: &Attributes) {
        let role = attributes.get("role").and_then(Value::as_str);
        let member = attributes.get("member").and_then(Value::as_str);
        if let (Some(role), Some(member)) = (role, member) {
            let mut policy = self.iam_policy.lock();
            if let Some(members) = policy.get_mut(role) {
                members.remove(member);
                if members.is_empty() {
                    policy.remove(role);
                }
            }
        }
    }

    fn provider_id(resource: &Resource) -> String {
        format!("sim://{}", resource.id)
    }
}

#[async_trait]
impl CloudProvider for SimulatedCloud {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn create(&self, resource: &Resource) -> ProviderResult<ObservedResource> {
        self.call(Operation::Create, &resource.id, || {
            if self.objects.contains_key(&resource.id) {
                return Err(ProviderError::conflict(format!("{} already exists", resource.id)));
            }
            self.check_references(resource)?;

            match &resource.spec {
                ResourceSpec::DatabaseCluster(cluster) => {
                    self.check_service_access(&cluster.network)?;
                    self.credentials
                        .insert(resource.id.clone(), cluster.initial_user.password_hash.clone());
                }
                ResourceSpec::IamBinding(binding) => self.grant(&binding.role, &binding.member),
                _ => {}
            }

            let attributes = resource.attributes();
            let provider_id = Self::provider_id(resource);
            self.objects.insert(
                resource.id.clone(),
                StoredObject {
                    provider_id: provider_id.clone(),
                    attributes: attributes.clone(),
                    dependencies: resource.dependencies(),
                },
            );
            debug!(resource = %resource.id, "simulated create");
            Ok(ObservedResource::new(provider_id, attributes))
        })
        .await
    }

    async fn update(
        &self,
        resource: &Resource,
        _record: &ResourceRecord,
        changes: &[AttributeChange],
    ) -> ProviderResult<ObservedResource> {
        self.call(Operation::Update, &resource.id, || {
            let Some(mut object) = self.objects.get_mut(&resource.id) else {
                return Err(ProviderError::precondition(format!("{} does not exist", resource.id)));
            };

            if let Some(change) = changes.iter().find(|c| c.path == "schema") {
                let old = change.old.clone().unwrap_or(Value::Null);
                let new = change.new.clone().unwrap_or(Value::Null);
                if classify_schema_change(&old, &new) == UpdateMode::Replace {
                    return Err(ProviderError::conflict(format!(
                        "{}: provided schema is not compatible with the existing table",
                        resource.id
                    )));
                }
            }

            if let ResourceSpec::DatabaseCluster(cluster) = &resource.spec {
                self.credentials
                    .insert(resource.id.clone(), cluster.initial_user.password_hash.clone());
            }

            object.attributes = resource.attributes();
            object.dependencies = resource.dependencies();
            Ok(ObservedResource::new(object.provider_id.clone(), object.attributes.clone()))
        })
        .await
    }

    async fn delete(&self, record: &ResourceRecord) -> ProviderResult<()> {
        self.call(Operation::Delete, &record.id, || {
            let Some(object) = self.objects.get(&record.id).map(|o| o.value().clone()) else {
                return Ok(());
            };

            let in_use: Vec<ResourceId> = self
                .objects
                .iter()
                .filter(|entry| {
                    entry
                        .value()
                        .dependencies
                        .iter()
                        .any(|d| d.target == record.id && d.kind == EdgeKind::Reference)
                })
                .map(|entry| entry.key().clone())
                .collect();
            if !in_use.is_empty() {
                let users: Vec<String> = in_use.iter().map(ToString::to_string).collect();
                return Err(ProviderError::precondition(format!(
                    "{} is in use by {}",
                    record.id,
                    users.join(", ")
                )));
            }

            if object.attributes.get("deletion_protection").and_then(Value::as_bool) == Some(true) {
                return Err(ProviderError::precondition(format!(
                    "{} has deletion protection enabled",
                    record.id
                )));
            }

            if record.id.kind == ResourceKind::IamBinding {
                self.revoke(&object.attributes);
            }
            self.credentials.remove(&record.id);
            self.rows.remove(&record.id);
            self.objects.remove(&record.id);
            Ok(())
        })
        .await
    }

    async fn read(&self, record: &ResourceRecord) -> ProviderResult<Option<ObservedResource>> {
        self.call(Operation::Read, &record.id, || {
            Ok(self
                .objects
                .get(&record.id)
                .map(|o| ObservedResource::new(o.provider_id.clone(), o.attributes.clone())))
        })
        .await
    }
}

#[async_trait]
impl Warehouse for SimulatedCloud {
    async fn row_count(&self, table: &TableRef) -> ProviderResult<u64> {
        self.call(Operation::Query, &table.resource_id(), || {
            let id = self.existing_table(table)?;
            Ok(self.rows.get(&id).map_or(0, |r| *r.value()))
        })
        .await
    }

    async fn truncate(&self, table: &TableRef) -> ProviderResult<()> {
        self.call(Operation::Truncate, &table.resource_id(), || {
            let id = self.existing_table(table)?;
            self.rows.remove(&id);
            debug!(%table, "simulated truncate");
            Ok(())
        })
        .await
    }
}
