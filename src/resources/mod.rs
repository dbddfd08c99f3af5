//! Typed resource declarations.
//!
//! Every cloud object in the topology is a plain struct implementing
//! [`Declared`]. The struct's serde representation *is* its attribute map:
//! what the planner diffs, what the state file records and what the
//! simulated cloud stores. Secrets never appear in it.
//!
//! ## Identity
//!
//! Resources are keyed by [`ResourceId`] (`kind/name`), which is also how
//! references between resources are expressed. A reference carries an
//! [`EdgeKind`] describing what the dependency means:
//!
//! | Edge | Meaning | Replacement cascades? |
//! |------|---------|-----------------------|
//! | `Reference` | structural (subnet in network, instance in cluster) | yes |
//! | `Identity` | refers to another object's identity (IAM member) | no |
//! | `Explicit` | ordering hint (`depends_on`) | no |

pub mod compute;
pub mod database;
pub mod identity;
pub mod network;
pub mod warehouse;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub use compute::{AccessVm, FirewallAllow, FirewallRule};
pub use database::{AutomatedBackupPolicy, DatabaseCluster, DatabaseInstance, InitialUser};
pub use identity::{IamBinding, ServiceAccount};
pub use network::{Network, PeeringConnection, PrivateServiceRange, Router, RouterNat, Subnetwork};
pub use warehouse::{
    classify_schema_change, ArchiveDataset, ArchiveTable, FieldMode, SchemaField, TimePartitioning,
};

/// Attribute map of a resource, in declaration order.
pub type Attributes = serde_json::Map<String, Value>;

/// The kinds of resource this topology is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Network,
    Subnetwork,
    Router,
    RouterNat,
    PrivateServiceRange,
    PeeringConnection,
    DatabaseCluster,
    DatabaseInstance,
    ServiceAccount,
    IamBinding,
    AccessVm,
    FirewallRule,
    ArchiveDataset,
    ArchiveTable,
}

impl ResourceKind {
    /// All kinds, in the order they appear in the declaration.
    pub const ALL: [ResourceKind; 14] = [
        ResourceKind::Network,
        ResourceKind::Subnetwork,
        ResourceKind::Router,
        ResourceKind::RouterNat,
        ResourceKind::PrivateServiceRange,
        ResourceKind::PeeringConnection,
        ResourceKind::DatabaseCluster,
        ResourceKind::DatabaseInstance,
        ResourceKind::ServiceAccount,
        ResourceKind::IamBinding,
        ResourceKind::AccessVm,
        ResourceKind::FirewallRule,
        ResourceKind::ArchiveDataset,
        ResourceKind::ArchiveTable,
    ];

    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Network => "network",
            ResourceKind::Subnetwork => "subnetwork",
            ResourceKind::Router => "router",
            ResourceKind::RouterNat => "router_nat",
            ResourceKind::PrivateServiceRange => "private_service_range",
            ResourceKind::PeeringConnection => "peering_connection",
            ResourceKind::DatabaseCluster => "database_cluster",
            ResourceKind::DatabaseInstance => "database_instance",
            ResourceKind::ServiceAccount => "service_account",
            ResourceKind::IamBinding => "iam_binding",
            ResourceKind::AccessVm => "access_vm",
            ResourceKind::FirewallRule => "firewall_rule",
            ResourceKind::ArchiveDataset => "archive_dataset",
            ResourceKind::ArchiveTable => "archive_table",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown resource kind '{}'", s))
    }
}

/// Identity of a resource: its kind plus its name within that kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceId {
    /// Create a new resource id.
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

impl FromStr for ResourceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, name) = s
            .split_once('/')
            .ok_or_else(|| format!("resource id '{}' is not of the form kind/name", s))?;
        if name.is_empty() {
            return Err(format!("resource id '{}' has an empty name", s));
        }
        Ok(Self::new(kind.parse()?, name))
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for ResourceId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// What a dependency edge means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Structural reference; replacing the target replaces the dependent.
    Reference,
    /// Reference to the target's identity only.
    Identity,
    /// Explicit ordering hint.
    Explicit,
}

/// A dependency of one resource on another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub target: ResourceId,
    pub kind: EdgeKind,
}

impl Dependency {
    pub fn reference(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            target: ResourceId::new(kind, name),
            kind: EdgeKind::Reference,
        }
    }

    pub fn identity(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            target: ResourceId::new(kind, name),
            kind: EdgeKind::Identity,
        }
    }

    pub fn explicit(target: ResourceId) -> Self {
        Self {
            target,
            kind: EdgeKind::Explicit,
        }
    }
}

/// How a changed attribute can be converged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Update the live object in place.
    InPlace,
    /// Destroy the live object and create a new one.
    Replace,
}

/// Behaviour shared by every declared resource.
pub trait Declared: Serialize {
    /// The kind of this resource.
    const KIND: ResourceKind;

    /// Name of the resource, unique within its kind.
    fn name(&self) -> &str;

    /// Resources this one refers to.
    fn references(&self) -> Vec<Dependency> {
        Vec::new()
    }

    /// Top-level attributes that cannot change without replacement.
    fn immutable_fields(&self) -> &'static [&'static str] {
        &[]
    }

    /// Classify a change to a single top-level attribute.
    fn update_mode(&self, field: &str, _old: &Value, _new: &Value) -> UpdateMode {
        if field == "project" || self.immutable_fields().contains(&field) {
            UpdateMode::Replace
        } else {
            UpdateMode::InPlace
        }
    }

    /// Whether a recorded attribute already satisfies the declared one.
    fn matches_recorded(&self, _field: &str, recorded: &Value, declared: &Value) -> bool {
        recorded == declared
    }
}

/// A declared resource of any kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceSpec {
    Network(Network),
    Subnetwork(Subnetwork),
    Router(Router),
    RouterNat(RouterNat),
    PrivateServiceRange(PrivateServiceRange),
    PeeringConnection(PeeringConnection),
    DatabaseCluster(DatabaseCluster),
    DatabaseInstance(DatabaseInstance),
    ServiceAccount(ServiceAccount),
    IamBinding(IamBinding),
    AccessVm(AccessVm),
    FirewallRule(FirewallRule),
    ArchiveDataset(ArchiveDataset),
    ArchiveTable(ArchiveTable),
}

macro_rules! each_spec {
    ($spec:expr, $r:ident => $body:expr) => {
        match $spec {
            ResourceSpec::Network($r) => $body,
            ResourceSpec::Subnetwork($r) => $body,
            ResourceSpec::Router($r) => $body,
            ResourceSpec::RouterNat($r) => $body,
            ResourceSpec::PrivateServiceRange($r) => $body,
            ResourceSpec::PeeringConnection($r) => $body,
            ResourceSpec::DatabaseCluster($r) => $body,
            ResourceSpec::DatabaseInstance($r) => $body,
            ResourceSpec::ServiceAccount($r) => $body,
            ResourceSpec::IamBinding($r) => $body,
            ResourceSpec::AccessVm($r) => $body,
            ResourceSpec::FirewallRule($r) => $body,
            ResourceSpec::ArchiveDataset($r) => $body,
            ResourceSpec::ArchiveTable($r) => $body,
        }
    };
}

/// Kind of a concrete declared type.
fn kind_of<T: Declared>(_: &T) -> ResourceKind {
    T::KIND
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        each_spec!(self, r => kind_of(r))
    }

    pub fn name(&self) -> &str {
        each_spec!(self, r => r.name())
    }

    pub fn id(&self) -> ResourceId {
        ResourceId::new(self.kind(), self.name())
    }

    pub fn references(&self) -> Vec<Dependency> {
        each_spec!(self, r => r.references())
    }

    pub fn update_mode(&self, field: &str, old: &Value, new: &Value) -> UpdateMode {
        each_spec!(self, r => r.update_mode(field, old, new))
    }

    pub fn matches_recorded(&self, field: &str, recorded: &Value, declared: &Value) -> bool {
        each_spec!(self, r => r.matches_recorded(field, recorded, declared))
    }

    /// The attribute map of this resource.
    pub fn attributes(&self) -> Attributes {
        let value = each_spec!(self, r => serde_json::to_value(r));
        match value {
            Ok(Value::Object(map)) => map,
            // Every spec is a struct with named fields.
            _ => Attributes::new(),
        }
    }
}

/// A resource in the declaration: its spec plus explicit ordering hints.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: ResourceId,
    pub spec: ResourceSpec,
    pub depends_on: Vec<ResourceId>,
}

impl Resource {
    pub fn new(spec: ResourceSpec) -> Self {
        Self {
            id: spec.id(),
            spec,
            depends_on: Vec::new(),
        }
    }

    /// Add an explicit ordering dependency.
    pub fn depends_on(mut self, target: ResourceId) -> Self {
        if !self.depends_on.contains(&target) {
            self.depends_on.push(target);
        }
        self
    }

    /// Implicit references followed by explicit `depends_on` edges.
    pub fn dependencies(&self) -> Vec<Dependency> {
        let mut deps = self.spec.references();
        for target in &self.depends_on {
            if !deps.iter().any(|d| &d.target == target) {
                deps.push(Dependency::explicit(target.clone()));
            }
        }
        deps
    }

    pub fn attributes(&self) -> Attributes {
        self.spec.attributes()
    }
}

macro_rules! impl_from_spec {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for ResourceSpec {
                fn from(r: $variant) -> Self {
                    ResourceSpec::$variant(r)
                }
            }
        )*
    };
}

impl_from_spec!(
    Network,
    Subnetwork,
    Router,
    RouterNat,
    PrivateServiceRange,
    PeeringConnection,
    DatabaseCluster,
    DatabaseInstance,
    ServiceAccount,
    IamBinding,
    AccessVm,
    FirewallRule,
    ArchiveDataset,
    ArchiveTable,
);
