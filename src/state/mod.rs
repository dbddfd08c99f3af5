//! Applied state.
//!
//! The state records, for every resource the tool has created and not yet
//! destroyed, the attributes it was last converged to, the provider-assigned
//! identifier and the dependencies it had at apply time. The planner diffs
//! declarations against it; destroy walks its recorded dependencies in
//! reverse.
//!
//! ## Layout
//!
//! ```text
//! {
//!   "version": 1,
//!   "serial": 7,
//!   "lineage": "3f0c…",
//!   "resources": { "network/vuln-vpc": { … }, … },
//!   "outputs": { "db_connection_command": "psql …" }
//! }
//! ```
//!
//! `serial` increases on every save; `lineage` is fixed when the state is
//! first created so unrelated state files are never mixed up.

pub mod persistence;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resources::{Attributes, Dependency, ResourceId};

pub use persistence::{JsonStateFile, MemoryState, StatePersistence};

/// Current state file format version.
pub const STATE_VERSION: u32 = 1;

/// Errors that can occur during state operations
#[derive(Error, Debug)]
pub enum StateError {
    #[error("State persistence error: {0}")]
    Persistence(String),

    #[error("Unsupported state version {found} (this build reads up to {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for state operations
pub type StateResult<T> = Result<T, StateError>;

/// What the tool knows about one live resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: ResourceId,
    /// Identifier assigned by the provider (self link, resource name).
    pub provider_id: String,
    /// Attributes the resource was last converged to.
    pub attributes: Attributes,
    /// Dependencies at apply time, used to order destruction.
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResourceRecord {
    pub fn new(
        id: ResourceId,
        provider_id: impl Into<String>,
        attributes: Attributes,
        dependencies: Vec<Dependency>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            provider_id: provider_id.into(),
            attributes,
            dependencies,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the recorded object refuses deletion.
    pub fn deletion_protected(&self) -> bool {
        self.attributes
            .get("deletion_protection")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// Record an in-place update, keeping the creation time.
    pub fn updated(mut self, attributes: Attributes, dependencies: Vec<Dependency>) -> Self {
        self.attributes = attributes;
        self.dependencies = dependencies;
        self.updated_at = Utc::now();
        self
    }
}

/// The full applied state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedState {
    pub version: u32,
    pub serial: u64,
    pub lineage: String,
    #[serde(default)]
    resources: BTreeMap<ResourceId, ResourceRecord>,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

impl Default for AppliedState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppliedState {
    /// Fresh, empty state with a new lineage.
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION,
            serial: 0,
            lineage: uuid::Uuid::new_v4().to_string(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn get(&self, id: &ResourceId) -> Option<&ResourceRecord> {
        self.resources.get(id)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    /// Records ordered by id.
    pub fn resources(&self) -> impl Iterator<Item = &ResourceRecord> {
        self.resources.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ResourceId> {
        self.resources.keys()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Insert or replace a record.
    pub fn upsert(&mut self, record: ResourceRecord) {
        self.resources.insert(record.id.clone(), record);
    }

    pub fn remove(&mut self, id: &ResourceId) -> Option<ResourceRecord> {
        self.resources.remove(id)
    }

    /// Advance the serial before a save.
    pub fn bump_serial(&mut self) {
        self.serial += 1;
    }
}
