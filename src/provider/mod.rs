//! Cloud providers.
//!
//! A [`CloudProvider`] performs single-resource operations against the
//! cloud control plane. It knows nothing about plans or ordering; the engine
//! decides what to call and when. Two implementations exist:
//!
//! - [`SimulatedCloud`]: an in-process control plane that enforces the same
//!   preconditions the real APIs do and keeps an ordered event log;
//! - `GcpRestProvider` (feature `gcp`): the Google Cloud REST APIs.
//!
//! Both also implement [`Warehouse`], the row-level access `vulnstack
//! verify` needs on the archive table.

#[cfg(feature = "gcp")]
pub mod gcp;
pub mod simulated;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::error::FailureKind;
use crate::plan::AttributeChange;
use crate::resources::{Attributes, Resource, ResourceId, ResourceKind};
use crate::state::ResourceRecord;
use crate::topology::{DATASET_ID, TABLE_ID};

#[cfg(feature = "gcp")]
pub use gcp::GcpRestProvider;
pub use simulated::{CloudEvent, Operation, SimulatedCloud};

/// A failed provider operation.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct ProviderError {
    pub kind: FailureKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Precondition, message)
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(FailureKind::PermissionOrQuota, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(FailureKind::DeclarationConflict, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transient, message)
    }
}

/// Result type for provider operations
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// A resource as the provider sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedResource {
    /// Identifier assigned by the provider.
    pub provider_id: String,
    /// Live attributes, in the same shape as declared attributes.
    pub attributes: Attributes,
    pub observed_at: DateTime<Utc>,
}

impl ObservedResource {
    pub fn new(provider_id: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            provider_id: provider_id.into(),
            attributes,
            observed_at: Utc::now(),
        }
    }
}

/// Single-resource operations against a cloud control plane.
///
/// Operations return once the resource has reached its final state; long
/// running operations are polled inside the provider.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Provider name, for logs.
    fn name(&self) -> &str;

    /// Create the resource.
    async fn create(&self, resource: &Resource) -> ProviderResult<ObservedResource>;

    /// Apply in-place changes to an existing resource.
    async fn update(
        &self,
        resource: &Resource,
        record: &ResourceRecord,
        changes: &[AttributeChange],
    ) -> ProviderResult<ObservedResource>;

    /// Delete a recorded resource. Deleting something already gone succeeds.
    async fn delete(&self, record: &ResourceRecord) -> ProviderResult<()>;

    /// Observe a recorded resource; `None` if it no longer exists.
    async fn read(&self, record: &ResourceRecord) -> ProviderResult<Option<ObservedResource>>;
}

/// A warehouse table, `project.dataset.table`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    /// The archive table of `project`.
    pub fn archive(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            dataset: DATASET_ID.to_string(),
            table: TABLE_ID.to_string(),
        }
    }

    /// Id of the declared resource backing this table.
    pub fn resource_id(&self) -> ResourceId {
        ResourceId::new(ResourceKind::ArchiveTable, &self.table)
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// Row-level access to warehouse tables.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Number of rows in the table. Fails if the table cannot be queried.
    async fn row_count(&self, table: &TableRef) -> ProviderResult<u64>;

    /// Remove every row; the table and its schema stay.
    async fn truncate(&self, table: &TableRef) -> ProviderResult<()>;
}
